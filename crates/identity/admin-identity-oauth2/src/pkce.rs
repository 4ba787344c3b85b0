//! PKCE code verifier/challenge and CSRF state generation (RFC 7636).
//!
//! All randomness comes from the operating system's CSPRNG. If it cannot be
//! read, generation fails with [`AuthFlowError::EntropyUnavailable`]; there is
//! no fallback generator.

use crate::error::{AuthFlowError, OAuth2Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// RFC 7636 unreserved characters: `[A-Za-z0-9-._~]`
pub const UNRESERVED: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const VERIFIER_MIN_LEN: usize = 43;
pub const VERIFIER_MAX_LEN: usize = 128;
pub const DEFAULT_VERIFIER_LEN: usize = 64;
pub const STATE_LEN: usize = 32;

pub const CHALLENGE_METHOD: &str = "S256";

// Largest multiple of the alphabet size below 256. Bytes at or above it are
// rejected so every character is equally likely.
const ACCEPT_BELOW: usize = 256 / UNRESERVED.len() * UNRESERVED.len();

/// PKCE verifier together with its S256 challenge
#[derive(Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: &'static str,
}

impl PkceChallenge {
    pub fn generate() -> OAuth2Result<Self> {
        let code_verifier = generate_verifier()?;
        Ok(Self::from_verifier(code_verifier))
    }

    pub fn from_verifier(code_verifier: String) -> Self {
        let code_challenge = derive_challenge(&code_verifier);
        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: CHALLENGE_METHOD,
        }
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("code_verifier", &"<redacted>")
            .field("code_challenge", &self.code_challenge)
            .field("code_challenge_method", &self.code_challenge_method)
            .finish()
    }
}

/// Generate a code verifier of the default length.
pub fn generate_verifier() -> OAuth2Result<String> {
    generate_verifier_of_length(DEFAULT_VERIFIER_LEN)
}

pub fn generate_verifier_of_length(len: usize) -> OAuth2Result<String> {
    if !(VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&len) {
        return Err(AuthFlowError::ConfigError(format!(
            "Verifier length {} outside {}..={}",
            len, VERIFIER_MIN_LEN, VERIFIER_MAX_LEN
        )));
    }
    random_unreserved(len)
}

/// `BASE64URL-NOPAD(SHA256(ASCII(verifier)))`
pub fn derive_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a CSRF state token. Drawn independently of any verifier.
pub fn generate_state() -> OAuth2Result<String> {
    random_unreserved(STATE_LEN)
}

pub fn is_valid_verifier(verifier: &str) -> bool {
    (VERIFIER_MIN_LEN..=VERIFIER_MAX_LEN).contains(&verifier.len())
        && verifier.bytes().all(|b| UNRESERVED.contains(&b))
}

fn random_unreserved(len: usize) -> OAuth2Result<String> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 64];

    while out.len() < len {
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| AuthFlowError::EntropyUnavailable(e.to_string()))?;

        for byte in buf.iter().map(|b| *b as usize) {
            if byte >= ACCEPT_BELOW {
                continue;
            }
            out.push(UNRESERVED[byte % UNRESERVED.len()] as char);
            if out.len() == len {
                break;
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_verifier_length_and_charset() {
        for _ in 0..200 {
            let verifier = generate_verifier().unwrap();
            assert_eq!(verifier.len(), DEFAULT_VERIFIER_LEN);
            assert!(is_valid_verifier(&verifier));
        }

        for len in [VERIFIER_MIN_LEN, 100, VERIFIER_MAX_LEN] {
            let verifier = generate_verifier_of_length(len).unwrap();
            assert_eq!(verifier.len(), len);
            assert!(is_valid_verifier(&verifier));
        }
    }

    #[test]
    fn test_verifier_length_bounds_enforced() {
        assert!(generate_verifier_of_length(VERIFIER_MIN_LEN - 1).is_err());
        assert!(generate_verifier_of_length(VERIFIER_MAX_LEN + 1).is_err());
    }

    #[test]
    fn test_rfc7636_challenge_vector() {
        // RFC 7636 Appendix B
        let challenge = derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_challenge_is_unpadded_base64url() {
        let pkce = PkceChallenge::generate().unwrap();
        assert_eq!(pkce.code_challenge_method, "S256");
        assert_eq!(pkce.code_challenge.len(), 43);
        assert!(!pkce.code_challenge.contains('='));
        assert!(!pkce.code_challenge.contains('+'));
        assert!(!pkce.code_challenge.contains('/'));
        assert_eq!(pkce.code_challenge, derive_challenge(&pkce.code_verifier));
    }

    #[test]
    fn test_state_is_independent_and_unique() {
        let states: HashSet<String> = (0..100).map(|_| generate_state().unwrap()).collect();
        assert_eq!(states.len(), 100);

        let state = generate_state().unwrap();
        assert!(state.len() >= 32);
        assert!(state.bytes().all(|b| UNRESERVED.contains(&b)));

        let pkce = PkceChallenge::generate().unwrap();
        assert!(!pkce.code_verifier.contains(&state));
    }

    #[test]
    fn test_every_alphabet_symbol_reachable() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            seen.extend(generate_verifier_of_length(VERIFIER_MAX_LEN).unwrap().bytes());
        }
        assert_eq!(seen.len(), UNRESERVED.len());
    }
}
