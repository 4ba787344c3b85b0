//! admin-login: log in to the admin dashboard's identity provider from a terminal
//!
//! `login` runs the Authorization Code + PKCE flow against the configured
//! provider, receives the redirect on a loopback listener, and can call
//! protected endpoints through the authenticated gateway. `pkce` prints a fresh
//! verifier, challenge and state for manual testing.

mod callback_server;
mod config;

use crate::callback_server::CallbackListener;
use crate::config::AppConfig;
use admin_identity_oauth2::{AuthSession, Navigator, PkceChallenge, TokenSet, pkce};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::{Term, style};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to admin-login.toml when present)
    #[arg(short, long, env = "ADMIN_LOGIN_CONFIG_FILE", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the browser, then optionally fetch protected URLs
    Login {
        /// Protected URL to GET with the issued token (repeatable)
        #[arg(long = "fetch", value_name = "URL")]
        fetch: Vec<String>,

        /// Seconds to wait for the provider's redirect
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Print a fresh PKCE verifier, challenge and state
    Pkce {
        /// Verifier length (43-128)
        #[arg(short, long, default_value_t = pkce::DEFAULT_VERIFIER_LEN)]
        length: usize,
    },
}

/// Prints navigation targets instead of driving a browser.
struct ConsoleNavigator {
    term: Term,
}

impl ConsoleNavigator {
    fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }
}

impl Navigator for ConsoleNavigator {
    fn navigate(&self, target: &str) {
        let message = if target.starts_with("http://") || target.starts_with("https://") {
            format!(
                "{}\n\n  {}\n",
                style("Open this URL in your browser to log in:").bold(),
                style(target).cyan().underlined()
            )
        } else {
            format!(
                "{} continuing to {}",
                style("✓ Logged in,").green().bold(),
                style(target).dim()
            )
        };

        announce(target, &message, |line| self.term.write_line(line));
    }
}

/// Show `message` to the user. A failed write is logged together with the
/// target so the user can still follow it. Returns whether the write worked.
fn announce(target: &str, message: &str, write: impl FnOnce(&str) -> std::io::Result<()>) -> bool {
    match write(message) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to write to terminal: {}. Navigate to {}", e, target);
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Pkce { length } => {
            init_tracing("warn");
            print_pkce(length)
        }
        Commands::Login { fetch, timeout } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            init_tracing(&config.log_filter());

            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.callback_timeout());
            login(config, fetch, timeout).await
        }
    }
}

fn init_tracing(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_pkce(length: usize) -> Result<()> {
    let verifier = pkce::generate_verifier_of_length(length)?;
    let challenge = PkceChallenge::from_verifier(verifier);
    let state = pkce::generate_state()?;

    println!("{}  {}", style("code_verifier:        ").dim(), challenge.code_verifier);
    println!("{}  {}", style("code_challenge:       ").dim(), challenge.code_challenge);
    println!("{}  {}", style("code_challenge_method:").dim(), challenge.code_challenge_method);
    println!("{}  {}", style("state:                ").dim(), state);
    Ok(())
}

async fn login(config: AppConfig, fetch: Vec<String>, timeout: Duration) -> Result<()> {
    // Listen before redirecting so the callback cannot arrive first
    let mut listener = CallbackListener::bind(&config.oauth.redirect_uri).await?;

    let session = AuthSession::new(config.oauth.clone(), Arc::new(ConsoleNavigator::new()))
        .context("Failed to create auth session")?;
    session.begin_login().await.context("Failed to start login")?;

    let callback = listener.next_callback(timeout).await?;
    let outcome = session.resolve_callback(&callback.url).await;
    callback.respond(outcome.as_ref().map(|_| ()).map_err(|e| e.to_string()));
    listener.shutdown().await?;

    let tokens = outcome.context("Login failed")?;
    print_tokens(&tokens);

    let gateway = session.gateway();
    for url in fetch {
        info!("Fetching {}", url);
        match gateway.send(gateway.get(&url)).await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let status_style = if status.is_success() {
                    style(status.to_string()).green()
                } else {
                    style(status.to_string()).red()
                };
                println!("\n{} {}\n{}", status_style, style(&url).bold(), body);
            }
            Err(e) => {
                error!("Request to {} failed: {}", url, e);
                println!("\n{} {}: {}", style("✗").red(), style(&url).bold(), e);
            }
        }
    }

    Ok(())
}

fn print_tokens(tokens: &TokenSet) {
    let expires = tokens
        .expires_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    println!("{}", style("Session").bold());
    println!("  token type:    {}", tokens.token_type);
    println!("  expires at:    {}", expires);
    println!(
        "  scope:         {}",
        tokens.scope.as_deref().unwrap_or("(as requested)")
    );
    println!(
        "  refresh token: {}",
        if tokens.refresh_token.is_some() { "yes" } else { "no" }
    );
    println!(
        "  id token:      {}",
        if tokens.id_token.is_some() { "yes" } else { "no" }
    );
}
