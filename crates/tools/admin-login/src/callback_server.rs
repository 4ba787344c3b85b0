//! Loopback listener that receives the identity provider's redirect.
//!
//! The handler forwards the full callback URL to the login task and holds the
//! browser's request open until the login task reports the outcome, so the
//! page the user sees reflects whether the login actually succeeded.

use anyhow::{Context, Result, bail};
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::response::Html;
use axum::routing::get;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// A redirect received from the provider, waiting for its outcome.
pub struct ReceivedCallback {
    pub url: String,
    reply: oneshot::Sender<Result<(), String>>,
}

impl ReceivedCallback {
    /// Report the login outcome to the waiting browser.
    pub fn respond(self, outcome: Result<(), String>) {
        // The browser may have given up already
        let _ = self.reply.send(outcome);
    }
}

#[derive(Clone)]
struct ListenerState {
    callback_base: String,
    callbacks: mpsc::Sender<ReceivedCallback>,
}

pub struct CallbackListener {
    local_addr: SocketAddr,
    callbacks: mpsc::Receiver<ReceivedCallback>,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
}

impl CallbackListener {
    /// Bind to the host and port of a loopback `http` redirect URI and serve
    /// its path.
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let redirect = Url::parse(redirect_uri).context("Invalid redirect_uri")?;
        if redirect.scheme() != "http" {
            bail!(
                "redirect_uri must use http on a loopback address to be served locally, got {}",
                redirect_uri
            );
        }
        let host = redirect
            .host_str()
            .context("redirect_uri has no host")?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = redirect
            .port_or_known_default()
            .context("redirect_uri has no port")?;

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .with_context(|| format!("Failed to bind callback listener on {}:{}", host, port))?;
        let local_addr = listener.local_addr()?;

        let mut callback_base = redirect.clone();
        callback_base.set_query(None);
        callback_base.set_fragment(None);
        if redirect.port().is_some() {
            // Keep the URL pointing at the port actually bound (matters for port 0)
            let _ = callback_base.set_port(Some(local_addr.port()));
        }

        let (sender, callbacks) = mpsc::channel(1);
        let state = ListenerState {
            callback_base: callback_base.to_string(),
            callbacks: sender,
        };

        let app = Router::new()
            .route(redirect.path(), get(handle_callback))
            .with_state(state);

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_rx.await.ok();
                })
                .into_future(),
        );

        info!("Listening for the login callback on {}", local_addr);
        Ok(Self {
            local_addr,
            callbacks,
            shutdown,
            server,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the provider to redirect back.
    pub async fn next_callback(&mut self, timeout: Duration) -> Result<ReceivedCallback> {
        match tokio::time::timeout(timeout, self.callbacks.recv()).await {
            Ok(Some(callback)) => Ok(callback),
            Ok(None) => bail!("Callback listener stopped"),
            Err(_) => bail!(
                "No login callback received within {} seconds",
                timeout.as_secs()
            ),
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.server
            .await
            .context("Callback listener task failed")?
            .context("Callback listener failed")?;
        debug!("Callback listener stopped");
        Ok(())
    }
}

async fn handle_callback(
    State(state): State<ListenerState>,
    RawQuery(query): RawQuery,
) -> Html<String> {
    let url = match query {
        Some(query) => format!("{}?{}", state.callback_base, query),
        None => state.callback_base.clone(),
    };

    let (reply, outcome) = oneshot::channel();
    if state
        .callbacks
        .send(ReceivedCallback { url, reply })
        .await
        .is_err()
    {
        return Html(render_page(Err("This login is no longer waiting for a callback.")));
    }

    match outcome.await {
        Ok(Ok(())) => Html(render_page(Ok(()))),
        Ok(Err(reason)) => Html(render_page(Err(&reason))),
        Err(_) => Html(render_page(Err("The login was abandoned."))),
    }
}

fn render_page(outcome: Result<(), &str>) -> String {
    let (title, message) = match outcome {
        Ok(()) => (
            "Login complete",
            "You are logged in. You can close this window and return to the terminal.".to_string(),
        ),
        Err(reason) => ("Login failed", escape_html(reason)),
    };

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family: sans-serif; margin: 4em;\"><h1>{title}</h1><p>{message}</p></body></html>"
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
