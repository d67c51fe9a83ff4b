//! HTTP transport of the chat server.
//!
//! Terminates websocket and long-poll connections and turns them into
//! realtime [`Session`](realtime::Session)s. Everything past the framing
//! lives in the `realtime` crate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use log::*;
use realtime::{Context, SessionStore};
use service::config::Config;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod controller;
mod error;
mod params;
pub mod router;

pub use error::{Error, Result};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<Context>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(context: Arc<Context>) -> Self {
        let sessions = SessionStore::new(context.clone());
        Self { context, sessions }
    }
}

/// Serves the router until Ctrl-C.
pub async fn init_server(app_state: AppState, config: &Config) -> std::io::Result<()> {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    let cors_layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    let server_url = format!("{}:{}", config.interface(), config.port);
    let listener = TcpListener::bind(&server_url).await?;
    info!("Server starting... listening for connections on http://{server_url}");

    let app = router::define_routes(app_state).layer(cors_layer);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
    }
}
