use std::sync::Arc;

use auth::{AnonAuth, BasicAuth, Registry};
use log::{error, info};
use protocol::ProtocolVersion;
use realtime::{Context, Limits};
use service::{config::Config, logging::Logger};
use store::{MemoryStore, Store};
use web::AppState;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!(
        "Starting chat server {} [{}]",
        protocol::BUILD,
        config.runtime_env()
    );

    let limits = match limits(&config) {
        Ok(limits) => limits,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let auth = Registry::new()
        .with_handler(Arc::new(BasicAuth::new(store.clone())))
        .with_handler(Arc::new(AnonAuth));
    info!("Auth schemes: {}", auth.schemes().join(", "));

    let context = Context::new(limits, store, auth);
    let app_state = AppState::new(context.clone());
    let sweeper = app_state
        .sessions
        .spawn_sweeper(config.session_sweep_interval());

    if let Err(e) = web::init_server(app_state.clone(), &config).await {
        error!("Server failed: {e}");
    }

    sweeper.abort();
    app_state.sessions.shutdown();
    context.hub.shutdown().await;
    info!("Chat server stopped");
}

fn limits(config: &Config) -> Result<Limits, String> {
    let min_supported_version: ProtocolVersion = config
        .min_supported_version
        .parse()
        .map_err(|e| format!("min_supported_version: {e}"))?;

    Ok(Limits {
        min_supported_version,
        send_timeout: config.send_timeout(),
        send_queue_limit: config.send_queue_limit,
        deferred_notifications: config.deferred_notifications(),
        long_poll_lifetime: config.long_poll_lifetime(),
        long_poll_wait: config.long_poll_wait(),
        topic_idle: config.topic_idle(),
        topic_queue_limit: config.topic_queue_limit,
        max_message_size: config.max_message_size,
    })
}
