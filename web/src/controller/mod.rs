use std::sync::Arc;

use log::*;
use realtime::{Session, SessionProto};

use crate::AppState;

pub(crate) mod health_check_controller;
pub(crate) mod long_poll_controller;
pub(crate) mod websocket_controller;

/// Registers a new session for a transport. A duplicate session id leaves
/// the registry inconsistent and stops the server.
pub(crate) fn register_session(
    app_state: &AppState,
    proto: SessionProto,
) -> Result<Arc<Session>, realtime::Error> {
    match app_state.sessions.new_session(proto, None) {
        Ok(sess) => Ok(sess),
        Err(err) if err.aborts_process() => {
            error!("Fatal: {err}, shutting down");
            std::process::exit(1);
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::{AnonAuth, Registry};
    use realtime::{Context, Limits};
    use store::{MemoryStore, Store};

    fn app_state() -> AppState {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let auth = Registry::new().with_handler(Arc::new(AnonAuth));
        AppState::new(Context::new(Limits::default(), store, auth))
    }

    #[tokio::test]
    async fn register_session_tracks_long_poll_sessions() {
        let app_state = app_state();
        let sess = register_session(&app_state, SessionProto::LongPoll).unwrap();

        assert!(app_state.sessions.get(sess.sid()).is_some());
        assert_eq!(app_state.sessions.lp_len(), 1);
    }

    #[tokio::test]
    async fn session_without_transport_is_an_error_not_an_exit() {
        let app_state = app_state();
        let err = register_session(&app_state, SessionProto::None).unwrap_err();

        assert!(err.is_fatal());
        assert!(app_state.sessions.is_empty());
    }
}
