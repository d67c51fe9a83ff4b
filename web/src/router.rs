use crate::controller::{health_check_controller, long_poll_controller, websocket_controller};
use crate::AppState;
use axum::{routing::get, Router};

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(channel_routes(app_state))
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn channel_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/v0/channels", get(websocket_controller::connect))
        .route(
            "/v0/channels/lp",
            get(long_poll_controller::poll).post(long_poll_controller::send),
        )
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::{AnonAuth, BasicAuth, Registry};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use realtime::{Context, Limits};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use store::{MemoryStore, Store};
    use tower::ServiceExt;

    fn app_state() -> AppState {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let auth = Registry::new()
            .with_handler(Arc::new(BasicAuth::new(store.clone())))
            .with_handler(Arc::new(AnonAuth));
        let limits = Limits {
            long_poll_wait: Duration::from_millis(50),
            ..Limits::default()
        };
        AppState::new(Context::new(limits, store, auth))
    }

    async fn call(app_state: &AppState, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_owned()))
            .unwrap();
        let response = define_routes(app_state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    async fn open_session(app_state: &AppState) -> String {
        let (status, body) = call(app_state, Method::GET, "/v0/channels/lp", "").await;
        assert_eq!(status, StatusCode::CREATED);
        body[0]["ctrl"]["params"]["sid"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn health_check_responds() {
        let (status, body) = call(&app_state(), Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("healthy"));
    }

    #[tokio::test]
    async fn long_poll_get_without_sid_opens_a_session() {
        let app_state = app_state();
        let sid = open_session(&app_state).await;

        assert!(app_state.sessions.get(&sid).is_some());
        assert_eq!(app_state.sessions.lp_len(), 1);
    }

    #[tokio::test]
    async fn unknown_sid_is_rejected_with_ctrl() {
        let app_state = app_state();
        let (status, body) = call(
            &app_state,
            Method::POST,
            "/v0/channels/lp?sid=nope",
            r#"{"hi":{"ver":"1.2"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ctrl"]["code"], json!(404));
        assert_eq!(body["ctrl"]["text"], json!("invalid or expired session"));
    }

    #[tokio::test]
    async fn long_poll_post_answers_handshake() {
        let app_state = app_state();
        let sid = open_session(&app_state).await;

        let (status, body) = call(
            &app_state,
            Method::POST,
            &format!("/v0/channels/lp?sid={sid}"),
            r#"{"hi":{"id":"1","ver":"1.2"}}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["ctrl"]["code"], json!(201));
        assert_eq!(body[0]["ctrl"]["id"], json!("1"));
        assert_eq!(body[0]["ctrl"]["params"]["sid"], json!(sid));
    }

    #[tokio::test]
    async fn long_poll_get_returns_empty_batch_after_wait() {
        let app_state = app_state();
        let sid = open_session(&app_state).await;

        let (status, body) = call(
            &app_state,
            Method::GET,
            &format!("/v0/channels/lp?sid={sid}"),
            "",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn websocket_route_requires_upgrade() {
        let (status, _) = call(&app_state(), Method::GET, "/v0/channels", "").await;
        assert!(status.is_client_error());
    }
}
