use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use log::*;
use protocol::{ServerComMessage, Status};
use realtime::error::ResourceErrorKind;
use realtime::{Session, SessionProto};
use serde_json::json;

use super::register_session;
use crate::params::channel::LongPollParams;
use crate::{AppState, Error};

/// GET without a `sid` opens a long-poll session; with one, waits for the
/// session's outbound messages.
pub async fn poll(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<LongPollParams>,
    State(app_state): State<AppState>,
) -> Result<Response, Error> {
    let Some(sid) = params.sid else {
        let sess = register_session(&app_state, SessionProto::LongPoll)?;
        if let Some(ConnectInfo(addr)) = connect_info {
            sess.set_remote_addr(addr.to_string());
        }
        info!("Long-poll session {} opened", sess.sid());
        let ctrl = ServerComMessage::ctrl(Status::Created, "", "", Utc::now())
            .with_params(json!({ "sid": sess.sid() }));
        return Ok(json_response(StatusCode::CREATED, vec![ctrl]));
    };

    let sess = lookup(&app_state, &sid)?;
    let batch = sess.poll(app_state.context.limits.long_poll_wait).await;
    // The wait counts as activity.
    app_state.sessions.touch(&sid);
    trace!("Long-poll session {} received {} messages", sid, batch.len());
    Ok(json_response(StatusCode::OK, batch))
}

/// POST delivers one client message and answers with whatever the session
/// produced right away.
pub async fn send(
    Query(params): Query<LongPollParams>,
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<Response, Error> {
    let sid = params.sid.unwrap_or_default();
    let sess = lookup(&app_state, &sid)?;
    sess.dispatch_raw(&body).await;
    let batch = sess.drain();
    Ok(json_response(StatusCode::OK, batch))
}

fn lookup(app_state: &AppState, sid: &str) -> Result<Arc<Session>, Error> {
    app_state
        .sessions
        .touch(sid)
        .filter(|sess| sess.proto() == SessionProto::LongPoll && !sess.is_terminating())
        .ok_or_else(|| {
            debug!("Unknown long-poll session '{}'", sid);
            realtime::Error::resource(ResourceErrorKind::SessionNotFound).into()
        })
}

fn json_response(status: StatusCode, batch: Vec<ServerComMessage>) -> Response {
    let frames: Vec<String> = batch
        .iter()
        .filter_map(|msg| match msg.encode() {
            Ok(text) => Some(text),
            Err(err) => {
                error!("Failed to encode {}: {err}", msg.describe());
                None
            }
        })
        .collect();
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        format!("[{}]", frames.join(",")),
    )
        .into_response()
}
