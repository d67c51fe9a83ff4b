use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use log::*;
use realtime::{SessionProto, SessionSink};

use super::register_session;
use crate::AppState;

/// Outbound half of an upgraded socket.
struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl SessionSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), realtime::Error> {
        self.0
            .send(Message::Text(text))
            .await
            .map_err(realtime::Error::internal)
    }

    async fn close(&mut self) {
        if let Err(err) = self.0.close().await {
            trace!("websocket close failed: {err}");
        }
    }
}

/// GET upgrades the connection; one session per socket.
pub async fn connect(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(app_state): State<AppState>,
) -> Response {
    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, remote_addr, app_state))
}

async fn handle_socket(socket: WebSocket, remote_addr: String, app_state: AppState) {
    let sess = match register_session(&app_state, SessionProto::WebSocket) {
        Ok(sess) => sess,
        Err(err) => {
            error!("Failed to create websocket session: {err}");
            return;
        }
    };
    sess.set_remote_addr(remote_addr);
    debug!("Websocket session {} connected", sess.sid());

    let (sender, mut receiver) = socket.split();
    let writer = tokio::spawn(sess.clone().run_writer(WsSink(sender)));

    while let Some(frame) = receiver.next().await {
        if sess.is_terminating() {
            break;
        }
        match frame {
            Ok(Message::Text(text)) => sess.dispatch_raw(text.as_bytes()).await,
            Ok(Message::Binary(bytes)) => sess.dispatch_raw(&bytes).await,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                debug!("Websocket session {} read failed: {err}", sess.sid());
                break;
            }
        }
    }

    app_state.sessions.delete(sess.sid());
    sess.terminate();
    if let Err(err) = writer.await {
        warn!("Websocket writer of {} failed: {err}", sess.sid());
    }
    debug!("Websocket session {} disconnected", sess.sid());
}

