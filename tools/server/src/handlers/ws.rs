//! WebSocket upgrade into the connection registry.

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;
use futures::future::ready;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use notevault_common::{DeviceId, UserId};
use notevault_realtime::{serve_connection, Frame};

use crate::error::ApiError;
use crate::handlers::device_or_default;
use crate::state::AppState;

/// Close code for "try again later".
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

#[derive(Deserialize)]
pub struct WsQuery {
    pub device_id: Option<String>,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let device = device_or_default(query.device_id)?;
    Ok(ws.on_upgrade(move |socket| run_socket(state, user, device, socket)))
}

async fn run_socket(state: AppState, user: UserId, device: DeviceId, mut socket: WebSocket) {
    let session = match state.registry.connect(user, device) {
        Ok(session) => session,
        Err(e) => {
            debug!(error = %e, "Closing refused connection");
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CLOSE_TRY_AGAIN_LATER,
                    reason: "connection limit reached".into(),
                })))
                .await;
            return;
        }
    };

    let (sink, stream) = socket.split();
    let stream = stream.filter_map(|item| ready(to_frame(item)));
    let sink = sink.with(|frame: Frame| ready(Ok::<_, axum::Error>(from_frame(frame))));

    serve_connection(
        state.registry.clone(),
        session,
        Box::pin(stream),
        Box::pin(sink),
        state.inbound.clone(),
        state.realtime.clone(),
    )
    .await;
}

fn to_frame(item: Result<WsMessage, axum::Error>) -> Option<Result<Frame, axum::Error>> {
    let message = match item {
        Ok(message) => message,
        Err(e) => return Some(Err(e)),
    };
    let frame = match message {
        WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
        WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Frame::Text(text),
            Err(e) => {
                debug!(error = %e, len = data.len(), "Dropping non UTF-8 binary frame");
                return None;
            }
        },
        WsMessage::Ping(data) => Frame::Ping(data.to_vec()),
        WsMessage::Pong(data) => Frame::Pong(data.to_vec()),
        WsMessage::Close(_) => Frame::Close,
    };
    Some(Ok(frame))
}

fn from_frame(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text.into()),
        Frame::Ping(data) => WsMessage::Ping(Bytes::from(data)),
        Frame::Pong(data) => WsMessage::Pong(Bytes::from(data)),
        Frame::Close => WsMessage::Close(None),
    }
}
