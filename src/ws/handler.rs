//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::routes::AppError;
use crate::room::{validate_room_id, ClientLink, JoinOptions, Outbound, RoomEvent, RoomHandle};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, LeaveCode, ServerMsg};

/// Per-connection outbound buffer (direct replies, pings, close)
const OUTBOUND_CAPACITY: usize = 64;

type WsSink = futures::stream::SplitSink<WebSocket, Message>;
type WsStream = futures::stream::SplitStream<WebSocket>;

/// Join options passed in the upgrade query string
#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    pub name: Option<String>,
    /// Symbolic skin id or numeric index
    pub skin: Option<String>,
}

impl From<JoinQuery> for JoinOptions {
    fn from(query: JoinQuery) -> Self {
        Self {
            name: query.name.map(Value::String).unwrap_or(Value::Null),
            skin: query.skin.map(Value::String).unwrap_or(Value::Null),
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<JoinQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    validate_room_id(&room_id).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let options = JoinOptions::from(query);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, room_id, options, state)))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: String, options: JoinOptions, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!(room_id = %room_id, connection_id = %connection_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let link = ClientLink::new(connection_id, outbound_tx);

    let handle = match state.rooms.join(&room_id, connection_id, options, link).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(room_id = %room_id, connection_id = %connection_id, error = %e, "Join failed");
            return;
        }
    };

    let state_rx = handle.subscribe();
    let code = run_session(connection_id, &handle, ws_sink, ws_stream, outbound_rx, state_rx).await;

    // Idempotent if the room already evicted us
    let _ = handle.send(RoomEvent::Leave { connection_id }).await;

    info!(
        room_id = %room_id,
        connection_id = %connection_id,
        code = code.as_u16(),
        "WebSocket connection closed"
    );
}

/// Run the WebSocket session with read/write split.
/// Returns how the connection ended.
async fn run_session(
    connection_id: Uuid,
    handle: &RoomHandle,
    ws_sink: WsSink,
    mut ws_stream: WsStream,
    outbound_rx: mpsc::Receiver<Outbound>,
    state_rx: broadcast::Receiver<ServerMsg>,
) -> LeaveCode {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: room replies + state broadcasts -> WebSocket
    let mut writer_handle = tokio::spawn(write_loop(connection_id, ws_sink, outbound_rx, state_rx));

    // Reader loop: WebSocket -> room
    let reader = async {
        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_message() {
                        warn!(connection_id = %connection_id, "Rate limited client message");
                        continue;
                    }

                    match ClientMsg::decode(&text) {
                        Ok(msg) => {
                            let event = RoomEvent::Message { connection_id, msg };
                            if handle.send(event).await.is_err() {
                                debug!(connection_id = %connection_id, "Room closed");
                                return LeaveCode::Normal;
                            }
                        }
                        Err(e) => {
                            warn!(connection_id = %connection_id, error = %e, "Failed to decode client message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(connection_id = %connection_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(connection_id = %connection_id, "Client initiated close");
                    return LeaveCode::Normal;
                }
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                    return LeaveCode::AbnormalClosure;
                }
            }
        }
        // Stream ended without a close frame
        LeaveCode::AbnormalClosure
    };

    let code = tokio::select! {
        written = &mut writer_handle => written.unwrap_or(LeaveCode::AbnormalClosure),
        code = reader => code,
    };

    writer_handle.abort();
    code
}

async fn write_loop(
    connection_id: Uuid,
    mut ws_sink: WsSink,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut state_rx: broadcast::Receiver<ServerMsg>,
) -> LeaveCode {
    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Message(msg)) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                        return LeaveCode::AbnormalClosure;
                    }
                }
                Some(Outbound::Close(code)) => {
                    let frame = CloseFrame {
                        code: code.as_u16(),
                        reason: code.reason().into(),
                    };
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    info!(connection_id = %connection_id, code = code.as_u16(), "Closing connection");
                    return code;
                }
                None => return LeaveCode::Normal,
            },
            state = state_rx.recv() => match state {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                        return LeaveCode::AbnormalClosure;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Only the latest state matters; keep going
                    warn!(connection_id = %connection_id, lagged_count = n, "Client lagged behind state broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(connection_id = %connection_id, "State channel closed");
                    return LeaveCode::Normal;
                }
            },
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
