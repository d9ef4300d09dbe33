//! WebSocket upgrade handler - the connection gateway
//!
//! Each connection maps to at most one (session, player) pair. Inbound
//! commands resolve through the registry; outbound traffic is the global
//! lobby channel plus, once joined, the session's broadcast channel.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::SessionCommand;
use crate::registry::{JoinError, PlayerInfo};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    // The connection id doubles as the player id inside a session
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, "New WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if send_msg(&mut ws_sink, &welcome).await.is_err() {
        return;
    }
    // Seed the lobby view so the client can render immediately
    let _ = send_msg(&mut ws_sink, &state.registry.lobby_list_msg()).await;

    let mut lobby_rx = state.registry.subscribe_lobby();
    let mut session_rx: Option<broadcast::Receiver<ServerMsg>> = None;
    let rate_limiter = ConnectionRateLimiter::new();

    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !rate_limiter.check_input() {
                            warn!(player_id = %player_id, "Rate limited command message");
                            continue;
                        }

                        match serde_json::from_str::<ClientMsg>(&text) {
                            Ok(msg) => {
                                let ok = handle_client_msg(
                                    msg,
                                    player_id,
                                    &state,
                                    &mut ws_sink,
                                    &mut session_rx,
                                )
                                .await;
                                if !ok {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(player_id = %player_id, "Client initiated close");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary/ping/pong frames carry no commands
                    }
                    Some(Err(e)) => {
                        error!(player_id = %player_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                }
            }

            lobby = lobby_rx.recv() => {
                match lobby {
                    Ok(msg) => {
                        if send_msg(&mut ws_sink, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(player_id = %player_id, lagged = n, "Lobby receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = recv_session(&mut session_rx) => {
                match msg {
                    Ok(msg) => {
                        if send_msg(&mut ws_sink, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Snapshots are full state: skipping some is safe
                        warn!(player_id = %player_id, lagged = n, "Client lagged, skipping {} snapshots", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        session_rx = None;
                    }
                }
            }
        }
    }

    // Implicit disconnect: remove the player from their session
    if let Some(handle) = state.registry.find_session_by_player(&player_id) {
        let _ = handle
            .cmd_tx
            .send(SessionCommand::Leave { player_id })
            .await;
    }

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Await the session channel, or park forever while not in a session
async fn recv_session(
    rx: &mut Option<broadcast::Receiver<ServerMsg>>,
) -> Result<ServerMsg, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Apply one inbound command. Returns false once the socket is unusable.
async fn handle_client_msg<S>(
    msg: ClientMsg,
    player_id: Uuid,
    state: &AppState,
    ws_sink: &mut S,
    session_rx: &mut Option<broadcast::Receiver<ServerMsg>>,
) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match msg {
        ClientMsg::CreateSession {
            player_name,
            mode,
            difficulty,
            avatar,
        } => {
            if state.registry.find_session_by_player(&player_id).is_some() {
                warn!(player_id = %player_id, "Create rejected, already in a session");
                return send_msg(ws_sink, &ServerMsg::AlreadyInSession).await.is_ok();
            }

            let host = PlayerInfo {
                player_id,
                name: player_name,
                avatar,
            };
            let created = state
                .registry
                .create_session(host, mode, difficulty.unwrap_or_default());

            // The receiver was subscribed before the session task spawned,
            // so the creator sees the countdown from its start
            *session_rx = Some(created.events);

            send_msg(ws_sink, &ServerMsg::SessionCreated {
                session_id: created.session_id,
                snapshot: created.snapshot,
            })
            .await
            .is_ok()
        }

        ClientMsg::JoinSession {
            session_id,
            player_name,
            avatar,
        } => {
            let info = PlayerInfo {
                player_id,
                name: player_name,
                avatar,
            };

            let reply = match state.registry.join_session(&session_id, info).await {
                Ok((player, events)) => {
                    *session_rx = Some(events);
                    ServerMsg::Joined { player }
                }
                // Rejections go only to the originating connection
                Err(JoinError::NotFound) => ServerMsg::SessionNotFound,
                Err(JoinError::Full) => ServerMsg::SessionFull,
                Err(JoinError::AlreadyStarted) => ServerMsg::SessionInProgress,
            };

            send_msg(ws_sink, &reply).await.is_ok()
        }

        ClientMsg::ListSessions => send_msg(ws_sink, &state.registry.lobby_list_msg())
            .await
            .is_ok(),

        ClientMsg::Jump => {
            if let Some(handle) = state.registry.find_session_by_player(&player_id) {
                let _ = handle.cmd_tx.send(SessionCommand::Jump { player_id }).await;
            }
            true
        }

        ClientMsg::Restart => {
            if let Some(handle) = state.registry.find_session_by_player(&player_id) {
                let _ = handle.cmd_tx.send(SessionCommand::Restart).await;
            }
            true
        }

        ClientMsg::Ping { t } => send_msg(ws_sink, &ServerMsg::Pong { t }).await.is_ok(),
    }
}

/// Send a message over WebSocket
async fn send_msg<S>(sink: &mut S, msg: &ServerMsg) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
