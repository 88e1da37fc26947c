//! One realtime connection from handshake to close.
//!
//! The socket is split into a reader, which runs on the upgrade task and
//! drives the message pipeline, and a writer task, which drains the
//! connection's bounded outbound queue and sends heartbeat pings. The two
//! halves only meet through the queue and the handle's close signal.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use courier_chats::{
    ChatError, ClientFrame, DeleteScope, ErrorKind, SendMessage, ServerEvent,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::registry::{
    ChatScope, CloseReason, ConnectionHandle, OutboundFrame, RegistrationId,
};
use crate::state::GatewayState;

/// Close code for failed authentication.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("illegal session transition from {from:?} to {to:?}")]
    IllegalTransition { from: SessionState, to: SessionState },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("no frames from client for {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Lifecycle of a session; rejects transitions that skip or reverse a step.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transition(&mut self, to: SessionState) -> Result<(), SessionError> {
        use SessionState::*;

        let allowed = matches!(
            (self.state, to),
            (Connecting, Authenticated)
                | (Connecting, Closing)
                | (Authenticated, Active)
                | (Authenticated, Closing)
                | (Active, Closing)
                | (Closing, Closed)
        );

        if !allowed {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to,
            });
        }

        debug!(from = ?self.state, to = ?to, "session transition");
        self.state = to;
        Ok(())
    }

    /// Finish the session from whatever state it reached.
    pub fn close(&mut self) {
        if self.state != SessionState::Closing {
            let _ = self.transition(SessionState::Closing);
        }
        let _ = self.transition(SessionState::Closed);
    }
}

type Sink = SplitSink<WebSocket, Message>;
type Stream = SplitStream<WebSocket>;

/// Store reads a connecting session makes before giving up on a quiet directory.
const DIRECTORY_PASSES: usize = 4;

/// Run a connection to completion.
pub async fn run_session(
    socket: WebSocket,
    state: Arc<GatewayState>,
    scope: ChatScope,
    token: Option<String>,
) {
    let mut machine = SessionMachine::new();
    let (mut sink, mut stream) = socket.split();

    let user_id = match authenticate(&state, token, &mut stream).await {
        Ok(user_id) => user_id,
        Err(err) => {
            warn!(error = %err, "websocket authentication failed");
            reject(&mut sink, "unauthorized", &err.to_string(), CLOSE_UNAUTHORIZED).await;
            machine.close();
            return;
        }
    };
    if let Err(err) = machine.transition(SessionState::Authenticated) {
        error!(error = %err, "session state machine rejected authentication");
        machine.close();
        return;
    }

    let epoch = state.registry.membership_epoch();
    let chats = match load_chat_ids(&state, &user_id).await {
        Ok(chats) => chats,
        Err(err) => {
            error!(%user_id, error = %err, "failed to load chat membership");
            reject(&mut sink, err.code(), &err.public_message(), 1011).await;
            machine.close();
            return;
        }
    };

    let (tx, rx) = mpsc::channel(state.realtime.outbound_queue_size.max(1));
    let (handle, close_rx) = ConnectionHandle::new(user_id.clone(), scope, tx);
    let handle = Arc::new(handle);

    let registration_id = match state.registry.register_with_chats(handle.clone(), &chats) {
        Ok(id) => id,
        Err(err) => {
            reject(&mut sink, err.code(), &err.to_string(), err.close_code()).await;
            machine.close();
            return;
        }
    };

    if let Err(err) = settle_directory(&state, &user_id, epoch).await {
        error!(%user_id, error = %err, "failed to refresh chat membership");
        state.registry.unregister(registration_id);
        reject(&mut sink, err.code(), &err.public_message(), 1011).await;
        machine.close();
        return;
    }

    if let Err(err) = machine.transition(SessionState::Active) {
        error!(error = %err, "session state machine rejected activation");
        state.registry.unregister(registration_id);
        machine.close();
        return;
    }

    let connection = Connection {
        state: state.clone(),
        handle: handle.clone(),
    };
    connection.reply(ServerEvent::ConnectionAck {
        registration_id: registration_id.to_string(),
        user_id: user_id.clone(),
    });

    let writer = tokio::spawn(write_loop(
        sink,
        rx,
        close_rx.clone(),
        state.realtime.heartbeat_interval(),
        state.realtime.drain_timeout(),
    ));

    let reason = connection.read_loop(&mut stream, close_rx).await;

    let _ = machine.transition(SessionState::Closing);
    state.registry.unregister(registration_id);
    handle.close(reason);
    drop(connection);
    drop(handle);

    let grace = state.realtime.drain_timeout() + Duration::from_millis(500);
    if tokio::time::timeout(grace, writer).await.is_err() {
        warn!(%registration_id, "writer did not finish draining in time");
    }

    machine.close();
    info!(%registration_id, %user_id, reason = reason.as_str(), "connection closed");
}

/// Resolve the user from the upgrade request's token or the first frame.
async fn authenticate(
    state: &GatewayState,
    token: Option<String>,
    stream: &mut Stream,
) -> Result<String, SessionError> {
    let token = match token {
        Some(token) => token,
        None => first_frame_token(stream, state.realtime.handshake_timeout()).await?,
    };

    state
        .validator
        .validate_token(&token)
        .map_err(|err| SessionError::Handshake(err.to_string()))
}

async fn first_frame_token(stream: &mut Stream, timeout: Duration) -> Result<String, SessionError> {
    let next = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| SessionError::Handshake("no credentials before handshake timeout".into()))?;

    match next {
        Some(Ok(Message::Text(text))) => match ClientFrame::parse(&text) {
            Ok(ClientFrame::Authenticate { token }) => Ok(token),
            _ => Err(SessionError::Handshake("expected an authenticate frame".into())),
        },
        Some(Ok(_)) => Err(SessionError::Handshake("expected an authenticate frame".into())),
        Some(Err(err)) => Err(SessionError::Transport(err.to_string())),
        None => Err(SessionError::Transport("connection closed during handshake".into())),
    }
}

async fn load_chat_ids(state: &GatewayState, user_id: &str) -> Result<Vec<String>, ChatError> {
    tokio::time::timeout(
        state.realtime.request_timeout(),
        state.participants.chat_ids_for_user(user_id),
    )
    .await
    .map_err(|_| ChatError::Timeout {
        after_ms: state.realtime.request_timeout_ms,
    })?
    .map_err(ChatError::from)
}

/// Re-read the user's chats until a read completes without a membership
/// change landing in the directory meanwhile. A change that lands later is
/// applied on top of what the read saw.
async fn settle_directory(state: &GatewayState, user_id: &str, mut epoch: u64) -> Result<(), ChatError> {
    for _ in 0..DIRECTORY_PASSES {
        let current = state.registry.membership_epoch();
        if current == epoch {
            debug!(user_id, "participant directory settled");
            return Ok(());
        }
        epoch = current;

        let chats = load_chat_ids(state, user_id).await?;
        let evicted = state.registry.reconcile_user(user_id, &chats);
        debug!(user_id, chats = chats.len(), evicted, "reconciled participant directory");
    }

    warn!(user_id, "membership kept changing while connecting");
    Ok(())
}

/// Send an error event and close before the session is registered.
async fn reject(sink: &mut Sink, code: &str, message: &str, close_code: u16) {
    let event = ServerEvent::Error {
        code: code.to_string(),
        message: message.to_string(),
        temp_id: None,
    };
    if let Ok(frame) = event.to_frame() {
        let _ = sink.send(Message::Text(frame)).await;
    }
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: Cow::Owned(code.to_string()),
        })))
        .await;
}

async fn write_loop(
    mut sink: Sink,
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut close_rx: watch::Receiver<Option<CloseReason>>,
    heartbeat: Duration,
    drain_timeout: Duration,
) {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    let reason = loop {
        tokio::select! {
            biased;
            changed = close_rx.changed() => {
                let reason = match changed {
                    Ok(()) => *close_rx.borrow(),
                    Err(_) => None,
                };
                break reason.unwrap_or(CloseReason::Shutdown);
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
                None => break (*close_rx.borrow()).unwrap_or(CloseReason::ClientClosed),
            },
            _ = ticker.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    };

    // Flush what was queued before the close, bounded by the drain timeout.
    let drain = async {
        while let Ok(frame) = rx.try_recv() {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(drain_timeout, drain).await;

    if reason != CloseReason::TransportError {
        let _ = sink
            .send(Message::Close(Some(CloseFrame {
                code: reason.close_code(),
                reason: Cow::Borrowed(reason.as_str()),
            })))
            .await;
    }
    let _ = sink.close().await;
}

struct Connection {
    state: Arc<GatewayState>,
    handle: Arc<ConnectionHandle>,
}

impl Connection {
    fn id(&self) -> RegistrationId {
        self.handle.registration_id
    }

    fn user_id(&self) -> &str {
        &self.handle.user_id
    }

    async fn read_loop(
        &self,
        stream: &mut Stream,
        mut close_rx: watch::Receiver<Option<CloseReason>>,
    ) -> CloseReason {
        let client_timeout = self.state.realtime.client_timeout();

        loop {
            tokio::select! {
                changed = close_rx.changed() => {
                    let reason = match changed {
                        Ok(()) => *close_rx.borrow(),
                        Err(_) => None,
                    };
                    return reason.unwrap_or(CloseReason::Shutdown);
                }
                next = tokio::time::timeout(client_timeout, stream.next()) => {
                    let message = match next {
                        Err(_) => {
                            let err = SessionError::HeartbeatTimeout(client_timeout);
                            info!(registration_id = %self.id(), error = %err, "closing idle connection");
                            return CloseReason::Idle;
                        }
                        Ok(None) => return CloseReason::ClientClosed,
                        Ok(Some(Err(err))) => {
                            debug!(registration_id = %self.id(), error = %err, "websocket receive failed");
                            return CloseReason::TransportError;
                        }
                        Ok(Some(Ok(message))) => message,
                    };

                    self.state.registry.touch(self.id());

                    match message {
                        Message::Text(text) => self.handle_text(&text).await,
                        Message::Binary(_) => {
                            self.fail("invalid_frame", "Binary frames are not supported", None)
                        }
                        Message::Close(_) => return CloseReason::ClientClosed,
                        Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let max = self.state.realtime.max_frame_bytes;
        if text.len() > max {
            self.fail("frame_too_large", &format!("Frames are limited to {max} bytes"), None);
            return;
        }

        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(registration_id = %self.id(), error = %err, "undecodable frame");
                self.fail("invalid_frame", "Frame could not be decoded", None);
                return;
            }
        };

        if let (ChatScope::Chat(scoped), Some(chat_id)) = (&self.handle.scope, frame.chat_id()) {
            if scoped != chat_id {
                self.fail("invalid_scope", "Connection is scoped to another chat", frame.temp_id());
                return;
            }
        }

        debug!(registration_id = %self.id(), frame = frame.name(), "frame received");
        let temp_id = frame.temp_id().map(str::to_string);

        if let Err(err) = self.dispatch(frame).await {
            match err.kind() {
                ErrorKind::Internal => {
                    error!(registration_id = %self.id(), error = %err, "request failed")
                }
                ErrorKind::TransientStore => {
                    warn!(registration_id = %self.id(), error = %err, "request failed")
                }
                _ => debug!(registration_id = %self.id(), error = %err, "request rejected"),
            }
            self.fail(err.code(), &err.public_message(), temp_id.as_deref());
        }
    }

    async fn dispatch(&self, frame: ClientFrame) -> Result<(), ChatError> {
        let pipeline = &self.state.pipeline;
        let user_id = self.user_id();

        match frame {
            ClientFrame::Authenticate { .. } => {
                self.fail("invalid_frame", "Connection is already authenticated", None);
            }
            ClientFrame::SendMessage {
                chat_id,
                temp_id,
                content,
                media_ref,
                reply_to,
            } => {
                pipeline
                    .send(SendMessage {
                        chat_id,
                        sender_id: user_id.to_string(),
                        content,
                        media_ref,
                        reply_to,
                        temp_id,
                    })
                    .await?;
            }
            ClientFrame::UnsendMessage { chat_id, message_id } => {
                pipeline.unsend(&chat_id, &message_id, user_id).await?;
            }
            ClientFrame::DeleteMessage {
                chat_id,
                message_id,
                scope,
            } => {
                pipeline.delete(&chat_id, &message_id, user_id, scope).await?;
                if scope == DeleteScope::ForSelf {
                    // Only the requester learns about a personal delete.
                    self.reply(ServerEvent::MessageDeleted {
                        chat_id,
                        message_id,
                        scope,
                    });
                }
            }
            ClientFrame::EditMessage {
                chat_id,
                message_id,
                content,
            } => {
                pipeline.edit(&chat_id, &message_id, user_id, &content).await?;
            }
            ClientFrame::MarkRead { chat_id, message_id } => {
                pipeline.mark_read(&chat_id, &message_id, user_id).await?;
            }
            ClientFrame::Typing { chat_id } => {
                pipeline.typing(&chat_id, user_id).await?;
            }
            ClientFrame::Ping => self.reply(ServerEvent::Pong),
        }

        Ok(())
    }

    /// Queue an event for this connection only.
    fn reply(&self, event: ServerEvent) {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = %err, "failed to serialize reply");
                return;
            }
        };

        match self.handle.try_send(frame.into()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.state.registry.evict(self.id(), CloseReason::SlowConsumer);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn fail(&self, code: &str, message: &str, temp_id: Option<&str>) {
        self.reply(ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
            temp_id: temp_id.map(str::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut machine = SessionMachine::new();
        for next in [
            SessionState::Authenticated,
            SessionState::Active,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.state(), SessionState::Closed);
    }

    #[test]
    fn test_failed_handshake_can_close() {
        let mut machine = SessionMachine::new();
        machine.transition(SessionState::Closing).unwrap();
        machine.transition(SessionState::Closed).unwrap();
    }

    #[test]
    fn test_every_exit_ends_closed() {
        // Auth failure, store failure after auth, and a normal shutdown.
        let rejected = SessionMachine::new();
        let mut authenticated = SessionMachine::new();
        authenticated.transition(SessionState::Authenticated).unwrap();
        let mut active = SessionMachine::new();
        active.transition(SessionState::Authenticated).unwrap();
        active.transition(SessionState::Active).unwrap();
        active.transition(SessionState::Closing).unwrap();

        for mut machine in [rejected, authenticated, active] {
            machine.close();
            assert_eq!(machine.state(), SessionState::Closed);
            machine.close();
            assert_eq!(machine.state(), SessionState::Closed);
        }
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut machine = SessionMachine::new();
        assert!(machine.transition(SessionState::Active).is_err());
        assert_eq!(machine.state(), SessionState::Connecting);

        machine.transition(SessionState::Authenticated).unwrap();
        assert!(machine.transition(SessionState::Connecting).is_err());

        machine.transition(SessionState::Active).unwrap();
        machine.transition(SessionState::Closing).unwrap();
        machine.transition(SessionState::Closed).unwrap();
        assert!(matches!(
            machine.transition(SessionState::Active),
            Err(SessionError::IllegalTransition { .. })
        ));
    }
}
