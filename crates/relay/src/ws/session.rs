// One client connection, from a verified token to close.
//
// Connecting -> Authenticated happens in `ConnectionSession::connect`; a
// failure there never produces a session. After that the loop alternates
// Receiving <-> Processing until any error or a client close moves it to
// Closed. Nothing in a session is shared with other sessions.

use axum::extract::ws::{close_code, CloseFrame, Message as Frame, Utf8Bytes, WebSocket};
use chrono::Utc;
use courier_common::{
    protocol::ws::MESSAGE_SEQUENCE,
    types::{Message, MessageInvariantError},
};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::auth::jwt::{AuthError, IdentityClaims};
use crate::context::RelayContext;
use crate::store::StoreError;
use crate::validation::{check_ws_frame_size, validate, ValidationError};
use crate::ws::protocol::{encode_echo, EchoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Receiving,
    Processing,
    Closed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to read frame: {0}")]
    Read(#[source] axum::Error),
    #[error("failed to write frame: {0}")]
    Write(#[source] axum::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    FrameTooLarge(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("message rejected: {0}")]
    Invariant(#[from] MessageInvariantError),
    #[error("failed to allocate message id: {0}")]
    Sequence(#[source] StoreError),
    #[error("failed to persist message {id}: {source}")]
    Persist {
        id: i64,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Echo(#[from] EchoError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("session is closed")]
    Closed,
}

impl SessionError {
    /// Close frame sent to the client, if the channel is still usable.
    fn close_frame(&self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::FrameTooLarge(_) => (close_code::SIZE, "frame too large"),
            Self::Validation(_) | Self::Invariant(_) => (close_code::POLICY, "invalid message"),
            Self::Sequence(_) | Self::Persist { .. } | Self::Echo(_) => {
                (close_code::ERROR, "message could not be stored")
            }
            Self::Channel(_) | Self::Closed => return None,
        };

        Some(CloseFrame { code, reason: Utf8Bytes::from_static(reason) })
    }
}

/// Result of one successful receive cycle.
#[derive(Debug, Clone)]
pub struct Processed {
    pub message: Message,
    pub echo: String,
}

pub struct ConnectionSession {
    context: RelayContext,
    claims: IdentityClaims,
    state: SessionState,
    stored: u64,
}

impl ConnectionSession {
    /// Verify `token` and open a session for its subject.
    pub fn connect(context: RelayContext, token: Option<&str>) -> Result<Self, AuthError> {
        let claims = context.authenticator.authenticate(token.unwrap_or_default())?;
        Ok(Self::new(context, claims))
    }

    pub fn new(context: RelayContext, claims: IdentityClaims) -> Self {
        Self { context, claims, state: SessionState::Authenticated, stored: 0 }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn claims(&self) -> &IdentityClaims {
        &self.claims
    }

    pub fn stored_count(&self) -> u64 {
        self.stored
    }

    /// Validate, stamp, sequence and persist one inbound payload.
    ///
    /// Any error leaves the session `Closed`; callers must stop reading.
    pub async fn process_payload(&mut self, raw: &[u8]) -> Result<Processed, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        self.state = SessionState::Processing;
        match self.ingest(raw).await {
            Ok(processed) => {
                self.stored += 1;
                self.state = SessionState::Receiving;
                Ok(processed)
            }
            Err(error) => {
                self.state = SessionState::Closed;
                Err(error)
            }
        }
    }

    async fn ingest(&self, raw: &[u8]) -> Result<Processed, SessionError> {
        check_ws_frame_size(raw).map_err(SessionError::FrameTooLarge)?;

        let mut message = validate(raw)?;
        message.sender_id = self.claims.subject_id;
        message.timestamp = Utc::now().timestamp();
        message.ensure_persistable()?;

        // The id is spent from here on, even if the insert below fails.
        message.id =
            self.context.sequences.next(MESSAGE_SEQUENCE).await.map_err(SessionError::Sequence)?;
        self.context
            .messages
            .insert(&message)
            .await
            .map_err(|source| SessionError::Persist { id: message.id, source })?;

        let echo = encode_echo(self.context.echo_mode, raw, &message)?;
        Ok(Processed { message, echo })
    }

    pub async fn run(mut self, mut socket: WebSocket, request_id: String) {
        let span = info_span!(
            "relay.ws.session",
            subject_id = self.claims.subject_id,
            request_id = %request_id
        );

        async move {
            info!(level = %self.claims.level, "session opened");

            let outcome = self.receive_loop(&mut socket).await;
            self.state = SessionState::Closed;

            match outcome {
                Ok(()) => info!(stored = self.stored, "session closed by client"),
                Err(SessionError::Channel(error)) => {
                    info!(stored = self.stored, error = %error, "session channel closed");
                }
                Err(error) => {
                    warn!(stored = self.stored, error = %error, "session terminated");
                    if let Some(frame) = error.close_frame() {
                        if let Err(send_error) = socket.send(Frame::Close(Some(frame))).await {
                            debug!(error = %send_error, "failed to send close frame");
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn receive_loop(&mut self, socket: &mut WebSocket) -> Result<(), SessionError> {
        self.state = SessionState::Receiving;

        while let Some(frame) = socket.recv().await {
            let processed = match frame.map_err(ChannelError::Read)? {
                Frame::Text(text) => self.process_payload(text.as_str().as_bytes()).await?,
                Frame::Binary(data) => self.process_payload(&data).await?,
                Frame::Ping(payload) => {
                    socket.send(Frame::Pong(payload)).await.map_err(ChannelError::Write)?;
                    continue;
                }
                Frame::Pong(_) => continue,
                Frame::Close(_) => return Ok(()),
            };

            debug!(
                message_id = processed.message.id,
                recipient_id = processed.message.recipient_id,
                "message stored"
            );

            socket.send(Frame::Text(processed.echo.into())).await.map_err(ChannelError::Write)?;
        }

        Ok(())
    }
}
