//! Error types for room-core
//!
//! Only connect/disconnect failures and state conflicts ever reach a caller.
//! Decode failures and events about unknown participants or tracks are
//! recovered where they happen and only logged, so the transport can keep
//! delivering events for everybody else.

use thiserror::Error;

use crate::config::ConfigError;
use crate::pointer::ProtocolDecodeError;
use crate::types::{ParticipantSid, TrackId};

/// Result type for room-core operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by the session coordinator and its collaborators
#[derive(Debug, Error)]
pub enum SessionError {
    /// A connect attempt did not produce an installed session
    #[error("Connect failed: {reason}")]
    ConnectFailure { reason: ConnectFailureReason },

    /// The requested operation conflicts with the current coordinator state
    #[error("State conflict: {0}")]
    StateConflict(#[from] StateConflict),

    /// The credential provider could not supply a token
    #[error("Token unavailable: {message}")]
    TokenUnavailable { message: String },

    /// An operation required a connected session
    #[error("Not connected")]
    NotConnected,

    /// Malformed pointer payload
    #[error("Protocol decode error: {0}")]
    ProtocolDecode(#[from] ProtocolDecodeError),

    /// Event referenced a participant or track that is not known
    #[error("Unknown entity: {0}")]
    UnknownEntity(#[from] UnknownEntity),

    /// The media transport reported an error
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Create a connect failure with the given reason
    pub fn connect_failure(reason: ConnectFailureReason) -> Self {
        Self::ConnectFailure { reason }
    }

    /// Create a token unavailable error
    pub fn token_unavailable(message: impl Into<String>) -> Self {
        Self::TokenUnavailable {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The connect failure reason, if this is a connect failure
    pub fn connect_reason(&self) -> Option<&ConnectFailureReason> {
        match self {
            Self::ConnectFailure { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Why a connect attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ConnectFailureReason {
    #[error("token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("local media unavailable: {0}")]
    LocalMediaUnavailable(String),

    #[error("transport rejected the session: {0}")]
    TransportRejected(String),

    #[error("timed out after {0} seconds")]
    TimedOut(u64),

    #[error("cancelled")]
    Cancelled,
}

/// Rejected operation because of the coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateConflict {
    #[error("a connect attempt is already in progress")]
    AlreadyConnecting,

    #[error("already connected")]
    AlreadyConnected,

    #[error("a disconnect is in progress")]
    Disconnecting,
}

/// Event referencing an entity the registries have not seen
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownEntity {
    #[error("participant {0}")]
    Participant(ParticipantSid),

    #[error("track {track_id} of participant {sid}")]
    Track { sid: ParticipantSid, track_id: TrackId },
}
