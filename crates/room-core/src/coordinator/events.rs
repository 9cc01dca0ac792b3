//! Coordinator events delivered to the UI layer

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ConnectFailureReason;
use crate::types::{Participant, ParticipantSid, TrackDescriptor, TrackId};

/// Why a session (or a connect attempt) ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// `disconnect()` was called on a connected session
    ClientInitiated,
    /// The connect attempt never produced a session
    ConnectFailed(ConnectFailureReason),
    /// The transport ended the session
    Transport(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::ClientInitiated => f.write_str("client initiated"),
            DisconnectReason::ConnectFailed(reason) => write!(f, "connect failed: {}", reason),
            DisconnectReason::Transport(reason) => write!(f, "transport: {}", reason),
        }
    }
}

/// Events published through [`SessionCoordinator::subscribe`](super::SessionCoordinator::subscribe)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CoordinatorEvent {
    /// A remote participant joined (or was present when we connected)
    ParticipantJoined { participant: Participant },

    /// A remote participant left; `participant` is its last snapshot
    ParticipantLeft { participant: Participant },

    /// We are now subscribed to a remote track
    TrackSubscribed {
        sid: ParticipantSid,
        descriptor: TrackDescriptor,
    },

    /// A subscription ended (unsubscribed, unpublished or owner left)
    TrackUnsubscribed { sid: ParticipantSid, track_id: TrackId },

    /// The session or connect attempt ended; emitted once per attempt
    Disconnected { reason: DisconnectReason },
}

impl CoordinatorEvent {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, CoordinatorEvent::Disconnected { .. })
    }
}
