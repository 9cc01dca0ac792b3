//! Media transport abstraction
//!
//! Room-core does not capture media, negotiate codecs or move packets. A
//! [`MediaTransport`] acquires local tracks, establishes sessions and then
//! reports what happens in the room as [`TransportEvent`]s. Data-track
//! payloads do not go through the event stream; they travel on the
//! [`DataTrack`](crate::track::DataTrack) handles themselves.
//!
//! [`MemoryRoom`] is an in-process implementation that connects several
//! coordinators to each other.

pub mod memory;

pub use memory::MemoryRoom;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::track::Track;
use crate::types::{Identity, ParticipantSid, SessionConfig, TrackDescriptor, TrackId};

/// Provider of local media and room sessions
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Acquire the local tracks described by `config`
    ///
    /// Either every track is acquired or none is: on error nothing needs to
    /// be released.
    async fn acquire_local_tracks(&self, config: &SessionConfig) -> Result<Vec<Track>>;

    /// Give back tracks obtained from [`acquire_local_tracks`](Self::acquire_local_tracks)
    async fn release_local_tracks(&self, tracks: Vec<Track>);

    /// Join a room, publishing `options.tracks`
    ///
    /// The returned future may be dropped before completion; a session that
    /// is produced but not wanted any more is disconnected by the caller.
    async fn connect_session(
        &self,
        token: String,
        options: ConnectOptions,
    ) -> Result<TransportConnection>;
}

/// Handle to an established transport session
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Leave the room; the event stream ends afterwards
    async fn disconnect(&self) -> Result<()>;
}

/// Parameters for [`MediaTransport::connect_session`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub room_name: String,
    pub identity: Identity,
    pub display_name: String,
    /// Local tracks to publish once joined
    pub tracks: Vec<Track>,
}

/// A remote publication as seen at join time
#[derive(Debug, Clone)]
pub struct PublicationSnapshot {
    pub descriptor: TrackDescriptor,
    /// Set when the local side is already subscribed
    pub subscribed: Option<Track>,
}

/// A participant already present at join time
#[derive(Debug, Clone)]
pub struct RemoteParticipantSnapshot {
    pub identity: Identity,
    pub sid: ParticipantSid,
    pub publications: Vec<PublicationSnapshot>,
}

/// Successful result of [`MediaTransport::connect_session`]
pub struct TransportConnection {
    pub session: Arc<dyn TransportSession>,
    pub room_name: String,
    pub local_sid: ParticipantSid,
    /// Room contents at join time, in join order
    pub snapshot: Vec<RemoteParticipantSnapshot>,
    /// Live room events; closing the stream ends the session
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl std::fmt::Debug for TransportConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConnection")
            .field("room_name", &self.room_name)
            .field("local_sid", &self.local_sid)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Room event reported by the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    ParticipantConnected {
        identity: Identity,
        sid: ParticipantSid,
    },
    ParticipantDisconnected {
        sid: ParticipantSid,
    },
    TrackPublished {
        sid: ParticipantSid,
        descriptor: TrackDescriptor,
    },
    TrackSubscribed {
        sid: ParticipantSid,
        track: Track,
    },
    TrackUnsubscribed {
        sid: ParticipantSid,
        track_id: TrackId,
    },
    TrackUnpublished {
        sid: ParticipantSid,
        descriptor: TrackDescriptor,
    },
    /// The transport ended the session on its own
    Disconnected {
        reason: String,
    },
}

impl TransportEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::ParticipantConnected { .. } => "participant_connected",
            TransportEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            TransportEvent::TrackPublished { .. } => "track_published",
            TransportEvent::TrackSubscribed { .. } => "track_subscribed",
            TransportEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            TransportEvent::TrackUnpublished { .. } => "track_unpublished",
            TransportEvent::Disconnected { .. } => "disconnected",
        }
    }
}
