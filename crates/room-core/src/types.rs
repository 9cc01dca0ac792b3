//! Core data model shared by the registries, the pointer protocol and the
//! coordinator.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Participant identity, supplied at connect time and unique within a session
    Identity
);

string_id!(
    /// Session-scoped participant id assigned by the transport
    ParticipantSid
);

string_id!(
    /// Track id, unique per owning participant
    TrackId
);

string_id!(
    /// Opaque render target understood by the rendering collaborator
    Surface
);

impl Surface {
    /// Media surface for a remote participant's audio/video
    pub fn participant(sid: &ParticipantSid) -> Self {
        Self(format!("participant:{}", sid))
    }
}

/// Kind of a published track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
    Data,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Video => f.write_str("video"),
            TrackKind::Data => f.write_str("data"),
        }
    }
}

/// Description of a track independent of any live handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub kind: TrackKind,
    pub id: TrackId,
}

impl TrackDescriptor {
    pub fn new(kind: TrackKind, id: impl Into<TrackId>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn audio(id: impl Into<TrackId>) -> Self {
        Self::new(TrackKind::Audio, id)
    }

    pub fn video(id: impl Into<TrackId>) -> Self {
        Self::new(TrackKind::Video, id)
    }

    pub fn data(id: impl Into<TrackId>) -> Self {
        Self::new(TrackKind::Data, id)
    }
}

/// Subscription signal reported by the transport for a publication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionSignal {
    Subscribe,
    Unsubscribe,
}

/// Publication lifecycle of a remote track
///
/// `Subscribed` and `Unsubscribed` may alternate while the publication is
/// live. `Unpublished` is terminal; the registry drops the entry afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackPublicationState {
    Published,
    Subscribed,
    Unsubscribed,
    Unpublished,
}

impl TrackPublicationState {
    /// Apply a subscription signal, returning the new state if the signal
    /// is a valid transition from `self`.
    pub fn apply(self, signal: SubscriptionSignal) -> Option<Self> {
        use SubscriptionSignal::*;
        use TrackPublicationState::*;

        match (self, signal) {
            (Published, Subscribe) | (Unsubscribed, Subscribe) => Some(Subscribed),
            (Subscribed, Unsubscribe) => Some(Unsubscribed),
            (Subscribed, Subscribe)
            | (Published, Unsubscribe)
            | (Unsubscribed, Unsubscribe)
            | (Unpublished, _) => None,
        }
    }

    pub fn is_subscribed(self) -> bool {
        self == TrackPublicationState::Subscribed
    }
}

/// Observable state of a session / coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the UI layer asks to join with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub display_name: String,
    pub identity: Identity,
    pub tracks: Vec<TrackDescriptor>,
}

impl SessionConfig {
    pub fn new(identity: impl Into<Identity>, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            identity: identity.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, descriptor: TrackDescriptor) -> Self {
        self.tracks.push(descriptor);
        self
    }

    /// First data track in the configuration, used for pointer broadcast
    pub fn data_track(&self) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Data)
    }
}

/// Snapshot of a present participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: Identity,
    pub sid: ParticipantSid,
    pub tracks: IndexMap<TrackId, TrackPublicationState>,
}

impl Participant {
    pub fn new(identity: impl Into<Identity>, sid: impl Into<ParticipantSid>) -> Self {
        Self {
            identity: identity.into(),
            sid: sid.into(),
            tracks: IndexMap::new(),
        }
    }
}

/// Pointer state received from (or produced by) a data track sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub pressed: bool,
    pub x: f64,
    pub y: f64,
    pub sender_track_id: TrackId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionSignal::*;
    use TrackPublicationState::*;

    #[test]
    fn test_subscription_transitions() {
        assert_eq!(Published.apply(Subscribe), Some(Subscribed));
        assert_eq!(Subscribed.apply(Unsubscribe), Some(Unsubscribed));
        assert_eq!(Unsubscribed.apply(Subscribe), Some(Subscribed));

        assert_eq!(Published.apply(Unsubscribe), None);
        assert_eq!(Subscribed.apply(Subscribe), None);
        assert_eq!(Unpublished.apply(Subscribe), None);
    }

    #[test]
    fn test_session_config_data_track() {
        let config = SessionConfig::new("alice", "Alice")
            .with_track(TrackDescriptor::audio("mic"))
            .with_track(TrackDescriptor::data("cursor"));

        assert_eq!(config.data_track().map(|t| t.id.as_str()), Some("cursor"));
        assert_eq!(config.identity, Identity::from("alice"));
    }

    #[test]
    fn test_participant_serde_keeps_publication_order() {
        let mut participant = Participant::new("bob", "PA_bob");
        participant.tracks.insert(TrackId::from("cam"), Subscribed);
        participant.tracks.insert(TrackId::from("cursor"), Published);

        let json = serde_json::to_string(&participant).unwrap();
        assert_eq!(
            json,
            r#"{"identity":"bob","sid":"PA_bob","tracks":{"cam":"Subscribed","cursor":"Published"}}"#
        );

        let back: Participant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, participant);
        assert_eq!(
            back.tracks.keys().map(TrackId::as_str).collect::<Vec<_>>(),
            vec!["cam", "cursor"]
        );
    }

    #[test]
    fn test_track_kind_serde() {
        let json = serde_json::to_string(&TrackDescriptor::video("cam")).unwrap();
        assert_eq!(json, r#"{"kind":"video","id":"cam"}"#);
    }
}
