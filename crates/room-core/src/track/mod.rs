//! Track handles and the track publication registry
//!
//! - [`Track`] - live handle for a local or subscribed remote track
//! - [`DataTrack`] - data track with a send side and a received-message event
//! - [`TrackRegistry`] - publication state machine for remote tracks

mod registry;

pub use registry::{Transition, TrackRegistry};

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::channel::{EventChannel, Subscription};
use crate::types::{TrackDescriptor, TrackId, TrackKind};

/// Audio or video track handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    descriptor: TrackDescriptor,
}

impl MediaTrack {
    pub fn audio(id: impl Into<TrackId>) -> Self {
        Self {
            descriptor: TrackDescriptor::audio(id),
        }
    }

    pub fn video(id: impl Into<TrackId>) -> Self {
        Self {
            descriptor: TrackDescriptor::video(id),
        }
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.descriptor
    }
}

struct DataTrackInner {
    descriptor: TrackDescriptor,
    /// Payloads arriving from the remote side
    inbound: EventChannel<Bytes>,
    /// Payloads the local side sends
    outbound: EventChannel<Bytes>,
}

/// Data track handle
///
/// The application side uses [`send`](Self::send) and
/// [`on_message`](Self::on_message). The transport side uses
/// [`on_send`](Self::on_send) to pick up outgoing payloads and
/// [`deliver`](Self::deliver) to hand over received ones.
#[derive(Clone)]
pub struct DataTrack {
    inner: Arc<DataTrackInner>,
}

impl DataTrack {
    pub fn new(id: impl Into<TrackId>) -> Self {
        let descriptor = TrackDescriptor::data(id);
        Self {
            inner: Arc::new(DataTrackInner {
                inbound: EventChannel::new(format!("data:{}:in", descriptor.id)),
                outbound: EventChannel::new(format!("data:{}:out", descriptor.id)),
                descriptor,
            }),
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.inner.descriptor.id
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        &self.inner.descriptor
    }

    /// Send a payload to whoever carries this track; returns the number of
    /// carriers reached (0 means nobody was listening and it was dropped)
    pub fn send(&self, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let len = payload.len();
        let reached = self.inner.outbound.publish(payload);
        if reached == 0 {
            debug!("Data track '{}' has no carrier, dropped {} bytes", self.id(), len);
        }
        reached
    }

    /// Register a handler for received payloads
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Bytes) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.inbound.subscribe(handler)
    }

    /// Hand a received payload to the message handlers
    pub fn deliver(&self, payload: impl Into<Bytes>) -> usize {
        self.inner.inbound.publish(payload.into())
    }

    /// Register the transport side that carries outgoing payloads
    pub fn on_send<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Bytes) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.outbound.subscribe(handler)
    }

    pub fn message_handler_count(&self) -> usize {
        self.inner.inbound.subscriber_count()
    }

    /// True if both handles refer to the same underlying track
    pub fn same_track(&self, other: &DataTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DataTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTrack")
            .field("id", self.id())
            .field("message_handlers", &self.inner.inbound.subscriber_count())
            .field("carriers", &self.inner.outbound.subscriber_count())
            .finish()
    }
}

/// Live track handle, one variant per [`TrackKind`]
#[derive(Debug, Clone)]
pub enum Track {
    Audio(MediaTrack),
    Video(MediaTrack),
    Data(DataTrack),
}

impl Track {
    /// Create a fresh handle matching `descriptor`
    pub fn from_descriptor(descriptor: &TrackDescriptor) -> Self {
        match descriptor.kind {
            TrackKind::Audio => Track::Audio(MediaTrack::audio(descriptor.id.clone())),
            TrackKind::Video => Track::Video(MediaTrack::video(descriptor.id.clone())),
            TrackKind::Data => Track::Data(DataTrack::new(descriptor.id.clone())),
        }
    }

    pub fn descriptor(&self) -> &TrackDescriptor {
        match self {
            Track::Audio(t) | Track::Video(t) => t.descriptor(),
            Track::Data(t) => t.descriptor(),
        }
    }

    pub fn id(&self) -> &TrackId {
        &self.descriptor().id
    }

    pub fn kind(&self) -> TrackKind {
        self.descriptor().kind
    }

    pub fn as_data(&self) -> Option<&DataTrack> {
        match self {
            Track::Data(t) => Some(t),
            Track::Audio(_) | Track::Video(_) => None,
        }
    }
}
