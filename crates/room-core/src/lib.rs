//! # Huddle Room Core - Room Session Coordination
//!
//! This crate keeps a client's view of a multi-party real-time room
//! consistent while participants join, publish, subscribe and leave, and
//! carries a small pointer-drawing protocol over data tracks.
//!
//! - **coordinator**: connect/disconnect state machine owning one session
//! - **participant**: membership registry of remote participants
//! - **track**: publication state machine for remote tracks
//! - **pointer**: pointer broadcast encoding, colours and rendering glue
//! - **transport**: the media transport seam plus an in-memory room
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huddle_room_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let room = MemoryRoom::new("huddle");
//!     let coordinator = SessionCoordinatorBuilder::new()
//!         .with_room("huddle")
//!         .with_transport(Arc::new(room))
//!         .with_credentials(Arc::new(StaticCredentialProvider::new("dev-token")))
//!         .build()?;
//!
//!     let _events = coordinator.subscribe(|event| {
//!         println!("{:?}", event);
//!         Ok(())
//!     });
//!
//!     let config = SessionConfig::new("alice", "Alice")
//!         .with_track(TrackDescriptor::data("alice-pointer"));
//!     let session = coordinator.connect(config).await?;
//!     println!("joined {} with {} others", session.room_name(), session.participant_count());
//!
//!     coordinator.send_pointer(true, 10.0, 20.0)?;
//!     coordinator.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Transport events for a session are applied one at a time in arrival
//! order. Renderer calls are never made while a registry lock is held, and
//! UI handlers registered with `subscribe` may call back into the
//! coordinator's read accessors.

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod errors;
pub mod logging;
pub mod participant;
pub mod pointer;
pub mod render;
pub mod track;
pub mod transport;
pub mod types;

// Re-export main types
pub use channel::{EventChannel, Subscription};
pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{
    CoordinatorEvent, DisconnectReason, SessionCoordinator, SessionCoordinatorBuilder,
    SessionHandle,
};
pub use credentials::{CredentialProvider, HttpCredentialProvider, StaticCredentialProvider};
pub use errors::{ConnectFailureReason, Result, SessionError, StateConflict, UnknownEntity};
pub use logging::{setup_logging, LoggingConfig};
pub use participant::{ParticipantList, ParticipantRegistry, RegistryStats};
pub use pointer::{color_for, Color, PointerBroadcast, PointerPayload};
pub use render::{NullRenderer, Renderer};
pub use track::{DataTrack, MediaTrack, Track, TrackRegistry};
pub use transport::{MediaTransport, MemoryRoom, TransportEvent, TransportSession};
pub use types::{
    Identity, Participant, ParticipantSid, PointerEvent, SessionConfig, SessionState, Surface,
    TrackDescriptor, TrackId, TrackKind, TrackPublicationState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{
        CoordinatorEvent, DisconnectReason, SessionCoordinator, SessionCoordinatorBuilder,
        SessionHandle,
    };
    pub use crate::credentials::{
        CredentialProvider, HttpCredentialProvider, StaticCredentialProvider,
    };
    pub use crate::errors::{ConnectFailureReason, Result, SessionError};
    pub use crate::render::{NullRenderer, Renderer};
    pub use crate::track::{DataTrack, Track};
    pub use crate::transport::{MediaTransport, MemoryRoom};
    pub use crate::types::{
        Identity, Participant, ParticipantSid, SessionConfig, SessionState, Surface,
        TrackDescriptor, TrackId, TrackKind,
    };
}
