//! Session coordinator
//!
//! The top-level state machine of the crate. It ties the transport, the
//! credential provider and the renderer together and owns the participant
//! and track registries of the current session.

// Module declarations
mod builder;
mod coordinator;
mod event_handler;
pub mod events;
mod session;

// Re-exports
pub use builder::SessionCoordinatorBuilder;
pub use coordinator::SessionCoordinator;
pub use events::{CoordinatorEvent, DisconnectReason};
pub use session::SessionHandle;
