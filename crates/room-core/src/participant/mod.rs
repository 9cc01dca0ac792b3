//! Room membership
//!
//! [`ParticipantRegistry`] owns the set of present remote participants and
//! cascades departures into the [`TrackRegistry`](crate::track::TrackRegistry).

mod registry;

pub use registry::{Departure, ParticipantIter, ParticipantList, ParticipantRegistry, RegistryStats};
