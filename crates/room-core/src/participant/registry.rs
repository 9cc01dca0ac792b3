//! Participant Registry
//!
//! Stores the remote participants present in the current session in join
//! order. Track state is not duplicated here: snapshots read it from the
//! [`TrackRegistry`] at the moment they are produced.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::track::{TrackRegistry, Transition};
use crate::types::{Identity, Participant, ParticipantSid};

/// Result of a participant leaving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Snapshot taken just before removal
    pub participant: Participant,
    /// Publications removed along with the participant
    pub unpublished: Vec<Transition>,
}

/// Join/leave counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_joined: usize,
    pub total_left: usize,
    pub duplicate_joins: usize,
}

/// Registry of present remote participants
///
/// Owned by the session coordinator; everything else gets read access
/// through [`list`](Self::list) and [`get`](Self::get).
pub struct ParticipantRegistry {
    tracks: Arc<TrackRegistry>,
    present: RwLock<IndexMap<ParticipantSid, Identity>>,
    stats: RwLock<RegistryStats>,
}

impl ParticipantRegistry {
    pub fn new(tracks: Arc<TrackRegistry>) -> Self {
        Self {
            tracks,
            present: RwLock::new(IndexMap::new()),
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// The track registry departures cascade into
    pub fn tracks(&self) -> &Arc<TrackRegistry> {
        &self.tracks
    }

    /// Register a join
    ///
    /// Returns the new participant, or `None` (with a warning) if the sid is
    /// already present.
    pub fn on_join(&self, identity: Identity, sid: ParticipantSid) -> Option<Participant> {
        {
            let mut present = self.present.write();
            if let Some(existing) = present.get(&sid) {
                warn!(
                    "Participant {} already present as '{}', ignoring join of '{}'",
                    sid, existing, identity
                );
                self.stats.write().duplicate_joins += 1;
                return None;
            }
            present.insert(sid.clone(), identity.clone());
        }

        self.tracks.add_participant(&sid);
        self.stats.write().total_joined += 1;
        debug!("Participant '{}' joined as {}", identity, sid);

        Some(Participant::new(identity, sid))
    }

    /// Register a leave, removing the participant's publications too
    ///
    /// No-op returning `None` if `sid` is not present.
    pub fn on_leave(&self, sid: &ParticipantSid) -> Option<Departure> {
        let identity = self.present.write().shift_remove(sid)?;

        let mut participant = Participant::new(identity, sid.clone());
        participant.tracks = self.tracks.publications(sid).unwrap_or_default();
        let unpublished = self.tracks.remove_participant(sid);

        self.stats.write().total_left += 1;
        debug!(
            "Participant '{}' ({}) left, {} publications removed",
            participant.identity,
            sid,
            unpublished.len()
        );

        Some(Departure {
            participant,
            unpublished,
        })
    }

    /// Lazy, restartable view of present participants in join order
    pub fn list(&self) -> ParticipantList<'_> {
        ParticipantList { registry: self }
    }

    pub fn get(&self, sid: &ParticipantSid) -> Option<Participant> {
        let identity = self.present.read().get(sid).cloned()?;
        Some(self.snapshot(identity, sid.clone()))
    }

    pub fn contains(&self, sid: &ParticipantSid) -> bool {
        self.present.read().contains_key(sid)
    }

    /// Find a present participant by identity
    pub fn find_by_identity(&self, identity: &Identity) -> Option<Participant> {
        let sid = self
            .present
            .read()
            .iter()
            .find(|(_, i)| *i == identity)
            .map(|(sid, _)| sid.clone())?;
        self.get(&sid)
    }

    pub fn len(&self) -> usize {
        self.present.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.present.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        *self.stats.read()
    }

    /// Remove everybody, and every publication, without per-participant events
    pub fn clear(&self) -> Vec<Participant> {
        let drained: Vec<_> = self.present.write().drain(..).collect();
        let removed = drained
            .into_iter()
            .map(|(sid, identity)| self.snapshot(identity, sid))
            .collect();
        self.tracks.clear();
        removed
    }

    fn snapshot(&self, identity: Identity, sid: ParticipantSid) -> Participant {
        let tracks = self.tracks.publications(&sid).unwrap_or_default();
        Participant {
            identity,
            sid,
            tracks,
        }
    }

    fn entry_at(&self, index: usize) -> Option<(ParticipantSid, Identity)> {
        self.present
            .read()
            .get_index(index)
            .map(|(sid, identity)| (sid.clone(), identity.clone()))
    }
}

impl std::fmt::Debug for ParticipantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantRegistry")
            .field("present", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// View over the present participants
///
/// Nothing is read until iteration; every [`iter`](Self::iter) starts over
/// from the first participant still present.
#[derive(Clone, Copy)]
pub struct ParticipantList<'a> {
    registry: &'a ParticipantRegistry,
}

impl<'a> ParticipantList<'a> {
    pub fn iter(&self) -> ParticipantIter<'a> {
        ParticipantIter {
            registry: self.registry,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for ParticipantList<'a> {
    type Item = Participant;
    type IntoIter = ParticipantIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &ParticipantList<'a> {
    type Item = Participant;
    type IntoIter = ParticipantIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator produced by [`ParticipantList::iter`]
pub struct ParticipantIter<'a> {
    registry: &'a ParticipantRegistry,
    index: usize,
}

impl Iterator for ParticipantIter<'_> {
    type Item = Participant;

    fn next(&mut self) -> Option<Participant> {
        let (sid, identity) = self.registry.entry_at(self.index)?;
        self.index += 1;
        Some(self.registry.snapshot(identity, sid))
    }
}
