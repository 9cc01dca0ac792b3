//! Session handle
//!
//! A [`SessionHandle`] is read access to one joined room instance. It is
//! created when a connect attempt is installed and stays valid after the
//! session ends (reporting `Disconnected` and no participants); a later
//! connect produces a new handle.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::participant::{ParticipantList, ParticipantRegistry, RegistryStats};
use crate::track::TrackRegistry;
use crate::types::{Identity, Participant, ParticipantSid, SessionState};

struct SessionInner {
    room_name: String,
    local: Participant,
    participants: Arc<ParticipantRegistry>,
    state: RwLock<SessionState>,
    /// Serializes registry mutation between the event loop and teardown
    processing: Mutex<()>,
}

/// Read-only view of a session owned by the coordinator
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub(crate) fn new(
        room_name: String,
        local: Participant,
        participants: Arc<ParticipantRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                room_name,
                local,
                participants,
                state: RwLock::new(SessionState::Connected),
                processing: Mutex::new(()),
            }),
        }
    }

    pub fn room_name(&self) -> &str {
        &self.inner.room_name
    }

    /// The local participant with its published tracks
    pub fn local_participant(&self) -> &Participant {
        &self.inner.local
    }

    /// Remote participants in join order
    pub fn participants(&self) -> ParticipantList<'_> {
        self.inner.participants.list()
    }

    pub fn participant(&self, sid: &ParticipantSid) -> Option<Participant> {
        self.inner.participants.get(sid)
    }

    pub fn participant_count(&self) -> usize {
        self.inner.participants.len()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Remote participant currently present under `identity`
    pub fn participant_by_identity(&self, identity: &Identity) -> Option<Participant> {
        self.inner.participants.find_by_identity(identity)
    }

    /// Join/leave counters for this session
    pub fn membership_stats(&self) -> RegistryStats {
        self.inner.participants.stats()
    }

    /// True if both handles refer to the same session
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn registry(&self) -> &Arc<ParticipantRegistry> {
        &self.inner.participants
    }

    pub(crate) fn tracks(&self) -> &Arc<TrackRegistry> {
        self.inner.participants.tracks()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.inner.state.write() = state;
    }

    pub(crate) fn processing(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.inner.processing.lock()
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("room_name", &self.inner.room_name)
            .field("local", &self.inner.local.identity)
            .field("state", &self.state())
            .field("participants", &self.participant_count())
            .finish()
    }
}
