//! Publication registry for remote tracks
//!
//! Maps transport publish/subscribe signals onto [`TrackPublicationState`]
//! transitions and onto renderer attach/detach effects. Signals are never
//! rejected back to the transport: anything referencing an unknown
//! participant or track is logged and ignored.
//!
//! Subscribe/unsubscribe signals may overtake the publication they belong
//! to. Those are folded (starting from `Published`) and applied when the
//! publication shows up.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::channel::Subscription;
use crate::errors::UnknownEntity;
use crate::pointer::PointerBroadcast;
use crate::render::Renderer;
use crate::types::{
    ParticipantSid, Surface, SubscriptionSignal, TrackDescriptor, TrackId, TrackKind,
    TrackPublicationState,
};

use super::Track;

/// An applied publication state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub sid: ParticipantSid,
    pub descriptor: TrackDescriptor,
    /// `None` when the publication was just created
    pub from: Option<TrackPublicationState>,
    pub to: TrackPublicationState,
}

struct Publication {
    descriptor: TrackDescriptor,
    state: TrackPublicationState,
    track: Option<Track>,
    decoder: Option<Subscription>,
}

struct EarlySignals {
    state: TrackPublicationState,
    track: Option<Track>,
}

#[derive(Default)]
struct ParticipantTracks {
    publications: IndexMap<TrackId, Publication>,
    early: HashMap<TrackId, EarlySignals>,
}

/// Renderer work collected under the lock and performed after releasing it
enum Effect {
    Attach { track_id: TrackId, surface: Surface },
    Detach(TrackId),
    Release {
        sid: ParticipantSid,
        track_id: TrackId,
        decoder: Option<Subscription>,
    },
}

/// Track publication registry
pub struct TrackRegistry {
    renderer: Arc<dyn Renderer>,
    pointer: Arc<PointerBroadcast>,
    participants: Mutex<HashMap<ParticipantSid, ParticipantTracks>>,
}

impl TrackRegistry {
    pub fn new(renderer: Arc<dyn Renderer>, pointer: Arc<PointerBroadcast>) -> Self {
        Self {
            renderer,
            pointer,
            participants: Mutex::new(HashMap::new()),
        }
    }

    /// Start accepting publications for `sid`
    pub fn add_participant(&self, sid: &ParticipantSid) {
        self.participants.lock().entry(sid.clone()).or_default();
    }

    pub fn has_participant(&self, sid: &ParticipantSid) -> bool {
        self.participants.lock().contains_key(sid)
    }

    /// A remote participant published a track
    pub fn on_published(
        &self,
        sid: &ParticipantSid,
        descriptor: TrackDescriptor,
    ) -> Option<Transition> {
        let mut effects = Vec::new();
        let transition = {
            let mut participants = self.participants.lock();
            let Some(tracks) = participants.get_mut(sid) else {
                warn_unknown(UnknownEntity::Participant(sid.clone()), "publish");
                return None;
            };

            if tracks.publications.contains_key(&descriptor.id) {
                debug!("Track '{}' of {} already published, ignoring", descriptor.id, sid);
                return None;
            }

            let (state, track) = match tracks.early.remove(&descriptor.id) {
                Some(early) => {
                    debug!(
                        "Applying early signals for track '{}' of {}: {:?}",
                        descriptor.id, sid, early.state
                    );
                    (early.state, early.track)
                }
                None => (TrackPublicationState::Published, None),
            };

            let mut publication = Publication {
                descriptor: descriptor.clone(),
                state,
                track,
                decoder: None,
            };
            if state.is_subscribed() {
                self.enter_subscribed(sid, &mut publication, &mut effects);
            }
            tracks.publications.insert(descriptor.id.clone(), publication);

            Transition {
                sid: sid.clone(),
                descriptor,
                from: None,
                to: state,
            }
        };

        self.apply(effects);
        Some(transition)
    }

    /// The local side got subscribed to a remote track
    pub fn on_subscribed(&self, sid: &ParticipantSid, track: Track) -> Option<Transition> {
        let mut effects = Vec::new();
        let transition = {
            let mut participants = self.participants.lock();
            let Some(tracks) = participants.get_mut(sid) else {
                warn_unknown(UnknownEntity::Participant(sid.clone()), "subscribe");
                return None;
            };

            let track_id = track.id().clone();
            let Some(publication) = tracks.publications.get_mut(&track_id) else {
                let early = tracks
                    .early
                    .entry(track_id.clone())
                    .or_insert(EarlySignals {
                        state: TrackPublicationState::Published,
                        track: None,
                    });
                if let Some(next) = early.state.apply(SubscriptionSignal::Subscribe) {
                    debug!("Buffered subscribe for unpublished track '{}' of {}", track_id, sid);
                    early.state = next;
                    early.track = Some(track);
                }
                return None;
            };

            if publication.descriptor.kind != track.kind() {
                warn!(
                    "Subscribed {} track '{}' of {} but it was published as {}, ignoring",
                    track.kind(),
                    track_id,
                    sid,
                    publication.descriptor.kind
                );
                return None;
            }

            let from = publication.state;
            let Some(to) = from.apply(SubscriptionSignal::Subscribe) else {
                debug!("Ignoring subscribe for track '{}' of {} in {:?}", track_id, sid, from);
                return None;
            };
            publication.state = to;
            publication.track = Some(track);
            self.enter_subscribed(sid, publication, &mut effects);

            Transition {
                sid: sid.clone(),
                descriptor: publication.descriptor.clone(),
                from: Some(from),
                to,
            }
        };

        self.apply(effects);
        Some(transition)
    }

    /// The local side lost its subscription to a remote track
    pub fn on_unsubscribed(&self, sid: &ParticipantSid, track_id: &TrackId) -> Option<Transition> {
        let mut effects = Vec::new();
        let transition = {
            let mut participants = self.participants.lock();
            let Some(tracks) = participants.get_mut(sid) else {
                warn_unknown(UnknownEntity::Participant(sid.clone()), "unsubscribe");
                return None;
            };

            let Some(publication) = tracks.publications.get_mut(track_id) else {
                match tracks.early.get_mut(track_id) {
                    Some(early) => {
                        if let Some(next) = early.state.apply(SubscriptionSignal::Unsubscribe) {
                            debug!(
                                "Buffered unsubscribe for unpublished track '{}' of {}",
                                track_id, sid
                            );
                            early.state = next;
                            early.track = None;
                        }
                    }
                    None => warn_unknown(
                        UnknownEntity::Track {
                            sid: sid.clone(),
                            track_id: track_id.clone(),
                        },
                        "unsubscribe",
                    ),
                }
                return None;
            };

            let from = publication.state;
            let Some(to) = from.apply(SubscriptionSignal::Unsubscribe) else {
                debug!("Ignoring unsubscribe for track '{}' of {} in {:?}", track_id, sid, from);
                return None;
            };
            publication.state = to;
            leave_subscribed(sid, publication, &mut effects);

            Transition {
                sid: sid.clone(),
                descriptor: publication.descriptor.clone(),
                from: Some(from),
                to,
            }
        };

        self.apply(effects);
        Some(transition)
    }

    /// A remote participant withdrew a publication; the entry is removed
    pub fn on_unpublished(
        &self,
        sid: &ParticipantSid,
        descriptor: &TrackDescriptor,
    ) -> Option<Transition> {
        let mut effects = Vec::new();
        let transition = {
            let mut participants = self.participants.lock();
            let Some(tracks) = participants.get_mut(sid) else {
                warn_unknown(UnknownEntity::Participant(sid.clone()), "unpublish");
                return None;
            };

            let Some(mut publication) = tracks.publications.shift_remove(&descriptor.id) else {
                if tracks.early.remove(&descriptor.id).is_some() {
                    debug!(
                        "Discarded early signals for track '{}' of {}",
                        descriptor.id, sid
                    );
                } else {
                    warn_unknown(
                        UnknownEntity::Track {
                            sid: sid.clone(),
                            track_id: descriptor.id.clone(),
                        },
                        "unpublish",
                    );
                }
                return None;
            };

            let from = publication.state;
            if from.is_subscribed() {
                leave_subscribed(sid, &mut publication, &mut effects);
            }

            Transition {
                sid: sid.clone(),
                descriptor: publication.descriptor,
                from: Some(from),
                to: TrackPublicationState::Unpublished,
            }
        };

        self.apply(effects);
        Some(transition)
    }

    /// Drop every publication of `sid`, detaching whatever was subscribed
    pub fn remove_participant(&self, sid: &ParticipantSid) -> Vec<Transition> {
        let removed = self.participants.lock().remove(sid);
        let Some(tracks) = removed else {
            return Vec::new();
        };
        self.unpublish_all(sid, tracks)
    }

    /// Remove all participants and publications
    pub fn clear(&self) -> Vec<Transition> {
        let drained: Vec<_> = self.participants.lock().drain().collect();
        drained
            .into_iter()
            .flat_map(|(sid, tracks)| self.unpublish_all(&sid, tracks))
            .collect()
    }

    pub fn state(&self, sid: &ParticipantSid, track_id: &TrackId) -> Option<TrackPublicationState> {
        self.participants
            .lock()
            .get(sid)
            .and_then(|t| t.publications.get(track_id))
            .map(|p| p.state)
    }

    /// Publication states of `sid` in publish order
    pub fn publications(
        &self,
        sid: &ParticipantSid,
    ) -> Option<IndexMap<TrackId, TrackPublicationState>> {
        self.participants.lock().get(sid).map(|t| {
            t.publications
                .iter()
                .map(|(id, p)| (id.clone(), p.state))
                .collect()
        })
    }

    /// Live handle of a subscribed track
    pub fn track(&self, sid: &ParticipantSid, track_id: &TrackId) -> Option<Track> {
        self.participants
            .lock()
            .get(sid)
            .and_then(|t| t.publications.get(track_id))
            .and_then(|p| p.track.clone())
    }

    fn unpublish_all(&self, sid: &ParticipantSid, tracks: ParticipantTracks) -> Vec<Transition> {
        let mut effects = Vec::new();
        let mut transitions = Vec::with_capacity(tracks.publications.len());

        for (_, mut publication) in tracks.publications {
            let from = publication.state;
            if from.is_subscribed() {
                leave_subscribed(sid, &mut publication, &mut effects);
            }
            transitions.push(Transition {
                sid: sid.clone(),
                descriptor: publication.descriptor,
                from: Some(from),
                to: TrackPublicationState::Unpublished,
            });
        }

        self.apply(effects);
        transitions
    }

    fn enter_subscribed(
        &self,
        sid: &ParticipantSid,
        publication: &mut Publication,
        effects: &mut Vec<Effect>,
    ) {
        let track_id = publication.descriptor.id.clone();
        match publication.descriptor.kind {
            TrackKind::Audio | TrackKind::Video => effects.push(Effect::Attach {
                track_id,
                surface: Surface::participant(sid),
            }),
            TrackKind::Data => match publication.track.as_ref().and_then(Track::as_data) {
                Some(data) => publication.decoder = Some(self.pointer.attach_remote(sid, data)),
                None => warn!(
                    "Data track '{}' of {} subscribed without a handle, no decoder registered",
                    track_id, sid
                ),
            },
        }
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Attach { track_id, surface } => self.renderer.attach(&track_id, &surface),
                Effect::Detach(track_id) => self.renderer.detach(&track_id),
                Effect::Release {
                    sid,
                    track_id,
                    decoder,
                } => {
                    drop(decoder);
                    self.pointer.forget(&sid, &track_id);
                }
            }
        }
    }
}

fn leave_subscribed(sid: &ParticipantSid, publication: &mut Publication, effects: &mut Vec<Effect>) {
    let track_id = publication.descriptor.id.clone();
    publication.track = None;
    match publication.descriptor.kind {
        TrackKind::Audio | TrackKind::Video => effects.push(Effect::Detach(track_id)),
        TrackKind::Data => effects.push(Effect::Release {
            sid: sid.clone(),
            track_id,
            decoder: publication.decoder.take(),
        }),
    }
}

fn warn_unknown(entity: UnknownEntity, signal: &str) {
    warn!("Ignoring {} signal for unknown {}", signal, entity);
}

impl std::fmt::Debug for TrackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackRegistry")
            .field("participants", &self.participants.lock().len())
            .finish()
    }
}
