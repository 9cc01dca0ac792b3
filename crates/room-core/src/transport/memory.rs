//! In-process room
//!
//! Every coordinator connected to the same [`MemoryRoom`] sees the others
//! join, publish and leave. Members are subscribed to each other's tracks
//! automatically, and data-track payloads are relayed from the publisher's
//! local track to every subscriber's remote copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::channel::Subscription;
use crate::errors::{Result, SessionError};
use crate::track::{DataTrack, Track};
use crate::types::{Identity, ParticipantSid, SessionConfig, TrackDescriptor, TrackId};

use super::{
    ConnectOptions, MediaTransport, PublicationSnapshot, RemoteParticipantSnapshot,
    TransportConnection, TransportEvent, TransportSession,
};

type SubscriptionKey = (ParticipantSid, TrackId);

struct LocalPublication {
    descriptor: TrackDescriptor,
    track: Track,
    relay: Option<Subscription>,
}

struct Member {
    identity: Identity,
    sid: ParticipantSid,
    events: mpsc::UnboundedSender<TransportEvent>,
    published: Vec<LocalPublication>,
    /// Remote copies of other members' tracks, keyed by publisher and track
    subscriptions: HashMap<SubscriptionKey, Track>,
}

impl Member {
    fn notify(&self, event: TransportEvent) {
        trace!("MemoryRoom -> {}: {}", self.sid, event.name());
        // a member whose coordinator went away just stops hearing about it
        let _ = self.events.send(event);
    }

    fn subscribe_to(&mut self, publisher: &ParticipantSid, publication: &LocalPublication) -> Track {
        let copy = remote_copy(&publication.track);
        self.subscriptions.insert(
            (publisher.clone(), publication.descriptor.id.clone()),
            copy.clone(),
        );
        copy
    }

    fn drop_publication(&mut self, publisher: &ParticipantSid, descriptor: &TrackDescriptor) {
        let key = (publisher.clone(), descriptor.id.clone());
        if self.subscriptions.remove(&key).is_some() {
            self.notify(TransportEvent::TrackUnsubscribed {
                sid: publisher.clone(),
                track_id: descriptor.id.clone(),
            });
        }
        self.notify(TransportEvent::TrackUnpublished {
            sid: publisher.clone(),
            descriptor: descriptor.clone(),
        });
    }
}

#[derive(Default)]
struct RoomState {
    members: IndexMap<ParticipantSid, Member>,
}

struct RoomShared {
    name: String,
    state: Mutex<RoomState>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    media_failure: Mutex<Option<String>>,
    connect_failure: Mutex<Option<String>>,
}

/// In-process [`MediaTransport`] hosting a single room
#[derive(Clone)]
pub struct MemoryRoom {
    shared: Arc<RoomShared>,
}

impl MemoryRoom {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(RoomShared {
                name: name.into(),
                state: Mutex::new(RoomState::default()),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                media_failure: Mutex::new(None),
                connect_failure: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Identities of the current members in join order
    pub fn members(&self) -> Vec<Identity> {
        self.shared
            .state
            .lock()
            .members
            .values()
            .map(|m| m.identity.clone())
            .collect()
    }

    pub fn sid_of(&self, identity: &Identity) -> Option<ParticipantSid> {
        self.shared
            .state
            .lock()
            .members
            .values()
            .find(|m| &m.identity == identity)
            .map(|m| m.sid.clone())
    }

    /// Tracks acquired and not yet released
    pub fn outstanding_tracks(&self) -> usize {
        self.shared
            .acquired
            .load(Ordering::SeqCst)
            .saturating_sub(self.shared.released.load(Ordering::SeqCst))
    }

    pub fn released_tracks(&self) -> usize {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Make local media acquisition fail with `reason` (or succeed again)
    pub fn set_media_failure(&self, reason: Option<String>) {
        *self.shared.media_failure.lock() = reason;
    }

    /// Make joining fail with `reason` (or succeed again)
    pub fn set_connect_failure(&self, reason: Option<String>) {
        *self.shared.connect_failure.lock() = reason;
    }

    /// Remove a member on the room's initiative
    ///
    /// The evicted member receives `Disconnected { reason }`; everybody else
    /// sees the usual departure events. Returns false if `sid` is not a
    /// member.
    pub fn evict(&self, sid: &ParticipantSid, reason: impl Into<String>) -> bool {
        self.shared.leave(sid, Some(reason.into()))
    }

    /// Withdraw one of a member's publications
    pub fn unpublish(&self, sid: &ParticipantSid, track_id: &TrackId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock();
            let Some(member) = state.members.get_mut(sid) else {
                return false;
            };
            let Some(pos) = member
                .published
                .iter()
                .position(|p| &p.descriptor.id == track_id)
            else {
                return false;
            };
            let publication = member.published.remove(pos);

            for other in state.members.values_mut().filter(|m| &m.sid != sid) {
                other.drop_publication(sid, &publication.descriptor);
            }
            publication
        };

        debug!("MemoryRoom '{}': {} unpublished '{}'", self.shared.name, sid, track_id);
        drop(removed.relay);
        true
    }

    fn join(&self, options: ConnectOptions) -> Result<TransportConnection> {
        let sid = ParticipantSid::new(format!("PA_{}", &Uuid::new_v4().simple().to_string()[..12]));
        let (events, receiver) = mpsc::unbounded_channel();

        let mut member = Member {
            identity: options.identity.clone(),
            sid: sid.clone(),
            events,
            published: Vec::with_capacity(options.tracks.len()),
            subscriptions: HashMap::new(),
        };

        let mut state = self.shared.state.lock();
        if state.members.values().any(|m| m.identity == options.identity) {
            return Err(SessionError::transport(format!(
                "identity '{}' is already in room '{}'",
                options.identity, self.shared.name
            )));
        }

        let mut snapshot = Vec::with_capacity(state.members.len());
        for existing in state.members.values() {
            let publications = existing
                .published
                .iter()
                .map(|publication| PublicationSnapshot {
                    descriptor: publication.descriptor.clone(),
                    subscribed: Some(member.subscribe_to(&existing.sid, publication)),
                })
                .collect();
            snapshot.push(RemoteParticipantSnapshot {
                identity: existing.identity.clone(),
                sid: existing.sid.clone(),
                publications,
            });
        }

        for track in options.tracks {
            let relay = track.as_data().map(|data| self.shared.relay(&sid, data));
            member.published.push(LocalPublication {
                descriptor: track.descriptor().clone(),
                track,
                relay,
            });
        }

        for existing in state.members.values_mut() {
            existing.notify(TransportEvent::ParticipantConnected {
                identity: member.identity.clone(),
                sid: sid.clone(),
            });
            for publication in &member.published {
                let copy = existing.subscribe_to(&sid, publication);
                existing.notify(TransportEvent::TrackPublished {
                    sid: sid.clone(),
                    descriptor: publication.descriptor.clone(),
                });
                existing.notify(TransportEvent::TrackSubscribed {
                    sid: sid.clone(),
                    track: copy,
                });
            }
        }

        state.members.insert(sid.clone(), member);
        drop(state);

        info!(
            "MemoryRoom '{}': '{}' joined as {}",
            self.shared.name, options.identity, sid
        );

        Ok(TransportConnection {
            session: Arc::new(MemorySession {
                room: Arc::clone(&self.shared),
                sid: sid.clone(),
            }),
            room_name: self.shared.name.clone(),
            local_sid: sid,
            snapshot,
            events: receiver,
        })
    }
}

impl RoomShared {
    /// Forward payloads sent on a member's local data track to every
    /// subscriber's remote copy
    fn relay(self: &Arc<Self>, publisher: &ParticipantSid, track: &DataTrack) -> Subscription {
        let room: Weak<RoomShared> = Arc::downgrade(self);
        let key = (publisher.clone(), track.id().clone());

        track.on_send(move |payload| {
            let Some(room) = room.upgrade() else {
                return Ok(());
            };
            let targets: Vec<DataTrack> = {
                let state = room.state.lock();
                state
                    .members
                    .values()
                    .filter_map(|m| m.subscriptions.get(&key))
                    .filter_map(|t| t.as_data().cloned())
                    .collect()
            };
            for target in targets {
                target.deliver(payload.clone());
            }
            Ok(())
        })
    }

    fn leave(&self, sid: &ParticipantSid, eviction: Option<String>) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let Some(member) = state.members.shift_remove(sid) else {
                return false;
            };
            for other in state.members.values_mut() {
                for publication in &member.published {
                    other.drop_publication(sid, &publication.descriptor);
                }
                other.notify(TransportEvent::ParticipantDisconnected { sid: sid.clone() });
            }
            member
        };

        info!("MemoryRoom '{}': '{}' ({}) left", self.name, removed.identity, sid);
        if let Some(reason) = eviction {
            removed.notify(TransportEvent::Disconnected { reason });
        }
        true
    }
}

fn remote_copy(track: &Track) -> Track {
    match track {
        Track::Audio(t) => Track::Audio(t.clone()),
        Track::Video(t) => Track::Video(t.clone()),
        Track::Data(t) => Track::Data(DataTrack::new(t.id().clone())),
    }
}

#[async_trait]
impl MediaTransport for MemoryRoom {
    async fn acquire_local_tracks(&self, config: &SessionConfig) -> Result<Vec<Track>> {
        if let Some(reason) = self.shared.media_failure.lock().clone() {
            return Err(SessionError::transport(reason));
        }
        let tracks: Vec<Track> = config.tracks.iter().map(Track::from_descriptor).collect();
        self.shared.acquired.fetch_add(tracks.len(), Ordering::SeqCst);
        Ok(tracks)
    }

    async fn release_local_tracks(&self, tracks: Vec<Track>) {
        self.shared.released.fetch_add(tracks.len(), Ordering::SeqCst);
    }

    async fn connect_session(
        &self,
        token: String,
        options: ConnectOptions,
    ) -> Result<TransportConnection> {
        if token.is_empty() {
            return Err(SessionError::transport("empty access token"));
        }
        if options.room_name != self.shared.name {
            return Err(SessionError::transport(format!(
                "no room named '{}'",
                options.room_name
            )));
        }
        if let Some(reason) = self.shared.connect_failure.lock().clone() {
            return Err(SessionError::transport(reason));
        }
        self.join(options)
    }
}

impl std::fmt::Debug for MemoryRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRoom")
            .field("name", &self.shared.name)
            .field("members", &self.members())
            .finish()
    }
}

struct MemorySession {
    room: Arc<RoomShared>,
    sid: ParticipantSid,
}

#[async_trait]
impl TransportSession for MemorySession {
    async fn disconnect(&self) -> Result<()> {
        if !self.room.leave(&self.sid, None) {
            debug!("MemoryRoom '{}': {} already gone", self.room.name, self.sid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrackKind;
    use bytes::Bytes;

    fn options(identity: &str, tracks: Vec<Track>) -> ConnectOptions {
        ConnectOptions {
            room_name: "lobby".to_string(),
            identity: Identity::from(identity),
            display_name: identity.to_uppercase(),
            tracks,
        }
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_join_snapshot_and_announcements() {
        let room = MemoryRoom::new("lobby");
        let mut alice = room
            .connect_session("t".into(), options("alice", vec![]))
            .await
            .unwrap();
        assert!(alice.snapshot.is_empty());

        let bob_cursor = DataTrack::new("bob-cursor");
        let bob = room
            .connect_session("t".into(), options("bob", vec![Track::Data(bob_cursor)]))
            .await
            .unwrap();

        assert_eq!(bob.snapshot.len(), 1);
        assert_eq!(bob.snapshot[0].identity, Identity::from("alice"));

        let names: Vec<_> = drain(&mut alice.events).iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["participant_connected", "track_published", "track_subscribed"]
        );
        assert_eq!(room.members(), vec![Identity::from("alice"), Identity::from("bob")]);
    }

    #[tokio::test]
    async fn test_data_payloads_are_relayed() {
        let room = MemoryRoom::new("lobby");
        let mut alice = room
            .connect_session("t".into(), options("alice", vec![]))
            .await
            .unwrap();

        let bob_cursor = DataTrack::new("bob-cursor");
        let _bob = room
            .connect_session(
                "t".into(),
                options("bob", vec![Track::Data(bob_cursor.clone())]),
            )
            .await
            .unwrap();

        let remote = drain(&mut alice.events)
            .into_iter()
            .find_map(|e| match e {
                TransportEvent::TrackSubscribed { track, .. } => Some(track),
                _ => None,
            })
            .unwrap();
        assert_eq!(remote.kind(), TrackKind::Data);
        let remote = remote.as_data().unwrap().clone();
        assert!(!remote.same_track(&bob_cursor));

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _sub = remote.on_message(move |payload| {
            sink.lock().push(payload.clone());
            Ok(())
        });

        assert_eq!(bob_cursor.send(Bytes::from_static(b"ping")), 1);
        assert_eq!(received.lock().as_slice(), &[Bytes::from_static(b"ping")]);
    }

    #[tokio::test]
    async fn test_leave_and_evict() {
        let room = MemoryRoom::new("lobby");
        let mut alice = room
            .connect_session("t".into(), options("alice", vec![]))
            .await
            .unwrap();
        let mut bob = room
            .connect_session(
                "t".into(),
                options("bob", vec![Track::Data(DataTrack::new("bob-cursor"))]),
            )
            .await
            .unwrap();
        drain(&mut alice.events);

        bob.session.disconnect().await.unwrap();
        let names: Vec<_> = drain(&mut alice.events).iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec!["track_unsubscribed", "track_unpublished", "participant_disconnected"]
        );
        // bob's stream ends with the membership
        assert!(bob.events.recv().await.is_none());

        assert!(room.evict(&alice.local_sid, "kicked"));
        match alice.events.recv().await {
            Some(TransportEvent::Disconnected { reason }) => assert_eq!(reason, "kicked"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(alice.events.recv().await.is_none());
        assert!(!room.evict(&alice.local_sid, "again"));
    }

    #[tokio::test]
    async fn test_rejections() {
        let room = MemoryRoom::new("lobby");
        assert!(room
            .connect_session(String::new(), options("alice", vec![]))
            .await
            .is_err());

        let mut wrong_room = options("alice", vec![]);
        wrong_room.room_name = "attic".to_string();
        assert!(room.connect_session("t".into(), wrong_room).await.is_err());

        let _alice = room
            .connect_session("t".into(), options("alice", vec![]))
            .await
            .unwrap();
        assert!(room
            .connect_session("t".into(), options("alice", vec![]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_track_accounting() {
        let room = MemoryRoom::new("lobby");
        let config = SessionConfig::new("alice", "Alice")
            .with_track(TrackDescriptor::audio("mic"))
            .with_track(TrackDescriptor::data("cursor"));

        let tracks = room.acquire_local_tracks(&config).await.unwrap();
        assert_eq!(room.outstanding_tracks(), 2);
        room.release_local_tracks(tracks).await;
        assert_eq!(room.outstanding_tracks(), 0);
        assert_eq!(room.released_tracks(), 2);

        room.set_media_failure(Some("no camera".to_string()));
        assert!(room.acquire_local_tracks(&config).await.is_err());
        assert_eq!(room.outstanding_tracks(), 0);
    }

    #[tokio::test]
    async fn test_unpublish_notifies_others() {
        let room = MemoryRoom::new("lobby");
        let mut alice = room
            .connect_session("t".into(), options("alice", vec![]))
            .await
            .unwrap();
        let bob = room
            .connect_session(
                "t".into(),
                options("bob", vec![Track::Audio(crate::track::MediaTrack::audio("mic"))]),
            )
            .await
            .unwrap();
        drain(&mut alice.events);

        assert!(room.unpublish(&bob.local_sid, &TrackId::from("mic")));
        assert!(!room.unpublish(&bob.local_sid, &TrackId::from("mic")));
        let names: Vec<_> = drain(&mut alice.events).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["track_unsubscribed", "track_unpublished"]);
    }
}
