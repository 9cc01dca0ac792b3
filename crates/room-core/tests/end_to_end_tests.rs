//! Two or more coordinators sharing one in-process room

mod common;

use std::sync::Arc;

use bytes::Bytes;
use pretty_assertions::assert_eq;

use huddle_room_core::pointer::PointerPayload;
use huddle_room_core::transport::ConnectOptions;
use huddle_room_core::{
    color_for, CoordinatorEvent, DataTrack, Identity, MediaTransport, MemoryRoom, SessionConfig,
    SessionState, Surface, Track, TrackDescriptor, TrackId, TrackPublicationState,
};

use common::*;

fn canvas() -> Surface {
    Surface::from("canvas")
}

#[tokio::test]
async fn test_pointer_from_b_is_drawn_once_on_a() {
    let room = MemoryRoom::new(ROOM);
    let renderer_a = RecordingRenderer::new();
    let renderer_b = RecordingRenderer::new();
    let alice = coordinator(Arc::new(room.clone()), renderer_a.clone());
    let bob = coordinator(Arc::new(room.clone()), renderer_b.clone());
    let log_a = EventLog::attach(&alice);

    alice.connect(member("alice")).await.unwrap();
    bob.connect(member("bob")).await.unwrap();
    wait_until("alice subscribed to bob", || log_a.len() == 2).await;
    assert_eq!(log_a.names(), vec!["joined", "subscribed"]);

    assert_eq!(bob.send_pointer(true, 10.0, 20.0).unwrap(), 1);

    let bob_color = color_for(&TrackId::from("bob-pointer"));
    assert_eq!(
        renderer_a.marks(),
        vec![RenderCall::Mark(canvas(), bob_color, 10.0, 20.0)]
    );
    // local echo on bob's side
    assert_eq!(
        renderer_b.marks(),
        vec![RenderCall::Mark(canvas(), bob_color, 10.0, 20.0)]
    );

    // released pointers move without drawing
    bob.send_pointer(false, 30.0, 40.0).unwrap();
    assert_eq!(renderer_a.marks().len(), 1);

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_late_joiner_sees_existing_participants() {
    let room = MemoryRoom::new(ROOM);
    let bob = coordinator(Arc::new(room.clone()), RecordingRenderer::new());
    bob.connect(member("bob")).await.unwrap();

    let alice = coordinator(Arc::new(room.clone()), RecordingRenderer::new());
    let log_a = EventLog::attach(&alice);
    let session = alice.connect(member("alice")).await.unwrap();

    // populated before connect returns
    assert_eq!(log_a.names(), vec!["joined", "subscribed"]);
    assert_eq!(session.participant_count(), 1);

    let remote: Vec<_> = session.participants().iter().collect();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].identity, Identity::from("bob"));
    assert_eq!(
        remote[0].tracks.get(&TrackId::from("bob-pointer")),
        Some(&TrackPublicationState::Subscribed)
    );
}

#[tokio::test]
async fn test_departure_cascades_to_tracks() {
    let room = MemoryRoom::new(ROOM);
    let renderer_a = RecordingRenderer::new();
    let alice = coordinator(Arc::new(room.clone()), renderer_a.clone());
    let carol = coordinator(Arc::new(room.clone()), RecordingRenderer::new());
    let log_a = EventLog::attach(&alice);

    let session = alice.connect(member("alice")).await.unwrap();
    let carol_session = carol
        .connect(member("carol").with_track(TrackDescriptor::audio("carol-mic")))
        .await
        .unwrap();
    let carol_sid = carol_session.local_participant().sid.clone();

    wait_until("carol's tracks subscribed", || log_a.len() == 3).await;
    assert_eq!(
        renderer_a.calls(),
        vec![RenderCall::Attach(
            TrackId::from("carol-mic"),
            Surface::participant(&carol_sid)
        )]
    );

    carol.disconnect().await.unwrap();
    wait_until("carol left", || session.participant_count() == 0).await;
    wait_until("departure events", || log_a.len() == 6).await;

    assert_eq!(
        log_a.names(),
        vec![
            "joined",
            "subscribed",
            "subscribed",
            "unsubscribed",
            "unsubscribed",
            "left"
        ]
    );
    assert!(renderer_a
        .calls()
        .contains(&RenderCall::Detach(TrackId::from("carol-mic"))));
    match log_a.events().last() {
        Some(CoordinatorEvent::ParticipantLeft { participant }) => {
            assert_eq!(participant.identity, Identity::from("carol"));
        }
        other => panic!("unexpected last event: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_payload_keeps_track_usable() {
    let room = MemoryRoom::new(ROOM);
    let renderer_a = RecordingRenderer::new();
    let alice = coordinator(Arc::new(room.clone()), renderer_a.clone());
    let log_a = EventLog::attach(&alice);
    alice.connect(member("alice")).await.unwrap();

    // a peer that speaks to the room without a coordinator
    let raw = DataTrack::new("mallory-pointer");
    let _mallory = room
        .connect_session(
            "t".to_string(),
            ConnectOptions {
                room_name: ROOM.to_string(),
                identity: Identity::from("mallory"),
                display_name: "Mallory".to_string(),
                tracks: vec![Track::Data(raw.clone())],
            },
        )
        .await
        .unwrap();
    wait_until("alice subscribed to mallory", || log_a.len() == 2).await;

    raw.send(Bytes::from_static(b"{not json"));
    raw.send(Bytes::from_static(br#"{"v":99,"pressed":true,"x":1,"y":1}"#));
    assert!(renderer_a.marks().is_empty());

    raw.send(PointerPayload::new(true, 5.0, 6.0).encode().unwrap());
    assert_eq!(
        renderer_a.marks(),
        vec![RenderCall::Mark(
            canvas(),
            color_for(&TrackId::from("mallory-pointer")),
            5.0,
            6.0
        )]
    );
    assert_eq!(alice.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_unpublish_detaches_remote_media() {
    let room = MemoryRoom::new(ROOM);
    let renderer_a = RecordingRenderer::new();
    let alice = coordinator(Arc::new(room.clone()), renderer_a.clone());
    let dave = coordinator(Arc::new(room.clone()), RecordingRenderer::new());
    let log_a = EventLog::attach(&alice);

    let session = alice.connect(member("alice")).await.unwrap();
    let dave_session = dave
        .connect(SessionConfig::new("dave", "Dave").with_track(TrackDescriptor::video("dave-cam")))
        .await
        .unwrap();
    let dave_sid = dave_session.local_participant().sid.clone();
    wait_until("dave's camera subscribed", || log_a.len() == 2).await;

    assert!(room.unpublish(&dave_sid, &TrackId::from("dave-cam")));
    wait_until("camera unsubscribed", || log_a.len() == 3).await;

    assert_eq!(log_a.names(), vec!["joined", "subscribed", "unsubscribed"]);
    assert_eq!(
        renderer_a.calls(),
        vec![
            RenderCall::Attach(TrackId::from("dave-cam"), Surface::participant(&dave_sid)),
            RenderCall::Detach(TrackId::from("dave-cam")),
        ]
    );
    let dave_view = session.participant(&dave_sid).unwrap();
    assert!(dave_view.tracks.is_empty());
}

#[tokio::test]
async fn test_disconnect_clears_remote_state() {
    let room = MemoryRoom::new(ROOM);
    let renderer_a = RecordingRenderer::new();
    let alice = coordinator(Arc::new(room.clone()), renderer_a.clone());
    let erin = coordinator(Arc::new(room.clone()), RecordingRenderer::new());

    erin.connect(member("erin").with_track(TrackDescriptor::audio("erin-mic")))
        .await
        .unwrap();
    let session = alice.connect(member("alice")).await.unwrap();
    assert_eq!(session.participant_count(), 1);

    alice.disconnect().await.unwrap();
    assert_eq!(session.participant_count(), 0);
    assert_eq!(
        renderer_a.calls().last(),
        Some(&RenderCall::Detach(TrackId::from("erin-mic")))
    );
    assert_eq!(room.members(), vec![Identity::from("erin")]);
}

fn cursor_member(identity: &str) -> SessionConfig {
    SessionConfig::new(identity, identity.to_uppercase())
        .with_track(TrackDescriptor::data("cursor"))
}

#[tokio::test]
async fn test_peers_sharing_a_track_id_keep_separate_pointer_state() {
    let room = MemoryRoom::new(ROOM);
    let renderer_a = RecordingRenderer::new();
    let alice = coordinator(Arc::new(room.clone()), renderer_a.clone());
    let bob = coordinator(Arc::new(room.clone()), RecordingRenderer::new());
    let carol = coordinator(Arc::new(room.clone()), RecordingRenderer::new());
    let log_a = EventLog::attach(&alice);

    let session = alice.connect(cursor_member("alice")).await.unwrap();
    let bob_sid = bob
        .connect(cursor_member("bob"))
        .await
        .unwrap()
        .local_participant()
        .sid
        .clone();
    let carol_sid = carol
        .connect(cursor_member("carol"))
        .await
        .unwrap()
        .local_participant()
        .sid
        .clone();
    wait_until("both cursors subscribed", || log_a.len() == 4).await;

    // each sender numbers its own payloads from 1
    bob.send_pointer(true, 1.0, 1.0).unwrap();
    bob.send_pointer(true, 2.0, 2.0).unwrap();
    bob.send_pointer(true, 3.0, 3.0).unwrap();
    carol.send_pointer(true, 9.0, 9.0).unwrap();

    let cursor = TrackId::from("cursor");
    let color = color_for(&cursor);
    assert_eq!(
        renderer_a.marks(),
        vec![
            RenderCall::Mark(canvas(), color, 1.0, 1.0),
            RenderCall::Mark(canvas(), color, 2.0, 2.0),
            RenderCall::Mark(canvas(), color, 3.0, 3.0),
            RenderCall::Mark(canvas(), color, 9.0, 9.0),
        ]
    );

    let from_bob = alice.latest_pointer(&bob_sid, &cursor).unwrap();
    assert_eq!((from_bob.x, from_bob.y), (3.0, 3.0));
    let from_carol = alice.latest_pointer(&carol_sid, &cursor).unwrap();
    assert_eq!((from_carol.x, from_carol.y), (9.0, 9.0));
    assert_eq!(from_carol.sender_track_id, cursor);
    assert_eq!(alice.latest_local_pointer(), None);
    assert_eq!(carol.latest_local_pointer(), Some(from_carol));

    assert_eq!(
        session.participant_by_identity(&Identity::from("carol")).map(|p| p.sid),
        Some(carol_sid.clone())
    );

    bob.disconnect().await.unwrap();
    wait_until("bob left", || log_a.len() == 6).await;

    assert_eq!(alice.latest_pointer(&bob_sid, &cursor), None);
    assert!(alice.latest_pointer(&carol_sid, &cursor).is_some());
    assert!(session.participant_by_identity(&Identity::from("bob")).is_none());
    let stats = session.membership_stats();
    assert_eq!((stats.total_joined, stats.total_left), (2, 1));

    // carol's sequence carries on where it was
    carol.send_pointer(true, 8.0, 8.0).unwrap();
    assert_eq!(renderer_a.marks().len(), 5);
    let from_carol = alice.latest_pointer(&carol_sid, &cursor).unwrap();
    assert_eq!((from_carol.x, from_carol.y), (8.0, 8.0));
}
