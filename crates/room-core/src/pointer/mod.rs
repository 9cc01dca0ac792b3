//! Pointer broadcast protocol
//!
//! Layered on data tracks: local pointer moves are echoed onto the shared
//! canvas immediately and sent as [`PointerPayload`]s on the local data
//! track; payloads received on subscribed remote data tracks are decoded and
//! drawn in the sender's colour. Only pressed pointers leave marks.
//!
//! Decoding problems never escape this module. A bad payload is logged and
//! dropped and the track keeps delivering.

mod color;
mod wire;

pub use color::{color_for, Color};
pub use wire::{PointerPayload, ProtocolDecodeError, MAX_PAYLOAD_BYTES, WIRE_VERSION};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::channel::Subscription;
use crate::errors::{Result, SessionError};
use crate::render::Renderer;
use crate::track::DataTrack;
use crate::types::{ParticipantSid, PointerEvent, Surface, TrackId};

/// Track ids are only unique per owner, so remote senders are keyed by both
type SenderKey = (ParticipantSid, TrackId);

#[derive(Debug, Default)]
struct SenderState {
    last_seq: HashMap<SenderKey, u64>,
    latest: HashMap<SenderKey, PointerEvent>,
    local_latest: Option<PointerEvent>,
    next_seq: u64,
}

/// Encoder/decoder and renderer glue for pointer events
pub struct PointerBroadcast {
    renderer: Arc<dyn Renderer>,
    canvas: Surface,
    local: Mutex<Option<DataTrack>>,
    senders: Mutex<SenderState>,
}

impl PointerBroadcast {
    pub fn new(renderer: Arc<dyn Renderer>, canvas: Surface) -> Self {
        Self {
            renderer,
            canvas,
            local: Mutex::new(None),
            senders: Mutex::new(SenderState::default()),
        }
    }

    pub fn canvas(&self) -> &Surface {
        &self.canvas
    }

    /// Install (or clear) the local data track used by [`send_local`](Self::send_local)
    pub fn set_local_track(&self, track: Option<DataTrack>) {
        *self.local.lock() = track;
    }

    pub fn local_track_id(&self) -> Option<TrackId> {
        self.local.lock().as_ref().map(|t| t.id().clone())
    }

    /// Echo a local pointer update and broadcast it
    ///
    /// The local mark is drawn before anything is sent, no round trip
    /// involved. Returns the number of carriers the payload reached.
    pub fn send_local(&self, pressed: bool, x: f64, y: f64) -> Result<usize> {
        let track = self.local.lock().clone().ok_or(SessionError::NotConnected)?;
        let sender = track.id().clone();

        let payload = {
            let mut senders = self.senders.lock();
            senders.next_seq += 1;
            let payload = PointerPayload::new(pressed, x, y).with_seq(senders.next_seq);
            let encoded = payload.encode()?;
            senders.local_latest = Some(PointerEvent {
                pressed,
                x,
                y,
                sender_track_id: sender.clone(),
            });
            encoded
        };

        if pressed {
            self.renderer.draw_mark(&self.canvas, color_for(&sender), x, y);
        }

        Ok(track.send(payload))
    }

    /// Register the decoder on the data track `owner` published
    ///
    /// Dropping the returned subscription unregisters it again.
    pub fn attach_remote(
        self: &Arc<Self>,
        owner: &ParticipantSid,
        track: &DataTrack,
    ) -> Subscription {
        let protocol = Arc::downgrade(self);
        let owner = owner.clone();
        let sender = track.id().clone();
        debug!("Pointer decoder registered on data track '{}' of {}", sender, owner);

        track.on_message(move |payload| {
            if let Some(protocol) = protocol.upgrade() {
                protocol.receive(&owner, &sender, payload);
            }
            Ok(())
        })
    }

    /// Handle one payload received on `owner`'s track `sender`
    ///
    /// Returns the accepted event, or `None` if the payload was malformed or
    /// a stale duplicate.
    pub fn receive(
        &self,
        owner: &ParticipantSid,
        sender: &TrackId,
        payload: &[u8],
    ) -> Option<PointerEvent> {
        match self.accept(owner, sender, payload) {
            Ok(Some(event)) => {
                if event.pressed {
                    self.renderer
                        .draw_mark(&self.canvas, color_for(sender), event.x, event.y);
                }
                Some(event)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Dropping pointer payload from '{}' of {} ({} bytes): {}",
                    sender,
                    owner,
                    payload.len(),
                    e
                );
                None
            }
        }
    }

    fn accept(
        &self,
        owner: &ParticipantSid,
        sender: &TrackId,
        payload: &[u8],
    ) -> std::result::Result<Option<PointerEvent>, ProtocolDecodeError> {
        let decoded = PointerPayload::decode(payload)?;
        let key = (owner.clone(), sender.clone());
        let mut senders = self.senders.lock();

        if let Some(seq) = decoded.seq {
            if let Some(last) = senders.last_seq.get(&key) {
                if seq <= *last {
                    debug!(
                        "Ignoring stale pointer payload from '{}' of {} (seq {} <= {})",
                        sender, owner, seq, last
                    );
                    return Ok(None);
                }
            }
            senders.last_seq.insert(key.clone(), seq);
        }

        let event = PointerEvent {
            pressed: decoded.pressed,
            x: decoded.x,
            y: decoded.y,
            sender_track_id: sender.clone(),
        };
        senders.latest.insert(key, event.clone());
        Ok(Some(event))
    }

    /// Most recent pointer event seen on `owner`'s track `sender`
    pub fn latest(&self, owner: &ParticipantSid, sender: &TrackId) -> Option<PointerEvent> {
        self.senders
            .lock()
            .latest
            .get(&(owner.clone(), sender.clone()))
            .cloned()
    }

    /// Most recent local pointer event
    pub fn latest_local(&self) -> Option<PointerEvent> {
        self.senders.lock().local_latest.clone()
    }

    /// Drop everything remembered about `owner`'s track `sender`
    pub fn forget(&self, owner: &ParticipantSid, sender: &TrackId) {
        let key = (owner.clone(), sender.clone());
        let mut senders = self.senders.lock();
        senders.last_seq.remove(&key);
        senders.latest.remove(&key);
    }

    /// Clear all sender state and the local track
    pub fn reset(&self) {
        *self.senders.lock() = SenderState::default();
        self.set_local_track(None);
    }
}

impl std::fmt::Debug for PointerBroadcast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerBroadcast")
            .field("canvas", &self.canvas)
            .field("local_track", &self.local_track_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{RecordingRenderer, RenderCall};
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn protocol() -> (Arc<PointerBroadcast>, Arc<RecordingRenderer>) {
        let renderer = Arc::new(RecordingRenderer::default());
        let protocol = Arc::new(PointerBroadcast::new(
            renderer.clone(),
            Surface::from("canvas"),
        ));
        (protocol, renderer)
    }

    #[test]
    fn test_malformed_then_valid_payload() {
        let (protocol, renderer) = protocol();
        let remote = DataTrack::new("bob-cursor");
        let _decoder = protocol.attach_remote(&ParticipantSid::from("PA_bob"), &remote);

        remote.deliver(Bytes::from_static(b"{bad json"));
        remote.deliver(Bytes::from_static(br#"{"pressed":true,"x":1,"y":2}"#));

        let sender = TrackId::from("bob-cursor");
        assert_eq!(
            renderer.calls(),
            vec![RenderCall::Mark(
                Surface::from("canvas"),
                color_for(&sender),
                1.0,
                2.0
            )]
        );
        assert_eq!(remote.message_handler_count(), 1);
    }

    #[test]
    fn test_released_pointer_not_drawn_but_remembered() {
        let (protocol, renderer) = protocol();
        let bob = ParticipantSid::from("PA_bob");
        let sender = TrackId::from("bob-cursor");

        let event = protocol
            .receive(&bob, &sender, br#"{"pressed":false,"x":5,"y":6}"#)
            .unwrap();
        assert!(!event.pressed);
        assert!(renderer.calls().is_empty());
        assert_eq!(protocol.latest(&bob, &sender), Some(event));

        protocol.forget(&bob, &sender);
        assert_eq!(protocol.latest(&bob, &sender), None);
    }

    #[test]
    fn test_stale_sequence_dropped() {
        let (protocol, renderer) = protocol();
        let bob = ParticipantSid::from("PA_bob");
        let sender = TrackId::from("bob-cursor");

        assert!(protocol
            .receive(&bob, &sender, br#"{"pressed":true,"x":1,"y":1,"seq":2}"#)
            .is_some());
        assert!(protocol
            .receive(&bob, &sender, br#"{"pressed":true,"x":9,"y":9,"seq":2}"#)
            .is_none());
        assert!(protocol
            .receive(&bob, &sender, br#"{"pressed":true,"x":0,"y":0,"seq":1}"#)
            .is_none());
        assert!(protocol
            .receive(&bob, &sender, br#"{"pressed":true,"x":3,"y":3,"seq":3}"#)
            .is_some());

        assert_eq!(renderer.marks().len(), 2);
        assert_eq!(protocol.latest(&bob, &sender).map(|e| e.x), Some(3.0));
    }

    #[test]
    fn test_same_track_id_from_two_owners() {
        let (protocol, renderer) = protocol();
        let bob = ParticipantSid::from("PA_bob");
        let carol = ParticipantSid::from("PA_carol");
        let cursor = TrackId::from("cursor");

        for seq in 1..=3 {
            let payload = PointerPayload::new(true, seq as f64, 0.0).with_seq(seq);
            assert!(protocol
                .receive(&bob, &cursor, &payload.encode().unwrap())
                .is_some());
        }
        // carol's counter starts on its own
        let payload = PointerPayload::new(true, 50.0, 60.0).with_seq(1);
        assert!(protocol
            .receive(&carol, &cursor, &payload.encode().unwrap())
            .is_some());
        assert_eq!(renderer.marks().len(), 4);

        protocol.forget(&bob, &cursor);
        assert_eq!(protocol.latest(&bob, &cursor), None);
        assert_eq!(
            protocol.latest(&carol, &cursor).map(|e| (e.x, e.y)),
            Some((50.0, 60.0))
        );
    }

    #[test]
    fn test_local_echo_draws_before_send() {
        let (protocol, renderer) = protocol();
        assert!(matches!(
            protocol.send_local(true, 1.0, 1.0),
            Err(SessionError::NotConnected)
        ));

        let local = DataTrack::new("alice-cursor");
        protocol.set_local_track(Some(local.clone()));

        // no carrier yet: still drawn locally
        assert_eq!(protocol.send_local(true, 10.0, 20.0).unwrap(), 0);
        assert_eq!(
            renderer.calls(),
            vec![RenderCall::Mark(
                Surface::from("canvas"),
                color_for(&TrackId::from("alice-cursor")),
                10.0,
                20.0
            )]
        );

        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let _carrier = local.on_send(move |payload| {
            sink.lock().push(PointerPayload::decode(payload)?);
            Ok(())
        });
        assert_eq!(protocol.send_local(false, 11.0, 21.0).unwrap(), 1);

        let sent = sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].pressed);
        assert_eq!(sent[0].seq, Some(2));
        assert_eq!(protocol.latest_local().map(|e| e.x), Some(11.0));
        // released pointer adds no mark
        assert_eq!(renderer.marks().len(), 1);
    }

    #[test]
    fn test_reset_clears_local_track() {
        let (protocol, _renderer) = protocol();
        protocol.set_local_track(Some(DataTrack::new("alice-cursor")));
        assert_eq!(protocol.local_track_id(), Some(TrackId::from("alice-cursor")));

        protocol.reset();
        assert_eq!(protocol.local_track_id(), None);
    }
}
