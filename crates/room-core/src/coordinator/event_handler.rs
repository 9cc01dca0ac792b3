//! Event handling implementation for SessionCoordinator

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::transport::{RemoteParticipantSnapshot, TransportEvent};
use crate::types::TrackPublicationState;

use super::events::{CoordinatorEvent, DisconnectReason};
use super::session::SessionHandle;
use super::SessionCoordinator;

impl SessionCoordinator {
    /// Per-session loop applying live transport events in arrival order
    ///
    /// Ends when the session is torn down locally (`shutdown`), or runs the
    /// cleanup path itself when the transport disconnects or its event
    /// stream closes.
    pub(crate) async fn run_event_loop(
        self: Arc<Self>,
        session: SessionHandle,
        attempt: u64,
        shutdown: CancellationToken,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        debug!("Starting event loop for session {}", attempt);

        let reason = loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Event loop for session {} stopped", attempt);
                    return;
                }
                event = events.recv() => event,
            };

            match event {
                Some(TransportEvent::Disconnected { reason }) => {
                    break DisconnectReason::Transport(reason);
                }
                Some(event) => {
                    let _processing = session.processing();
                    if shutdown.is_cancelled() {
                        return;
                    }
                    self.handle_event(&session, event);
                }
                None => {
                    break DisconnectReason::Transport("event stream closed".to_string());
                }
            }
        };

        info!("Event loop for session {} ended: {}", attempt, reason);
        self.end_session(attempt, reason).await;
    }

    /// Replay the room contents found at join time
    pub(crate) fn populate(
        &self,
        session: &SessionHandle,
        shutdown: &CancellationToken,
        snapshot: Vec<RemoteParticipantSnapshot>,
    ) {
        let _processing = session.processing();
        if shutdown.is_cancelled() {
            return;
        }

        debug!("Populating session from {} present participants", snapshot.len());
        for event in snapshot_events(snapshot) {
            self.handle_event(session, event);
        }
    }

    /// Apply one transport event to the registries and notify the UI
    pub(crate) fn handle_event(&self, session: &SessionHandle, event: TransportEvent) {
        trace!("Handling transport event: {:?}", event);
        let participants = session.registry();
        let tracks = session.tracks();

        match event {
            TransportEvent::ParticipantConnected { identity, sid } => {
                if let Some(participant) = participants.on_join(identity, sid) {
                    self.emit(CoordinatorEvent::ParticipantJoined { participant });
                }
            }

            TransportEvent::ParticipantDisconnected { sid } => match participants.on_leave(&sid) {
                Some(departure) => {
                    for transition in departure
                        .unpublished
                        .iter()
                        .filter(|t| t.from == Some(TrackPublicationState::Subscribed))
                    {
                        self.emit(CoordinatorEvent::TrackUnsubscribed {
                            sid: transition.sid.clone(),
                            track_id: transition.descriptor.id.clone(),
                        });
                    }
                    self.emit(CoordinatorEvent::ParticipantLeft {
                        participant: departure.participant,
                    });
                }
                None => debug!("Leave of participant {} that is not present", sid),
            },

            TransportEvent::TrackPublished { sid, descriptor } => {
                if let Some(transition) = tracks.on_published(&sid, descriptor) {
                    if transition.to == TrackPublicationState::Subscribed {
                        self.emit(CoordinatorEvent::TrackSubscribed {
                            sid: transition.sid,
                            descriptor: transition.descriptor,
                        });
                    }
                }
            }

            TransportEvent::TrackSubscribed { sid, track } => {
                if let Some(transition) = tracks.on_subscribed(&sid, track) {
                    self.emit(CoordinatorEvent::TrackSubscribed {
                        sid: transition.sid,
                        descriptor: transition.descriptor,
                    });
                }
            }

            TransportEvent::TrackUnsubscribed { sid, track_id } => {
                if let Some(transition) = tracks.on_unsubscribed(&sid, &track_id) {
                    self.emit(CoordinatorEvent::TrackUnsubscribed {
                        sid: transition.sid,
                        track_id: transition.descriptor.id,
                    });
                }
            }

            TransportEvent::TrackUnpublished { sid, descriptor } => {
                if let Some(transition) = tracks.on_unpublished(&sid, &descriptor) {
                    if transition.from == Some(TrackPublicationState::Subscribed) {
                        self.emit(CoordinatorEvent::TrackUnsubscribed {
                            sid: transition.sid,
                            track_id: transition.descriptor.id,
                        });
                    }
                }
            }

            TransportEvent::Disconnected { reason } => {
                debug!("Ignoring disconnect notice outside the event loop: {}", reason);
            }
        }
    }
}

fn snapshot_events(snapshot: Vec<RemoteParticipantSnapshot>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    for remote in snapshot {
        events.push(TransportEvent::ParticipantConnected {
            identity: remote.identity,
            sid: remote.sid.clone(),
        });
        for publication in remote.publications {
            events.push(TransportEvent::TrackPublished {
                sid: remote.sid.clone(),
                descriptor: publication.descriptor,
            });
            if let Some(track) = publication.subscribed {
                events.push(TransportEvent::TrackSubscribed {
                    sid: remote.sid.clone(),
                    track,
                });
            }
        }
    }
    events
}
