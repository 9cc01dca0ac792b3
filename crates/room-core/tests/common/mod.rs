//! Shared helpers for the room-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use huddle_room_core::{
    CoordinatorConfig, CoordinatorEvent, DisconnectReason, MediaTransport, MemoryRoom, Renderer,
    Result, SessionConfig, SessionCoordinator, SessionCoordinatorBuilder,
    StaticCredentialProvider, Subscription, Track, TrackDescriptor, TransportSession,
};
use huddle_room_core::transport::{ConnectOptions, TransportConnection};

pub use huddle_room_core::render::testing::{RecordingRenderer, RenderCall};

pub const ROOM: &str = "lobby";

/// Collects every coordinator event
pub struct EventLog {
    events: Arc<Mutex<Vec<CoordinatorEvent>>>,
    _subscription: Subscription,
}

impl EventLog {
    pub fn attach(coordinator: &SessionCoordinator) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let subscription = coordinator.subscribe(move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
        Self {
            events,
            _subscription: subscription,
        }
    }

    pub fn events(&self) -> Vec<CoordinatorEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn disconnects(&self) -> Vec<DisconnectReason> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                CoordinatorEvent::Disconnected { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }

    /// Short names of the events, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events()
            .iter()
            .map(|e| match e {
                CoordinatorEvent::ParticipantJoined { .. } => "joined",
                CoordinatorEvent::ParticipantLeft { .. } => "left",
                CoordinatorEvent::TrackSubscribed { .. } => "subscribed",
                CoordinatorEvent::TrackUnsubscribed { .. } => "unsubscribed",
                CoordinatorEvent::Disconnected { .. } => "disconnected",
            })
            .collect()
    }
}

/// [`MemoryRoom`] whose `connect_session` waits for [`open`](Self::open)
/// and which counts session disconnects
#[derive(Clone)]
pub struct GatedTransport {
    pub room: MemoryRoom,
    gate: Arc<Notify>,
    entered: Arc<Notify>,
    disconnects: Arc<AtomicUsize>,
}

impl GatedTransport {
    pub fn new(room: MemoryRoom) -> Self {
        Self {
            room,
            gate: Arc::new(Notify::new()),
            entered: Arc::new(Notify::new()),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Let one pending (or the next) connect through
    pub fn open(&self) {
        self.gate.notify_one();
    }

    /// Wait until a connect reached the gate
    pub async fn entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("connect never reached the transport");
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for GatedTransport {
    async fn acquire_local_tracks(&self, config: &SessionConfig) -> Result<Vec<Track>> {
        self.room.acquire_local_tracks(config).await
    }

    async fn release_local_tracks(&self, tracks: Vec<Track>) {
        self.room.release_local_tracks(tracks).await
    }

    async fn connect_session(
        &self,
        token: String,
        options: ConnectOptions,
    ) -> Result<TransportConnection> {
        self.entered.notify_one();
        self.gate.notified().await;

        let mut connection = self.room.connect_session(token, options).await?;
        connection.session = Arc::new(CountingSession {
            inner: connection.session,
            disconnects: self.disconnects.clone(),
        });
        Ok(connection)
    }
}

struct CountingSession {
    inner: Arc<dyn TransportSession>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportSession for CountingSession {
    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.inner.disconnect().await
    }
}

pub fn coordinator(
    transport: Arc<dyn MediaTransport>,
    renderer: Arc<dyn Renderer>,
) -> Arc<SessionCoordinator> {
    coordinator_with(CoordinatorConfig::new(ROOM), transport, renderer)
}

pub fn coordinator_with(
    config: CoordinatorConfig,
    transport: Arc<dyn MediaTransport>,
    renderer: Arc<dyn Renderer>,
) -> Arc<SessionCoordinator> {
    SessionCoordinatorBuilder::new()
        .with_config(config)
        .with_transport(transport)
        .with_credentials(Arc::new(StaticCredentialProvider::new("test-token")))
        .with_renderer(renderer)
        .build()
        .expect("valid coordinator configuration")
}

/// Join config with one data track named `{identity}-pointer`
pub fn member(identity: &str) -> SessionConfig {
    SessionConfig::new(identity, identity.to_uppercase())
        .with_track(TrackDescriptor::data(format!("{}-pointer", identity)))
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
