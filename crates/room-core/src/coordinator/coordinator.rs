//! Core SessionCoordinator structure, connect and disconnect

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{EventChannel, Subscription};
use crate::config::CoordinatorConfig;
use crate::credentials::CredentialProvider;
use crate::errors::{ConnectFailureReason, Result, SessionError, StateConflict};
use crate::participant::ParticipantRegistry;
use crate::pointer::PointerBroadcast;
use crate::render::Renderer;
use crate::track::{Track, TrackRegistry};
use crate::transport::{ConnectOptions, MediaTransport, TransportConnection, TransportSession};
use crate::types::{
    Participant, ParticipantSid, PointerEvent, SessionConfig, SessionState, TrackId,
    TrackPublicationState,
};

use super::events::{CoordinatorEvent, DisconnectReason};
use super::session::SessionHandle;

/// An installed session and everything it owns
struct ActiveSession {
    attempt: u64,
    handle: SessionHandle,
    transport_session: Arc<dyn TransportSession>,
    local_tracks: Vec<Track>,
    /// Stops the session's event loop
    shutdown: CancellationToken,
}

enum Phase {
    Idle,
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    Connected(ActiveSession),
    Disconnecting {
        attempt: u64,
    },
    Disconnected,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::Connected(_) => SessionState::Connected,
            Phase::Disconnecting { .. } => SessionState::Disconnecting,
            Phase::Disconnected => SessionState::Disconnected,
        }
    }
}

/// What `disconnect()` found to tear down
enum Teardown {
    CancelAttempt(u64),
    Session(ActiveSession),
}

/// Top-level session state machine
///
/// Owns at most one session at a time together with its participant and
/// track registries. The UI layer drives it through [`connect`](Self::connect)
/// and [`disconnect`](Self::disconnect) and observes it through
/// [`subscribe`](Self::subscribe).
///
/// ```text
/// Idle -> Connecting -> Connected -> Disconnecting -> Disconnected
///              |                                        ^    |
///              +-------- failure / cancellation --------+    |
///                                       connect() again <----+
/// ```
pub struct SessionCoordinator {
    config: CoordinatorConfig,
    transport: Arc<dyn MediaTransport>,
    credentials: Arc<dyn CredentialProvider>,
    renderer: Arc<dyn Renderer>,
    pointer: Arc<PointerBroadcast>,
    events: EventChannel<CoordinatorEvent>,
    phase: Mutex<Phase>,
    next_attempt: AtomicU64,
}

impl SessionCoordinator {
    pub(crate) fn new(
        config: CoordinatorConfig,
        transport: Arc<dyn MediaTransport>,
        credentials: Arc<dyn CredentialProvider>,
        renderer: Arc<dyn Renderer>,
    ) -> Arc<Self> {
        let pointer = Arc::new(PointerBroadcast::new(
            renderer.clone(),
            config.canvas_surface.clone(),
        ));

        Arc::new(Self {
            events: EventChannel::new(format!("coordinator:{}", config.room_name)),
            config,
            transport,
            credentials,
            renderer,
            pointer,
            phase: Mutex::new(Phase::Idle),
            next_attempt: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.phase.lock().state()
    }

    /// The installed session, if connected
    pub fn session(&self) -> Option<SessionHandle> {
        match &*self.phase.lock() {
            Phase::Connected(active) => Some(active.handle.clone()),
            _ => None,
        }
    }

    /// Register a UI event handler
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&CoordinatorEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Local pointer update: drawn immediately, then broadcast on the local
    /// data track
    pub fn send_pointer(&self, pressed: bool, x: f64, y: f64) -> Result<usize> {
        if !matches!(&*self.phase.lock(), Phase::Connected(_)) {
            return Err(SessionError::NotConnected);
        }
        self.pointer.send_local(pressed, x, y)
    }

    /// Most recent pointer event from participant `sid`'s data track
    pub fn latest_pointer(
        &self,
        sid: &ParticipantSid,
        track_id: &TrackId,
    ) -> Option<PointerEvent> {
        self.pointer.latest(sid, track_id)
    }

    /// Most recent pointer event sent by the local participant
    pub fn latest_local_pointer(&self) -> Option<PointerEvent> {
        self.pointer.latest_local()
    }

    /// Join the configured room
    ///
    /// Fails with a [`StateConflict`] while another attempt is in flight or a
    /// session is installed. Any other failure, including cancellation by
    /// [`disconnect`](Self::disconnect), is a
    /// [`SessionError::ConnectFailure`] and leaves the coordinator
    /// `Disconnected` with all local tracks released.
    pub async fn connect(self: &Arc<Self>, config: SessionConfig) -> Result<SessionHandle> {
        let (attempt, cancel) = self.begin_connect()?;
        info!(
            "Connect attempt {}: '{}' joining room '{}'",
            attempt, config.identity, self.config.room_name
        );

        match self.establish(attempt, &cancel, config).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.connect_failed(attempt, &e);
                Err(e)
            }
        }
    }

    /// Cancel a connect attempt in flight
    ///
    /// Returns false if no attempt was pending. The cancelled `connect()`
    /// call fails with [`ConnectFailureReason::Cancelled`]; a session the
    /// transport produces afterwards is disconnected, never installed.
    pub fn cancel_pending(&self) -> bool {
        let cancelled = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Disconnected) {
                Phase::Connecting { attempt, cancel } => {
                    cancel.cancel();
                    Some(attempt)
                }
                other => {
                    *phase = other;
                    None
                }
            }
        };

        match cancelled {
            Some(attempt) => {
                self.attempt_cancelled(attempt);
                true
            }
            None => false,
        }
    }

    /// Leave the room, or cancel a pending connect
    ///
    /// A no-op without events when idle, disconnected or already
    /// disconnecting. For a connected session the transport is asked to tear
    /// down first; local cleanup happens whether or not that succeeds, and a
    /// transport error is returned afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        let teardown = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Disconnected) {
                Phase::Connecting { attempt, cancel } => {
                    cancel.cancel();
                    Some(Teardown::CancelAttempt(attempt))
                }
                Phase::Connected(active) => {
                    *phase = Phase::Disconnecting {
                        attempt: active.attempt,
                    };
                    Some(Teardown::Session(active))
                }
                other => {
                    *phase = other;
                    None
                }
            }
        };

        match teardown {
            None => {
                debug!("disconnect() in state {}: nothing to do", self.state());
                Ok(())
            }
            Some(Teardown::CancelAttempt(attempt)) => {
                self.attempt_cancelled(attempt);
                Ok(())
            }
            Some(Teardown::Session(active)) => {
                info!("Disconnecting session {}", active.attempt);
                active.handle.set_state(SessionState::Disconnecting);
                active.shutdown.cancel();

                let result = active.transport_session.disconnect().await;
                if let Err(e) = &result {
                    warn!("Transport teardown of session {} failed: {}", active.attempt, e);
                }

                self.teardown(active, DisconnectReason::ClientInitiated).await;
                result
            }
        }
    }

    /// End the session `attempt` on the transport's initiative
    ///
    /// Ignored if that session is no longer installed.
    pub(crate) async fn end_session(&self, attempt: u64, reason: DisconnectReason) {
        let active = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Disconnected) {
                Phase::Connected(active) if active.attempt == attempt => {
                    *phase = Phase::Disconnecting { attempt };
                    active
                }
                other => {
                    *phase = other;
                    return;
                }
            }
        };

        warn!("Session {} ended by transport: {}", attempt, reason);
        active.handle.set_state(SessionState::Disconnecting);
        active.shutdown.cancel();
        if let Err(e) = active.transport_session.disconnect().await {
            debug!("Transport teardown after remote disconnect failed: {}", e);
        }

        self.teardown(active, reason).await;
    }

    /// The single cleanup path every installed session goes through
    async fn teardown(&self, active: ActiveSession, reason: DisconnectReason) {
        let ActiveSession {
            attempt,
            handle,
            local_tracks,
            shutdown,
            ..
        } = active;

        shutdown.cancel();
        let cleared = {
            let _processing = handle.processing();
            handle.registry().clear().len()
        };
        self.pointer.reset();
        self.release(local_tracks).await;

        handle.set_state(SessionState::Disconnected);
        *self.phase.lock() = Phase::Disconnected;

        info!(
            "Session {} in room '{}' ended ({}), {} participants cleared",
            attempt,
            handle.room_name(),
            reason,
            cleared
        );
        self.events.publish(CoordinatorEvent::Disconnected { reason });
    }

    fn begin_connect(&self) -> Result<(u64, CancellationToken)> {
        let mut phase = self.phase.lock();
        match &*phase {
            Phase::Connecting { .. } => Err(StateConflict::AlreadyConnecting.into()),
            Phase::Connected(_) => Err(StateConflict::AlreadyConnected.into()),
            Phase::Disconnecting { .. } => Err(StateConflict::Disconnecting.into()),
            Phase::Idle | Phase::Disconnected => {
                let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                *phase = Phase::Connecting {
                    attempt,
                    cancel: cancel.clone(),
                };
                Ok((attempt, cancel))
            }
        }
    }

    async fn establish(
        self: &Arc<Self>,
        attempt: u64,
        cancel: &CancellationToken,
        config: SessionConfig,
    ) -> Result<SessionHandle> {
        let deadline = connect_deadline(Instant::now(), self.config.connect_timeout());

        let token = self
            .guarded(
                cancel,
                deadline,
                self.credentials.fetch_token(&config.identity),
                |e| ConnectFailureReason::TokenUnavailable(failure_message(e)),
            )
            .await?;

        let local_tracks = self
            .guarded(
                cancel,
                deadline,
                self.transport.acquire_local_tracks(&config),
                |e| ConnectFailureReason::LocalMediaUnavailable(failure_message(e)),
            )
            .await?;
        debug!("Attempt {}: acquired {} local tracks", attempt, local_tracks.len());

        let options = ConnectOptions {
            room_name: self.config.room_name.clone(),
            identity: config.identity.clone(),
            display_name: config.display_name.clone(),
            tracks: local_tracks.clone(),
        };
        let transport = Arc::clone(&self.transport);
        let mut connecting =
            tokio::spawn(async move { transport.connect_session(token, options).await });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectFailureReason::Cancelled),
            _ = sleep_until(deadline) => Err(ConnectFailureReason::TimedOut(self.config.connect_timeout_secs)),
            joined = &mut connecting => Ok(joined),
        };

        let connection = match outcome {
            Ok(Ok(Ok(connection))) => connection,
            Ok(Ok(Err(e))) => {
                self.release(local_tracks).await;
                return Err(SessionError::connect_failure(
                    ConnectFailureReason::TransportRejected(failure_message(e)),
                ));
            }
            Ok(Err(join_error)) => {
                self.release(local_tracks).await;
                return Err(SessionError::connect_failure(
                    ConnectFailureReason::TransportRejected(format!(
                        "connect task failed: {}",
                        join_error
                    )),
                ));
            }
            Err(reason) => {
                reap_pending(attempt, connecting);
                self.release(local_tracks).await;
                return Err(SessionError::connect_failure(reason));
            }
        };

        self.install(attempt, config, local_tracks, connection).await
    }

    /// Make the connected session the active one, unless the attempt lost
    /// against cancellation in the meantime
    async fn install(
        self: &Arc<Self>,
        attempt: u64,
        config: SessionConfig,
        local_tracks: Vec<Track>,
        connection: TransportConnection,
    ) -> Result<SessionHandle> {
        let TransportConnection {
            session: transport_session,
            room_name,
            local_sid,
            snapshot,
            events,
        } = connection;

        let tracks = Arc::new(TrackRegistry::new(
            self.renderer.clone(),
            self.pointer.clone(),
        ));
        let participants = Arc::new(ParticipantRegistry::new(tracks));

        let pointer_track = config.data_track().map(|d| d.id.clone());
        let mut local = Participant::new(config.identity, local_sid);
        for track in &local_tracks {
            local
                .tracks
                .insert(track.id().clone(), TrackPublicationState::Published);
        }
        let local_data = pointer_track.and_then(|id| {
            local_tracks
                .iter()
                .filter_map(Track::as_data)
                .find(|t| *t.id() == id)
                .cloned()
        });

        let handle = SessionHandle::new(room_name, local, participants);
        let shutdown = CancellationToken::new();

        let lost = {
            let mut phase = self.phase.lock();
            let current = matches!(
                &*phase,
                Phase::Connecting { attempt: a, cancel } if *a == attempt && !cancel.is_cancelled()
            );
            if current {
                self.pointer.set_local_track(local_data);
                *phase = Phase::Connected(ActiveSession {
                    attempt,
                    handle: handle.clone(),
                    transport_session: transport_session.clone(),
                    local_tracks,
                    shutdown: shutdown.clone(),
                });
                None
            } else {
                Some(local_tracks)
            }
        };

        if let Some(local_tracks) = lost {
            info!(
                "Attempt {} was cancelled while the transport connected, tearing the session down",
                attempt
            );
            reap_session(attempt, transport_session);
            self.release(local_tracks).await;
            return Err(SessionError::connect_failure(ConnectFailureReason::Cancelled));
        }

        info!(
            "Session {} connected to room '{}' as {}",
            attempt,
            handle.room_name(),
            handle.local_participant().sid
        );

        self.populate(&handle, &shutdown, snapshot);
        tokio::spawn(Arc::clone(self).run_event_loop(handle.clone(), attempt, shutdown, events));

        Ok(handle)
    }

    fn connect_failed(&self, attempt: u64, error: &SessionError) {
        let reason = error
            .connect_reason()
            .cloned()
            .unwrap_or_else(|| ConnectFailureReason::TransportRejected(error.to_string()));

        let ended = {
            let mut phase = self.phase.lock();
            let current = matches!(&*phase, Phase::Connecting { attempt: a, .. } if *a == attempt);
            if current {
                *phase = Phase::Disconnected;
            }
            current
        };

        if ended {
            warn!("Connect attempt {} failed: {}", attempt, reason);
            self.events.publish(CoordinatorEvent::Disconnected {
                reason: DisconnectReason::ConnectFailed(reason),
            });
        }
    }

    fn attempt_cancelled(&self, attempt: u64) {
        info!("Connect attempt {} cancelled", attempt);
        self.events.publish(CoordinatorEvent::Disconnected {
            reason: DisconnectReason::ConnectFailed(ConnectFailureReason::Cancelled),
        });
    }

    /// Run one connect step, racing cancellation and the attempt deadline
    async fn guarded<T, F, E>(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        step: F,
        on_error: E,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        E: FnOnce(SessionError) -> ConnectFailureReason,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(SessionError::connect_failure(ConnectFailureReason::Cancelled))
            }
            _ = sleep_until(deadline) => Err(SessionError::connect_failure(
                ConnectFailureReason::TimedOut(self.config.connect_timeout_secs),
            )),
            result = step => result.map_err(|e| SessionError::connect_failure(on_error(e))),
        }
    }

    async fn release(&self, tracks: Vec<Track>) {
        if tracks.is_empty() {
            return;
        }
        debug!("Releasing {} local tracks", tracks.len());
        self.transport.release_local_tracks(tracks).await;
    }

    pub(crate) fn emit(&self, event: CoordinatorEvent) {
        self.events.publish(event);
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("room_name", &self.config.room_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Roughly 30 years, used when the configured timeout overflows `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn connect_deadline(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn failure_message(error: SessionError) -> String {
    match error {
        SessionError::TokenUnavailable { message }
        | SessionError::Transport { message }
        | SessionError::Internal { message } => message,
        other => other.to_string(),
    }
}

/// Disconnect whatever a connect task still in flight produces
fn reap_pending(attempt: u64, connecting: JoinHandle<Result<TransportConnection>>) {
    tokio::spawn(async move {
        match connecting.await {
            Ok(Ok(connection)) => {
                info!("Attempt {}: late session arrived, disconnecting it", attempt);
                if let Err(e) = connection.session.disconnect().await {
                    warn!("Attempt {}: disconnecting late session failed: {}", attempt, e);
                }
            }
            Ok(Err(e)) => debug!("Attempt {}: abandoned connect failed: {}", attempt, e),
            Err(e) => debug!("Attempt {}: abandoned connect task ended: {}", attempt, e),
        }
    });
}

fn reap_session(attempt: u64, session: Arc<dyn TransportSession>) {
    tokio::spawn(async move {
        if let Err(e) = session.disconnect().await {
            warn!("Attempt {}: disconnecting unwanted session failed: {}", attempt, e);
        }
    });
}
