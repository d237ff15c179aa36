//! The tracking session controller.
//!
//! Runs as a single task that owns all cycle state. Scheduler ticks, fix and
//! upload callbacks, and control commands all arrive in that task, so at most
//! one cycle is ever in progress and nothing else touches its state:
//!
//! ```text
//! Idle --tick--> AwaitingFix --fix--> AwaitingUpload --upload done--> Idle
//!                     |
//!                     +--no fix / store error--> Idle
//! ```
//!
//! Trip progress is written to the store as soon as a fix has been
//! accumulated, before the record is handed to the uploader.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::acquirer::{AcquireError, FixAcquirer, FixRequest};
use crate::db::SessionStore;
use crate::encoder::{self, RecordIdentity};
use crate::models::{CycleOutcome, CyclePhase, LocationFix, StatusResponse};
use crate::scheduler::Scheduler;
use crate::state::{self, StoredState, TrackingSession, TrackingSettings};
use crate::uploader::{UploadFailure, UploadSuccess, Uploader};
use crate::utils;
use crate::wake_lock::{WakeLock, WakeLocks};

const COMMAND_QUEUE: usize = 16;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub accuracy_threshold_m: f64,
    pub event_type: String,
    pub default_interval_seconds: u64,
    pub default_endpoint: String,
}

/// What the UI collaborator supplies when switching tracking on.
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub interval_seconds: Option<u64>,
    pub user_id: String,
    pub endpoint_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("interval must be between 1 and {} seconds", state::MAX_INTERVAL_SECONDS)]
    InvalidInterval,
    #[error("user id must not be empty")]
    MissingUserId,
    #[error("invalid collector endpoint {0:?}")]
    InvalidEndpoint(String),
    #[error("configuration store unavailable: {0:#}")]
    Store(anyhow::Error),
    #[error("tracking controller is not running")]
    ControllerGone,
}

type Reply = oneshot::Sender<Result<StatusResponse, ControlError>>;

pub enum Command {
    Enable { config: TrackingConfig, reply: Reply },
    Disable { reply: Reply },
    UpdateInterval { interval_seconds: u64, reply: Reply },
}

/// Completion callbacks of the fix acquirer and the uploader, tagged with
/// the cycle they belong to.
#[derive(Debug)]
pub enum CycleEvent {
    FixAvailable {
        cycle: u64,
        fix: LocationFix,
    },
    FixFailed {
        cycle: u64,
        error: AcquireError,
    },
    UploadComplete {
        cycle: u64,
        result: Result<UploadSuccess, UploadFailure>,
    },
}

struct ActiveCycle {
    id: u64,
    phase: CyclePhase,
    session: TrackingSession,
    settings: TrackingSettings,
    fix_request: Option<FixRequest>,
    upload: Option<JoinHandle<()>>,
    _wake_lock: WakeLock,
}

pub struct TrackingController {
    store: Arc<dyn SessionStore>,
    acquirer: FixAcquirer,
    uploader: Arc<dyn Uploader>,
    options: ControllerOptions,
    scheduler: Scheduler,
    wake_locks: WakeLocks,
    cycle: Option<ActiveCycle>,
    next_cycle_id: u64,
    events_tx: mpsc::UnboundedSender<CycleEvent>,
    events_rx: mpsc::UnboundedReceiver<CycleEvent>,
    status: StatusResponse,
    status_tx: watch::Sender<StatusResponse>,
}

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusResponse>,
}

impl ControllerHandle {
    pub async fn enable(&self, config: TrackingConfig) -> Result<StatusResponse, ControlError> {
        self.request(|reply| Command::Enable { config, reply }).await
    }

    pub async fn disable(&self) -> Result<StatusResponse, ControlError> {
        self.request(|reply| Command::Disable { reply }).await
    }

    pub async fn update_interval(
        &self,
        interval_seconds: u64,
    ) -> Result<StatusResponse, ControlError> {
        self.request(|reply| Command::UpdateInterval {
            interval_seconds,
            reply,
        })
        .await
    }

    pub fn status(&self) -> StatusResponse {
        self.status.borrow().clone()
    }

    async fn request(
        &self,
        command: impl FnOnce(Reply) -> Command,
    ) -> Result<StatusResponse, ControlError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ControlError::ControllerGone)?;
        response.await.map_err(|_| ControlError::ControllerGone)?
    }
}

impl TrackingController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        acquirer: FixAcquirer,
        uploader: Arc<dyn Uploader>,
        options: ControllerOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let status = StatusResponse {
            tracking: false,
            session_id: None,
            interval_seconds: options.default_interval_seconds,
            phase: CyclePhase::Idle,
            cumulative_distance_meters: 0.0,
            wake_locks: 0,
            last_cycle: None,
            last_cycle_at: None,
        };
        let (status_tx, _) = watch::channel(status.clone());
        Self {
            store,
            acquirer,
            uploader,
            options,
            scheduler: Scheduler::new(),
            wake_locks: WakeLocks::new(),
            cycle: None,
            next_cycle_id: 0,
            events_tx,
            events_rx,
            status,
            status_tx,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.cycle
            .as_ref()
            .map_or(CyclePhase::Idle, |cycle| cycle.phase)
    }

    pub fn status(&self) -> &StatusResponse {
        &self.status
    }

    /// Picks up a session that was being tracked when the process stopped.
    pub async fn resume(&mut self) -> anyhow::Result<()> {
        let stored = self.store.load().await?;
        self.adopt_stored(&stored);
        if let Some(session) = stored.active_session() {
            tracing::info!(
                session_id = %session.session_id,
                interval_seconds = session.interval_seconds,
                cumulative_distance_m = session.cumulative_distance_m,
                "Resuming tracking session"
            );
            self.scheduler
                .arm(Duration::from_secs(session.interval_seconds), true);
        }
        self.publish();
        Ok(())
    }

    /// Starts the controller task.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = ControllerHandle {
            commands: commands_tx,
            status: self.status_tx.subscribe(),
        };
        let task = tokio::spawn(self.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                _ = self.scheduler.tick() => {
                    self.on_tick().await;
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("Control channel closed, stopping tracking controller");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::Enable { config, reply } => (self.on_enable(config).await, reply),
            Command::Disable { reply } => (self.on_disable().await, reply),
            Command::UpdateInterval {
                interval_seconds,
                reply,
            } => (self.update_interval(interval_seconds).await, reply),
        };
        // The requester may have given up waiting; that is fine.
        let _ = reply.send(result);
    }

    pub async fn handle_event(&mut self, event: CycleEvent) {
        match event {
            CycleEvent::FixAvailable { cycle, fix } => self.on_fix_available(cycle, fix).await,
            CycleEvent::FixFailed { cycle, error } => self.on_fix_failed(cycle, error),
            CycleEvent::UploadComplete { cycle, result } => self.on_upload_complete(cycle, result),
        }
    }

    /// Starts a new session and arms the scheduler, first tick right away.
    pub async fn on_enable(
        &mut self,
        config: TrackingConfig,
    ) -> Result<StatusResponse, ControlError> {
        let interval_seconds = config
            .interval_seconds
            .unwrap_or(self.options.default_interval_seconds);
        if !state::is_valid_interval(interval_seconds) {
            return Err(ControlError::InvalidInterval);
        }
        let user_id = config.user_id.trim();
        if user_id.is_empty() {
            return Err(ControlError::MissingUserId);
        }
        let endpoint_url =
            utils::normalize_endpoint(&config.endpoint_url, &self.options.default_endpoint)
                .ok_or_else(|| ControlError::InvalidEndpoint(config.endpoint_url.clone()))?;

        // Whatever the previous session was doing is of no interest anymore.
        self.abandon_cycle();

        let settings = TrackingSettings {
            user_id: user_id.to_string(),
            endpoint_url,
            interval_seconds,
        };
        let session = TrackingSession::start(interval_seconds);
        self.store
            .start_session(&settings, &session)
            .await
            .map_err(ControlError::Store)?;

        tracing::info!(
            session_id = %session.session_id,
            user_id = %settings.user_id,
            endpoint = %settings.endpoint_url,
            interval_seconds,
            "Tracking enabled"
        );
        self.scheduler
            .arm(Duration::from_secs(interval_seconds), true);
        self.adopt_stored(&StoredState {
            settings,
            currently_tracking: true,
            session: Some(session),
        });
        self.publish();
        Ok(self.status.clone())
    }

    /// Stops the scheduler, abandons any cycle in progress and forgets the
    /// session.
    pub async fn on_disable(&mut self) -> Result<StatusResponse, ControlError> {
        self.scheduler.disarm();
        self.abandon_cycle();
        self.status.tracking = false;
        self.status.session_id = None;
        self.status.cumulative_distance_meters = 0.0;
        self.publish();

        self.store
            .clear_session()
            .await
            .map_err(ControlError::Store)?;
        tracing::info!("Tracking disabled");
        Ok(self.status.clone())
    }

    /// Changes the tick period. A running scheduler restarts its period now.
    pub async fn update_interval(
        &mut self,
        interval_seconds: u64,
    ) -> Result<StatusResponse, ControlError> {
        if !state::is_valid_interval(interval_seconds) {
            return Err(ControlError::InvalidInterval);
        }
        self.store
            .save_interval(interval_seconds)
            .await
            .map_err(ControlError::Store)?;
        tracing::info!(
            interval_seconds,
            previous = ?self.scheduler.period(),
            "Tracking interval updated"
        );
        if self.scheduler.is_armed() {
            self.scheduler
                .arm(Duration::from_secs(interval_seconds), false);
        }
        self.status.interval_seconds = interval_seconds;
        self.publish();
        Ok(self.status.clone())
    }

    /// Starts a cycle unless one is already running. Returns whether a fix
    /// was requested.
    pub async fn on_tick(&mut self) -> bool {
        if let Some(cycle) = &self.cycle {
            tracing::debug!(
                cycle = cycle.id,
                phase = ?cycle.phase,
                "Previous cycle still running, skipping tick"
            );
            return false;
        }

        let wake_lock = self.wake_locks.acquire();
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(error = %reason, "Cannot read tracking state, skipping tick");
                drop(wake_lock);
                self.record_outcome(CycleOutcome::StoreUnavailable { reason });
                return false;
            }
        };
        self.adopt_stored(&stored);
        let Some(session) = stored.active_session().cloned() else {
            tracing::info!("Tracking is off in the store, disarming scheduler");
            self.scheduler.disarm();
            self.publish();
            return false;
        };

        let id = self.next_cycle_id;
        self.next_cycle_id += 1;
        let fix_tx = self.events_tx.clone();
        let error_tx = self.events_tx.clone();
        let fix_request = self.acquirer.request_one_fix(
            self.options.accuracy_threshold_m,
            move |fix| {
                let _ = fix_tx.send(CycleEvent::FixAvailable { cycle: id, fix });
            },
            move |error| {
                let _ = error_tx.send(CycleEvent::FixFailed { cycle: id, error });
            },
        );

        tracing::debug!(cycle = id, session_id = %session.session_id, "Requesting fix");
        self.cycle = Some(ActiveCycle {
            id,
            phase: CyclePhase::AwaitingFix,
            session,
            settings: stored.settings,
            fix_request: Some(fix_request),
            upload: None,
            _wake_lock: wake_lock,
        });
        self.publish();
        true
    }

    /// Accumulates, persists, encodes and starts the upload, in that order.
    pub async fn on_fix_available(&mut self, cycle_id: u64, fix: LocationFix) {
        let Some(cycle) = self
            .cycle
            .as_mut()
            .filter(|cycle| cycle.id == cycle_id && cycle.phase == CyclePhase::AwaitingFix)
        else {
            tracing::debug!(cycle = cycle_id, "Dropping fix of a finished cycle");
            return;
        };
        if let Some(request) = cycle.fix_request.take() {
            request.cancel();
        }

        let increment_m = cycle.session.record_fix(fix.coordinates());
        match self.store.save_progress(&cycle.session).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(cycle = cycle_id, "Session ended while processing the fix, dropping it");
                self.finish_cycle(None);
                return;
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(cycle = cycle_id, error = %reason, "Cannot save trip progress, dropping fix");
                self.finish_cycle(Some(CycleOutcome::StoreUnavailable { reason }));
                return;
            }
        }

        let identity = RecordIdentity {
            user_id: cycle.settings.user_id.clone(),
            event_type: self.options.event_type.clone(),
        };
        let record = encoder::encode(&fix, &cycle.session, &identity, &chrono::Local);
        tracing::info!(
            cycle = cycle_id,
            latitude = fix.latitude,
            longitude = fix.longitude,
            accuracy_m = fix.accuracy_m,
            increment_m,
            cumulative_distance_m = cycle.session.cumulative_distance_m,
            "Got fix, uploading"
        );

        let uploader = self.uploader.clone();
        let endpoint = cycle.settings.endpoint_url.clone();
        let events = self.events_tx.clone();
        cycle.upload = Some(tokio::spawn(async move {
            let result = uploader.send(&record, &endpoint).await;
            let _ = events.send(CycleEvent::UploadComplete {
                cycle: cycle_id,
                result,
            });
        }));
        cycle.phase = CyclePhase::AwaitingUpload;
        let cumulative_distance_m = cycle.session.cumulative_distance_m;

        self.status.cumulative_distance_meters = cumulative_distance_m;
        self.publish();
    }

    pub fn on_fix_failed(&mut self, cycle_id: u64, error: AcquireError) {
        if !self.is_current(cycle_id, CyclePhase::AwaitingFix) {
            tracing::debug!(cycle = cycle_id, "Dropping fix error of a finished cycle");
            return;
        }
        tracing::warn!(cycle = cycle_id, error = %error, "No usable fix this tick");
        self.finish_cycle(Some(CycleOutcome::NoFix {
            reason: error.to_string(),
        }));
    }

    /// Ends the cycle whatever the outcome; the next tick is the retry.
    pub fn on_upload_complete(
        &mut self,
        cycle_id: u64,
        result: Result<UploadSuccess, UploadFailure>,
    ) {
        if !self.is_current(cycle_id, CyclePhase::AwaitingUpload) {
            tracing::debug!(cycle = cycle_id, "Dropping upload result of an abandoned cycle");
            return;
        }
        let outcome = match result {
            Ok(success) => {
                tracing::info!(cycle = cycle_id, status = success.status, "Location uploaded");
                CycleOutcome::Uploaded {
                    status: success.status,
                }
            }
            Err(failure) => {
                tracing::warn!(cycle = cycle_id, error = %failure, "Upload failed, data for this tick is dropped");
                CycleOutcome::UploadFailed {
                    reason: failure.to_string(),
                }
            }
        };
        self.finish_cycle(Some(outcome));
    }

    fn is_current(&self, cycle_id: u64, phase: CyclePhase) -> bool {
        self.cycle
            .as_ref()
            .is_some_and(|cycle| cycle.id == cycle_id && cycle.phase == phase)
    }

    fn finish_cycle(&mut self, outcome: Option<CycleOutcome>) {
        // Dropping the cycle cancels its fix request and releases its wake lock.
        if let Some(cycle) = self.cycle.take() {
            tracing::debug!(cycle = cycle.id, "Cycle finished");
        }
        match outcome {
            Some(outcome) => self.record_outcome(outcome),
            None => self.publish(),
        }
    }

    /// Drops the running cycle without waiting for its callbacks; any that
    /// still arrive carry a cycle id that no longer matches. An upload
    /// already under way is left to finish and its result ignored.
    fn abandon_cycle(&mut self) {
        if let Some(mut cycle) = self.cycle.take() {
            tracing::info!(cycle = cycle.id, phase = ?cycle.phase, "Abandoning cycle");
            if let Some(request) = cycle.fix_request.take() {
                request.cancel();
            }
            if cycle.upload.as_ref().is_some_and(|upload| !upload.is_finished()) {
                tracing::debug!(cycle = cycle.id, "Upload still in flight, its result will be ignored");
            }
        }
    }

    fn record_outcome(&mut self, outcome: CycleOutcome) {
        self.status.last_cycle = Some(outcome);
        self.status.last_cycle_at = Some(Utc::now());
        self.publish();
    }

    fn adopt_stored(&mut self, stored: &StoredState) {
        let session = stored.active_session();
        self.status.tracking = stored.currently_tracking;
        self.status.session_id = session.map(|s| s.session_id.clone());
        self.status.interval_seconds = stored.settings.interval_seconds;
        self.status.cumulative_distance_meters =
            session.map_or(0.0, |s| s.cumulative_distance_m);
    }

    fn publish(&mut self) {
        self.status.phase = self.phase();
        self.status.wake_locks = self.wake_locks.held();
        self.status_tx.send_replace(self.status.clone());
    }

    #[cfg(test)]
    pub(crate) async fn next_event(&mut self) -> CycleEvent {
        self.events_rx
            .recv()
            .await
            .expect("controller holds a sender")
    }
}
