use super::program::Program;
use super::worker::PlaybackWorker;
use super::PlaybackTiming;
use crate::error::VibratorError;
use crate::hal::{HalError, VibratorHal};
use crate::model::{PlaybackMode, VibrateRequest, VibratorIdentifier, VibratorRef};
use crate::policy::AdmissionDecision;
use chrono::{DateTime, Local};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Playing,
    Stopping,
}

/// How the most recent run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(HalError),
    /// Cancelled before the worker picked it up
    Skipped,
}

/// What a vibrator is currently playing
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub identifier: VibratorIdentifier,
    pub request: Arc<VibrateRequest>,
    pub mode: PlaybackMode,
    pub started_at: DateTime<Local>,
}

#[derive(Debug)]
struct Slot {
    phase: PlaybackPhase,
    state: Option<PlaybackState>,
    job: Option<Program>,
    cancel: bool,
    shutdown: bool,
    last_outcome: Option<RunOutcome>,
    finished_runs: u64,
}

/// State shared between a controller and its worker thread
#[derive(Debug)]
pub struct ControllerShared {
    slot: Mutex<Slot>,
    /// Wakes the worker: new job, cancellation or shutdown
    signal: Condvar,
    /// Wakes callers waiting for `Idle`
    settled: Condvar,
}

impl ControllerShared {
    fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                phase: PlaybackPhase::Idle,
                state: None,
                job: None,
                cancel: false,
                shutdown: false,
                last_outcome: None,
                finished_runs: 0,
            }),
            signal: Condvar::new(),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `duration`; returns true if the run was cancelled meanwhile
    pub(crate) fn wait_cancelled(&self, duration: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .signal
            .wait_timeout_while(guard, duration, |slot| !slot.cancel && !slot.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        guard.cancel || guard.shutdown
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        let slot = self.lock();
        slot.cancel || slot.shutdown
    }

    /// Blocks until a job is recorded; `None` once shutdown was requested
    pub(crate) fn next_job(&self) -> Option<Program> {
        let guard = self.lock();
        let mut guard = self
            .signal
            .wait_while(guard, |slot| !slot.shutdown && slot.job.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if guard.shutdown {
            return None;
        }
        guard.job.take()
    }

    /// Ends the current run and returns to `Idle`
    pub(crate) fn finish(&self, outcome: RunOutcome) {
        let mut slot = self.lock();
        slot.phase = PlaybackPhase::Idle;
        slot.state = None;
        slot.job = None;
        slot.cancel = false;
        slot.last_outcome = Some(outcome);
        slot.finished_runs += 1;
        self.settled.notify_all();
    }
}

/// Exclusive owner of one vibrator's hardware channel
///
/// All hardware calls for the vibrator are made from the controller's own
/// thread. Callers only record a job and return, except that starting over a
/// running vibration waits until the worker has torn the old one down.
///
/// # Lifecycle
///
/// - The worker thread is spawned by the first `start` and respawned if it died
/// - `shutdown` cancels the run, joins the thread and refuses every later start
/// - Dropping the controller shuts it down
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use vibratord::hal::{DeviceDescriptor, SimulatedHal, VibratorSlot};
/// use vibratord::model::{VibrateRequest, VibratorCapability, VibratorIdentifier, VibratorRef};
/// use vibratord::playback::{PlaybackController, PlaybackPhase, PlaybackTiming, Program};
///
/// let hal = Arc::new(SimulatedHal::new().with_device(DeviceDescriptor {
///     device_id: 1,
///     device_name: "builtin".to_string(),
///     is_local: true,
///     vibrators: vec![VibratorSlot { vibrator_id: 0, position: 0 }],
///     capability: VibratorCapability::hd(),
/// }));
/// let controller = PlaybackController::new(VibratorRef::new(1, 0), hal, PlaybackTiming::default());
///
/// controller.start(
///     VibratorIdentifier::all_local(),
///     Arc::new(VibrateRequest::once(5_000)),
///     Program::Once { duration_ms: 5_000 },
/// )?;
/// assert_eq!(controller.phase(), PlaybackPhase::Playing);
///
/// // blocks until the worker is idle again
/// assert!(controller.stop());
/// assert!(controller.is_idle());
/// # Ok::<(), vibratord::VibratorError>(())
/// ```
pub struct PlaybackController {
    target: VibratorRef,
    shared: Arc<ControllerShared>,
    hal: Arc<dyn VibratorHal>,
    timing: PlaybackTiming,
    /// Serializes admission + start on this vibrator
    gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn new(target: VibratorRef, hal: Arc<dyn VibratorHal>, timing: PlaybackTiming) -> Self {
        Self {
            target,
            shared: Arc::new(ControllerShared::new()),
            hal,
            timing,
            gate: Mutex::new(()),
            worker: Mutex::new(None),
        }
    }

    pub fn target(&self) -> VibratorRef {
        self.target
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.shared.lock().phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == PlaybackPhase::Idle
    }

    pub fn current(&self) -> Option<PlaybackState> {
        self.shared.lock().state.clone()
    }

    pub fn last_outcome(&self) -> Option<RunOutcome> {
        self.shared.lock().last_outcome.clone()
    }

    pub fn finished_runs(&self) -> u64 {
        self.shared.lock().finished_runs
    }

    pub fn has_worker(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stops whatever is playing, then starts `program`
    pub fn start(
        &self,
        identifier: VibratorIdentifier,
        request: Arc<VibrateRequest>,
        program: Program,
    ) -> Result<(), VibratorError> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.start_exclusive(identifier, request, program)
    }

    /// Runs `decide` against the current request and starts on `Admit`
    ///
    /// Decision and start happen under the same per-vibrator gate, so no
    /// other start can slip in between.
    pub fn admit_and_start(
        &self,
        identifier: VibratorIdentifier,
        request: Arc<VibrateRequest>,
        program: Program,
        decide: impl FnOnce(Option<&VibrateRequest>) -> AdmissionDecision,
    ) -> Result<AdmissionDecision, VibratorError> {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current();
        let decision = decide(current.as_ref().map(|state| state.request.as_ref()));
        if decision.is_admit() {
            self.start_exclusive(identifier, request, program)?;
        }
        Ok(decision)
    }

    fn start_exclusive(
        &self,
        identifier: VibratorIdentifier,
        request: Arc<VibrateRequest>,
        program: Program,
    ) -> Result<(), VibratorError> {
        if self.shared.lock().shutdown {
            return Err(self.retired(identifier));
        }
        self.ensure_worker()?;

        let mut slot = self.shared.lock();
        if slot.shutdown {
            return Err(self.retired(identifier));
        }
        if slot.phase != PlaybackPhase::Idle {
            info!("Vibrator {}: preempting running vibration", self.target);
            slot = self.quiesce(slot);
        }

        let mode = program.mode();
        info!(
            "Vibrator {}: starting {} for {} (session {})",
            self.target, mode, request.usage, request.session_id
        );
        slot.state = Some(PlaybackState {
            identifier,
            request,
            mode,
            started_at: Local::now(),
        });
        slot.job = Some(program);
        slot.cancel = false;
        slot.phase = PlaybackPhase::Playing;
        drop(slot);

        self.shared.signal.notify_all();
        Ok(())
    }

    fn retired(&self, identifier: VibratorIdentifier) -> VibratorError {
        debug!("Vibrator {}: controller retired, refusing start", self.target);
        VibratorError::NotFound(identifier)
    }

    /// Requests `Stopping` and blocks until the worker is back to `Idle`
    fn quiesce<'a>(&'a self, mut slot: MutexGuard<'a, Slot>) -> MutexGuard<'a, Slot> {
        slot.phase = PlaybackPhase::Stopping;
        slot.cancel = true;
        self.shared.signal.notify_all();
        self.shared
            .settled
            .wait_while(slot, |slot| slot.phase != PlaybackPhase::Idle)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stops the running vibration; false if the controller was idle
    pub fn stop(&self) -> bool {
        self.stop_if(|_| true)
    }

    /// Stops the running vibration if `matches` accepts it
    pub fn stop_if(&self, matches: impl FnOnce(&PlaybackState) -> bool) -> bool {
        let slot = self.shared.lock();
        let running = match (&slot.phase, &slot.state) {
            (PlaybackPhase::Idle, _) | (_, None) => false,
            (_, Some(state)) => matches(state),
        };
        if !running {
            return false;
        }
        debug!("Vibrator {}: stop requested", self.target);
        drop(self.quiesce(slot));
        true
    }

    fn ensure_worker(&self) -> Result<(), VibratorError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
            warn!("Vibrator {}: playback thread exited, respawning", self.target);
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
            let mut slot = self.shared.lock();
            if slot.phase != PlaybackPhase::Idle {
                slot.phase = PlaybackPhase::Idle;
                slot.state = None;
                slot.job = None;
                slot.cancel = false;
                slot.last_outcome = Some(RunOutcome::Skipped);
            }
        }

        let playback_worker = PlaybackWorker::create(
            self.target,
            self.shared.clone(),
            self.hal.clone(),
            self.timing.clone(),
        );
        let handle = thread::Builder::new()
            .name(format!("vibrator-{}", self.target))
            .spawn(move || playback_worker.ready().serve())
            .map_err(|e| {
                VibratorError::ThreadError(format!(
                    "Failed to spawn playback thread for {}: {}",
                    self.target, e
                ))
            })?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stops playback and joins the worker thread
    ///
    /// Does not wait for an in-flight admission; a start that lands after
    /// this point is refused with `NotFound` and the controller stays `Idle`.
    pub fn shutdown(&self) {
        {
            let mut slot = self.shared.lock();
            slot.shutdown = true;
            if slot.phase != PlaybackPhase::Idle {
                slot.phase = PlaybackPhase::Stopping;
                slot.cancel = true;
            }
        }
        self.shared.signal.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Vibrator {}: playback thread panicked", self.target);
            }
            debug!("Vibrator {}: playback thread joined", self.target);
        }

        // a job the worker never picked up
        let mut slot = self.shared.lock();
        if slot.phase != PlaybackPhase::Idle {
            slot.phase = PlaybackPhase::Idle;
            slot.state = None;
            slot.job = None;
            slot.cancel = false;
            slot.last_outcome = Some(RunOutcome::Skipped);
        }
        drop(slot);
        self.shared.settled.notify_all();
    }

    pub fn is_retired(&self) -> bool {
        self.shared.lock().shutdown
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
