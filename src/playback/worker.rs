//! Playback thread body
//!
//! The worker is a statum machine: it is created in `Spawned`, moves to
//! `Serving` once it runs on its own thread, and only a serving worker can
//! execute programs.

use super::controller::{ControllerShared, RunOutcome};
use super::program::{CompositeChunk, Program};
use super::PlaybackTiming;
use crate::hal::{HalError, StopMode, VibratorHal};
use crate::model::{Pattern, VibratorRef};
use statum::{machine, state, transition};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Spawned, // Built on the caller thread
    Serving, // Running on the vibrator thread
}

#[machine]
pub struct PlaybackWorker<WorkerState> {
    target: VibratorRef,
    shared: Arc<ControllerShared>,
    hal: Arc<dyn VibratorHal>,
    timing: PlaybackTiming,
}

impl<S: WorkerStateTrait> PlaybackWorker<S> {
    pub fn target(&self) -> VibratorRef {
        self.target
    }
}

impl PlaybackWorker<Spawned> {
    pub fn create(
        target: VibratorRef,
        shared: Arc<ControllerShared>,
        hal: Arc<dyn VibratorHal>,
        timing: PlaybackTiming,
    ) -> Self {
        debug!("Creating playback worker for vibrator {}", target);
        Self::builder()
            .target(target)
            .shared(shared)
            .hal(hal)
            .timing(timing)
            .build()
    }
}

#[transition]
impl PlaybackWorker<Spawned> {
    pub fn ready(self) -> PlaybackWorker<Serving> {
        info!("Playback thread for vibrator {} is up", self.target);
        self.transition()
    }
}

impl PlaybackWorker<Serving> {
    /// Runs jobs until shutdown is requested
    pub fn serve(self) {
        while let Some(program) = self.shared.next_job() {
            let outcome = if self.shared.is_cancelled() {
                RunOutcome::Skipped
            } else {
                match self.run(&program) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(
                            "Vibrator {}: {} run aborted: {}",
                            self.target,
                            program.mode(),
                            e
                        );
                        RunOutcome::Failed(e)
                    }
                }
            };
            debug!("Vibrator {}: run ended with {:?}", self.target, outcome);
            self.shared.finish(outcome);
        }
        info!("Playback thread for vibrator {} exiting", self.target);
    }

    fn run(&self, program: &Program) -> Result<RunOutcome, HalError> {
        let mode = program.stop_mode();
        let outcome = match program {
            Program::Once { duration_ms } => self.play_once(*duration_ms)?,
            Program::Preset {
                effect_id,
                intensity,
                loop_count,
                duration_ms,
            } => self.play_preset(effect_id, *intensity, *loop_count, *duration_ms, mode)?,
            Program::Hd { patterns } => self.play_hd(patterns, mode)?,
            Program::Composite { chunks, .. } => self.play_composite(chunks)?,
        };
        if outcome == RunOutcome::Cancelled {
            self.stop_cancelled(mode);
        }
        Ok(outcome)
    }

    /// Sleeps up to `duration_ms`; true if the run got cancelled
    fn wait(&self, duration_ms: u32) -> bool {
        self.shared
            .wait_cancelled(Duration::from_millis(u64::from(duration_ms)))
    }

    fn stop_cancelled(&self, mode: StopMode) {
        debug!("Vibrator {}: cancelled, stopping {}", self.target, mode);
        if let Err(e) = self.hal.stop(self.target, mode) {
            warn!("Vibrator {}: stop after cancel failed: {}", self.target, e);
        }
    }

    /// Stops a session that is still running, with bounded retry
    ///
    /// Returns true if the run got cancelled while retrying.
    fn force_stop_running(&self, mode: StopMode) -> bool {
        let mut attempts = 0;
        while self.hal.is_running(self.target) {
            if attempts >= self.timing.stop_retry_count {
                warn!(
                    "Vibrator {}: session still running after {} stop attempts",
                    self.target, attempts
                );
                break;
            }
            if let Err(e) = self.hal.stop(self.target, mode) {
                warn!("Vibrator {}: forced stop failed: {}", self.target, e);
            }
            attempts += 1;
            if self.shared.wait_cancelled(self.timing.stop_retry_interval()) {
                return true;
            }
        }
        false
    }

    fn play_once(&self, duration_ms: u32) -> Result<RunOutcome, HalError> {
        self.hal.start_once(self.target, duration_ms)?;
        if self.wait(duration_ms) {
            return Ok(RunOutcome::Cancelled);
        }
        Ok(RunOutcome::Completed)
    }

    fn play_preset(
        &self,
        effect_id: &str,
        intensity: i32,
        loop_count: u32,
        duration_ms: u32,
        mode: StopMode,
    ) -> Result<RunOutcome, HalError> {
        for iteration in 0..loop_count {
            if iteration > 0 {
                if self.shared.wait_cancelled(self.timing.settle_delay())
                    || self.force_stop_running(mode)
                {
                    return Ok(RunOutcome::Cancelled);
                }
            }
            debug!(
                "Vibrator {}: effect '{}' iteration {}/{}",
                self.target,
                effect_id,
                iteration + 1,
                loop_count
            );
            self.hal.start_effect(self.target, effect_id, intensity)?;
            if self.wait(duration_ms) {
                return Ok(RunOutcome::Cancelled);
            }
        }
        Ok(RunOutcome::Completed)
    }

    fn play_hd(&self, patterns: &[Pattern], mode: StopMode) -> Result<RunOutcome, HalError> {
        let mut previous_start = None;
        for pattern in patterns {
            let delay = match previous_start {
                None => pattern.start_time_ms,
                Some(previous) => pattern.start_time_ms.saturating_sub(previous),
            };
            previous_start = Some(pattern.start_time_ms);

            if self.wait(delay) || self.force_stop_running(mode) {
                return Ok(RunOutcome::Cancelled);
            }
            self.hal.play_pattern(self.target, pattern)?;
        }

        // hold Playing while the last pattern is on the actuator
        let tail = patterns.last().map(Pattern::span_ms).unwrap_or(0);
        if self.wait(tail) {
            return Ok(RunOutcome::Cancelled);
        }
        Ok(RunOutcome::Completed)
    }

    fn play_composite(&self, chunks: &[CompositeChunk]) -> Result<RunOutcome, HalError> {
        for (index, chunk) in chunks.iter().enumerate() {
            debug!(
                "Vibrator {}: composite chunk {}/{} ({} entries, {}ms)",
                self.target,
                index + 1,
                chunks.len(),
                chunk.effects.len(),
                chunk.wait_ms
            );
            self.hal.enable_composite(self.target, &chunk.effects)?;
            if self.wait(chunk.wait_ms) {
                return Ok(RunOutcome::Cancelled);
            }
        }
        Ok(RunOutcome::Completed)
    }
}
