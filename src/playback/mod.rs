//! Per-vibrator playback
//!
//! Every physical vibrator owns one [`PlaybackController`] with a dedicated
//! OS thread that is spawned on first use. The thread sleeps on a condition
//! variable between runs and inside every timed wait of a run, which makes
//! each wait a cancellation point.
//!
//! # State Machine
//!
//! ```text
//!            start()                     run finished / cancelled
//!   Idle ───────────────► Playing ──────────────────────────────► Idle
//!                            │                                     ▲
//!                            │ stop() / start() preempts           │
//!                            ▼                                     │
//!                        Stopping ─── worker tears hardware down ──┘
//! ```
//!
//! Only the worker thread moves a controller back to `Idle`; callers block
//! in `stop()` until it has done so.

mod controller;
mod pool;
mod program;
mod worker;

pub use controller::{ControllerShared, PlaybackController, PlaybackPhase, PlaybackState, RunOutcome};
pub use pool::ControllerPool;
pub use program::{plan_chunks, CompositeChunk, Program, MAX_COMPOSITE_CHUNK};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs of the playback threads
///
/// Shared by every controller of a pool. Read from the `[playback]` section
/// of the service config; missing keys keep their defaults.
///
/// # Performance Impact
///
/// - `settle_delay_ms`: gap between preset loop iterations; too low may restart before the effect decays
/// - `stop_retry_count` × `stop_retry_interval_ms`: upper bound a restart waits on a session that ignores stop
/// - `composite_chunk_size`: fewer entries per call means more hardware calls per pattern
///
/// # Examples
///
/// ```rust
/// use vibratord::playback::PlaybackTiming;
///
/// // Aggressive restarts on a fast actuator
/// let snappy = PlaybackTiming {
///     settle_delay_ms: 2,
///     stop_retry_count: 20,
///     stop_retry_interval_ms: 2,
///     ..PlaybackTiming::default()
/// };
/// assert_eq!(snappy.chunk_size(), 128);
///
/// // Out-of-range chunk sizes are clamped
/// let tiny = PlaybackTiming {
///     composite_chunk_size: 0,
///     ..PlaybackTiming::default()
/// };
/// assert_eq!(tiny.chunk_size(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackTiming {
    /// Pause between two iterations of a looping preset
    pub settle_delay_ms: u64,
    /// Stop attempts before giving up on a session that keeps running
    pub stop_retry_count: u32,
    /// Pause between two stop attempts
    ///
    /// Each pause is a cancellation point, so a new start never waits the
    /// full retry budget.
    pub stop_retry_interval_ms: u64,
    /// Composite entries per hardware call, at most 128
    pub composite_chunk_size: usize,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            settle_delay_ms: 5,
            stop_retry_count: 10,
            stop_retry_interval_ms: 5,
            composite_chunk_size: MAX_COMPOSITE_CHUNK,
        }
    }
}

impl PlaybackTiming {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stop_retry_interval(&self) -> Duration {
        Duration::from_millis(self.stop_retry_interval_ms)
    }

    /// Entries per composite call, within 1..=128
    pub fn chunk_size(&self) -> usize {
        self.composite_chunk_size.clamp(1, MAX_COMPOSITE_CHUNK)
    }
}
