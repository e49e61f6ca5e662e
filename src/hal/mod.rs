//! Hardware abstraction layer
//!
//! Every call blocks with bounded latency. Implementations must be shareable
//! between the per-vibrator playback threads; a single vibrator is never
//! addressed by two threads at once.
//!
//! ```text
//! PlaybackController(dev-vib) ──► VibratorHal ──► driver / simulation
//! ```

pub mod simulated;

use crate::model::{Pattern, VibratorCapability, VibratorRef};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use simulated::{HalCall, HalOperation, SimulatedHal};

/// Errors reported by a hardware call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("Hardware rejected the call with code {0}")]
    Rejected(i32),

    #[error("Vibrator {0} is not available")]
    Unavailable(VibratorRef),

    #[error("Effect not supported: {0}")]
    UnsupportedEffect(String),

    #[error("Failed to stop vibrator: {0}")]
    StopFailed(String),
}

/// Hardware channel a stop call tears down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopMode {
    Once,
    Preset,
    HdPattern,
    Composite,
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopMode::Once => f.write_str("once"),
            StopMode::Preset => f.write_str("preset"),
            StopMode::HdPattern => f.write_str("hd"),
            StopMode::Composite => f.write_str("composite"),
        }
    }
}

/// One discrete unit of a composite effect list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeEffect {
    /// Timed segment: wait `delay_ms`, then vibrate for `time_ms`
    Time {
        delay_ms: u32,
        time_ms: u32,
        intensity: i32,
        frequency: i32,
    },
    /// Native primitive; effect id 0 ends the sequence
    Primitive {
        delay_ms: u32,
        effect_id: u32,
        intensity: i32,
    },
}

impl CompositeEffect {
    pub fn delay_ms(&self) -> u32 {
        match self {
            CompositeEffect::Time { delay_ms, .. } | CompositeEffect::Primitive { delay_ms, .. } => {
                *delay_ms
            }
        }
    }
}

/// Motor slot on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibratorSlot {
    pub vibrator_id: i32,
    #[serde(default)]
    pub position: i32,
}

/// A device with its vibrators, as reported by enumeration or a plug event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: i32,
    pub device_name: String,
    pub is_local: bool,
    pub vibrators: Vec<VibratorSlot>,
    #[serde(default)]
    pub capability: VibratorCapability,
}

impl DeviceDescriptor {
    pub fn refs(&self) -> impl Iterator<Item = VibratorRef> + '_ {
        self.vibrators
            .iter()
            .map(move |slot| VibratorRef::new(self.device_id, slot.vibrator_id))
    }
}

/// Preset effect library entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectInfo {
    pub supported: bool,
    pub duration_ms: u32,
}

/// Consumed hardware interface
pub trait VibratorHal: Send + Sync + 'static {
    fn start_once(&self, target: VibratorRef, duration_ms: u32) -> Result<(), HalError>;

    fn start_effect(&self, target: VibratorRef, effect_id: &str, intensity: i32)
        -> Result<(), HalError>;

    fn stop(&self, target: VibratorRef, mode: StopMode) -> Result<(), HalError>;

    fn is_running(&self, target: VibratorRef) -> bool;

    /// Plays at most one chunk of composite entries
    fn enable_composite(&self, target: VibratorRef, chunk: &[CompositeEffect])
        -> Result<(), HalError>;

    fn play_pattern(&self, target: VibratorRef, pattern: &Pattern) -> Result<(), HalError>;

    fn capability(&self, target: VibratorRef) -> Result<VibratorCapability, HalError>;

    fn vibrator_list(&self) -> Result<Vec<DeviceDescriptor>, HalError>;

    fn effect_info(&self, target: VibratorRef, effect_id: &str) -> Result<EffectInfo, HalError>;
}
