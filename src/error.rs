//! Crate-wide error taxonomy
//!
//! `Ignored` and `DeviceError` are per-vibrator outcomes; the dispatcher only
//! surfaces one when no resolved vibrator was admitted.

use crate::codec::TransformError;
use crate::hal::HalError;
use crate::model::{VibratorIdentifier, VibratorRef};
use crate::policy::IgnoreReason;

#[derive(Debug, thiserror::Error)]
pub enum VibratorError {
    /// Malformed request, rejected before any side effect
    #[error("Invalid parameter: {0}")]
    ParameterError(String),

    /// Policy or priority denial
    #[error("Vibration ignored: {0}")]
    Ignored(IgnoreReason),

    #[error("Device error on vibrator {vibrator}: {source}")]
    DeviceError {
        vibrator: VibratorRef,
        #[source]
        source: HalError,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("No vibrator matches {0}")]
    NotFound(VibratorIdentifier),

    /// Controller thread could not be spawned or joined
    #[error("Playback thread error: {0}")]
    ThreadError(String),
}

impl VibratorError {
    pub fn is_ignored(&self) -> bool {
        matches!(self, VibratorError::Ignored(_))
    }
}

impl From<TransformError> for VibratorError {
    fn from(e: TransformError) -> Self {
        VibratorError::ParameterError(e.to_string())
    }
}
