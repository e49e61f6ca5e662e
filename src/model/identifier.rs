use serde::{Deserialize, Serialize};
use std::fmt;

/// Wildcard value for `device_id` and `vibrator_id`
pub const WILDCARD: i32 = -1;

/// Caller-supplied, possibly wildcarded, vibrator address
///
/// * `device_id == -1 && vibrator_id == -1` - all local vibrators
/// * `device_id == -1` only - the motor `vibrator_id` on the local device
/// * `vibrator_id == -1` only - every vibrator of `device_id`
/// * both set - one exact physical vibrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VibratorIdentifier {
    pub device_id: i32,
    pub vibrator_id: i32,
    pub position: i32,
    pub is_local: bool,
}

impl VibratorIdentifier {
    pub fn all_local() -> Self {
        Self {
            device_id: WILDCARD,
            vibrator_id: WILDCARD,
            position: 0,
            is_local: true,
        }
    }

    pub fn local_motor(vibrator_id: i32) -> Self {
        Self {
            vibrator_id,
            ..Self::all_local()
        }
    }

    pub fn device(device_id: i32) -> Self {
        Self {
            device_id,
            is_local: false,
            ..Self::all_local()
        }
    }

    pub fn exact(device_id: i32, vibrator_id: i32) -> Self {
        Self {
            device_id,
            vibrator_id,
            position: 0,
            is_local: false,
        }
    }

    pub fn has_device(&self) -> bool {
        self.device_id != WILDCARD
    }

    pub fn has_vibrator(&self) -> bool {
        self.vibrator_id != WILDCARD
    }
}

impl Default for VibratorIdentifier {
    fn default() -> Self {
        Self::all_local()
    }
}

impl fmt::Display for VibratorIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {} / vibrator {}", self.device_id, self.vibrator_id)
    }
}

/// Concrete address of one physical vibrator in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VibratorRef {
    pub device_id: i32,
    pub vibrator_id: i32,
}

impl VibratorRef {
    pub fn new(device_id: i32, vibrator_id: i32) -> Self {
        Self {
            device_id,
            vibrator_id,
        }
    }
}

impl fmt::Display for VibratorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.device_id, self.vibrator_id)
    }
}

/// Hardware capability flags of one vibrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VibratorCapability {
    pub supports_hd_streaming: bool,
    pub supports_preset_to_composite_mapping: bool,
    pub supports_time_delay_composite: bool,
}

impl VibratorCapability {
    pub fn hd() -> Self {
        Self {
            supports_hd_streaming: true,
            ..Self::default()
        }
    }

    pub fn time_delay() -> Self {
        Self {
            supports_time_delay_composite: true,
            ..Self::default()
        }
    }

    pub fn preset_mapping() -> Self {
        Self {
            supports_preset_to_composite_mapping: true,
            ..Self::default()
        }
    }

    /// Picks the custom-pattern path, HD > preset mapping > time delay
    pub fn custom_mode(&self) -> Option<super::CustomMode> {
        use super::CustomMode;
        if self.supports_hd_streaming {
            Some(CustomMode::Hd)
        } else if self.supports_preset_to_composite_mapping {
            Some(CustomMode::CompositeEffect)
        } else if self.supports_time_delay_composite {
            Some(CustomMode::CompositeTime)
        } else {
            None
        }
    }
}

/// Public description of a tracked vibrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibratorInfo {
    pub device_id: i32,
    pub vibrator_id: i32,
    pub device_name: String,
    pub supports_hd_haptic: bool,
    pub is_local: bool,
    pub position: i32,
}

impl VibratorInfo {
    pub fn vibrator_ref(&self) -> VibratorRef {
        VibratorRef::new(self.device_id, self.vibrator_id)
    }
}
