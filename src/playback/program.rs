use crate::codec::CompositeTransform;
use crate::error::VibratorError;
use crate::hal::{CompositeEffect, StopMode};
use crate::model::{
    CustomMode, Pattern, PlaybackMode, RequestMode, VibrateRequest, VibratorCapability,
};

/// Largest composite list a single hardware call accepts
pub const MAX_COMPOSITE_CHUNK: usize = 128;

/// One hardware call worth of composite entries and the time it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeChunk {
    pub effects: Vec<CompositeEffect>,
    pub wait_ms: u32,
}

/// Splits `effects` into chunks of at most `chunk_size` entries
pub fn plan_chunks(effects: Vec<CompositeEffect>, chunk_size: usize) -> Vec<CompositeChunk> {
    let chunk_size = chunk_size.clamp(1, MAX_COMPOSITE_CHUNK);
    effects
        .chunks(chunk_size)
        .map(|chunk| CompositeChunk {
            wait_ms: chunk.iter().map(CompositeEffect::delay_ms).sum(),
            effects: chunk.to_vec(),
        })
        .collect()
}

/// A request compiled for one particular vibrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    Once {
        duration_ms: u32,
    },
    Preset {
        effect_id: String,
        intensity: i32,
        loop_count: u32,
        duration_ms: u32,
    },
    Hd {
        patterns: Vec<Pattern>,
    },
    Composite {
        mode: CustomMode,
        chunks: Vec<CompositeChunk>,
    },
}

impl Program {
    /// Compiles `request` for a vibrator with `capability`
    ///
    /// `preset_duration_ms` is the library length of the requested effect and
    /// is used when the request does not carry its own duration.
    pub fn compile(
        request: &VibrateRequest,
        capability: VibratorCapability,
        preset_duration_ms: Option<u32>,
        transform: &dyn CompositeTransform,
        chunk_size: usize,
    ) -> Result<Program, VibratorError> {
        match request.mode {
            RequestMode::Once => Ok(Program::Once {
                duration_ms: request.duration_ms,
            }),
            RequestMode::PresetEffect => Ok(Program::Preset {
                effect_id: request.effect_id.clone(),
                intensity: request.intensity,
                loop_count: request.loop_count,
                duration_ms: if request.duration_ms > 0 {
                    request.duration_ms
                } else {
                    preset_duration_ms.unwrap_or(0)
                },
            }),
            RequestMode::CustomPattern => {
                let mode = capability.custom_mode().ok_or_else(|| {
                    VibratorError::NotSupported("custom patterns on this vibrator".to_string())
                })?;
                match mode {
                    CustomMode::Hd => Ok(Program::Hd {
                        patterns: request.patterns.clone(),
                    }),
                    CustomMode::CompositeEffect | CustomMode::CompositeTime => {
                        let effects = transform.transform(&request.patterns, mode)?;
                        Ok(Program::Composite {
                            mode,
                            chunks: plan_chunks(effects, chunk_size),
                        })
                    }
                }
            }
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        match self {
            Program::Once { .. } => PlaybackMode::Once,
            Program::Preset { .. } => PlaybackMode::Preset,
            Program::Hd { .. } => PlaybackMode::Custom(CustomMode::Hd),
            Program::Composite { mode, .. } => PlaybackMode::Custom(*mode),
        }
    }

    /// Hardware channel to tear down when the run is interrupted
    pub fn stop_mode(&self) -> StopMode {
        match self {
            Program::Once { .. } => StopMode::Once,
            Program::Preset { .. } => StopMode::Preset,
            Program::Hd { .. } => StopMode::HdPattern,
            Program::Composite { .. } => StopMode::Composite,
        }
    }
}
