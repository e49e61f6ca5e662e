//! Vibration domain model
//!
//! Shared value types passed between the registry, the admission controller,
//! the playback controllers and the dispatcher.
//!
//! ```text
//! VibratorIdentifier ──resolve──► [VibratorRef] ──capability──► VibratorCapability
//!                                       │                              │
//! VibrateRequest ───────────────────────┴──────► Program ◄── PlaybackMode
//! ```

pub mod identifier;
pub mod request;

pub use identifier::{VibratorCapability, VibratorIdentifier, VibratorInfo, VibratorRef, WILDCARD};
pub use request::{
    CurvePoint, CustomMode, Event, EventKind, Pattern, PlaybackMode, RequestLimits, RequestMode,
    Usage, VibrateRequest,
};
