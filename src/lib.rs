//! Vibrator admission, scheduling and playback service
//!
//! ```text
//! caller ─► Dispatcher ─► VibratorRegistry::resolve ─► [VibratorRef]
//!               │
//!               ├─► AdmissionController::decide   (policy + running request)
//!               └─► PlaybackController::start     (one OS thread per vibrator)
//!                         │
//!                         └─► VibratorHal
//! ```

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod hal;
pub mod model;
pub mod playback;
pub mod policy;
pub mod registry;
pub mod service;

pub use config::ServiceConfig;
pub use dispatcher::{AdmissionOutcome, Dispatcher, StopFilter, VibratorOutcome};
pub use error::VibratorError;
pub use service::VibratorService;
