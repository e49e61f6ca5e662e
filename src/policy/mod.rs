//! System policy state and its subscription
//!
//! The admission path only ever reads the snapshot. It is loaded from the
//! configured [`PolicySource`] the first time anybody asks for it, and from
//! then on kept current by [`PolicySubscription`] applying push updates.
//!
//! ```text
//! settings store ─[SettingChange]→ PolicySubscription ─apply→ PolicyStore ◄─read─ AdmissionController
//!                  (mpsc channel)    (tokio task)                (RwLock)
//! ```

pub mod admission;

pub use admission::{AdmissionController, AdmissionDecision, CallerContext, IgnoreReason};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingerMode {
    Silent,
    Vibrate,
    #[default]
    Normal,
}

impl fmt::Display for RingerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RingerMode::Silent => f.write_str("silent"),
            RingerMode::Vibrate => f.write_str("vibrate"),
            RingerMode::Normal => f.write_str("normal"),
        }
    }
}

/// Current values of every setting admission depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySnapshot {
    pub device_muted: bool,
    pub do_not_disturb: bool,
    pub do_not_disturb_whitelist: Vec<String>,
    pub ringer_mode: RingerMode,
    pub feedback_enabled: bool,
    pub vibrate_when_ringing: bool,
    /// Packages that bypass the feedback toggle
    pub input_method_apps: Vec<String>,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            device_muted: false,
            do_not_disturb: false,
            do_not_disturb_whitelist: Vec::new(),
            ringer_mode: RingerMode::Normal,
            feedback_enabled: true,
            vibrate_when_ringing: true,
            input_method_apps: Vec::new(),
        }
    }
}

/// One push notification from the settings store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingChange {
    Muted(bool),
    DoNotDisturb(bool),
    DoNotDisturbWhitelist(Vec<String>),
    RingerMode(RingerMode),
    Feedback(bool),
    VibrateWhenRinging(bool),
    InputMethodApps(Vec<String>),
}

impl SettingChange {
    fn apply_to(self, snapshot: &mut PolicySnapshot) {
        match self {
            SettingChange::Muted(v) => snapshot.device_muted = v,
            SettingChange::DoNotDisturb(v) => snapshot.do_not_disturb = v,
            SettingChange::DoNotDisturbWhitelist(v) => snapshot.do_not_disturb_whitelist = v,
            SettingChange::RingerMode(v) => snapshot.ringer_mode = v,
            SettingChange::Feedback(v) => snapshot.feedback_enabled = v,
            SettingChange::VibrateWhenRinging(v) => snapshot.vibrate_when_ringing = v,
            SettingChange::InputMethodApps(v) => snapshot.input_method_apps = v,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Failed to read policy settings: {0}")]
    ReadError(String),
}

/// Where the initial policy values come from
pub trait PolicySource: Send + Sync + 'static {
    fn load(&self) -> Result<PolicySnapshot, PolicyError>;
}

/// Serves a fixed snapshot, usually the `[policy]` config section
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource(pub PolicySnapshot);

impl PolicySource for StaticPolicySource {
    fn load(&self) -> Result<PolicySnapshot, PolicyError> {
        Ok(self.0.clone())
    }
}

/// Lazily loaded, push-updated policy state
pub struct PolicyStore {
    source: Box<dyn PolicySource>,
    state: RwLock<Option<PolicySnapshot>>,
}

impl PolicyStore {
    pub fn new(source: impl PolicySource) -> Self {
        Self {
            source: Box::new(source),
            state: RwLock::new(None),
        }
    }

    fn load(&self) -> PolicySnapshot {
        match self.source.load() {
            Ok(snapshot) => {
                info!(
                    "Policy loaded: muted={}, dnd={}, ringer={}, feedback={}",
                    snapshot.device_muted,
                    snapshot.do_not_disturb,
                    snapshot.ringer_mode,
                    snapshot.feedback_enabled
                );
                snapshot
            }
            Err(e) => {
                warn!("{}, falling back to defaults", e);
                PolicySnapshot::default()
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs `f` against the current snapshot under the read lock
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&PolicySnapshot) -> R) -> R {
        {
            let guard = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snapshot) = guard.as_ref() {
                return f(snapshot);
            }
        }
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = guard.get_or_insert_with(|| self.load());
        f(snapshot)
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        self.with_snapshot(PolicySnapshot::clone)
    }

    pub fn apply(&self, change: SettingChange) {
        info!("Policy change: {:?}", change);
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let snapshot = guard.get_or_insert_with(|| self.load());
        change.apply_to(snapshot);
    }
}

/// Task applying settings-store notifications to a [`PolicyStore`]
pub struct PolicySubscription;

impl PolicySubscription {
    pub fn spawn(
        store: std::sync::Arc<PolicyStore>,
        mut updates: mpsc::Receiver<SettingChange>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Policy subscription started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Policy subscription cancelled");
                        break;
                    }
                    change = updates.recv() => {
                        match change {
                            Some(change) => store.apply(change),
                            None => {
                                debug!("Settings source closed, ending policy subscription");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }
}
