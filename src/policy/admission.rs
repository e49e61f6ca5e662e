//! Admission decisions
//!
//! Checks run in a fixed order and the first match wins:
//!
//! ```text
//! muted ─► [user gates: dnd ─► ringer silent ─► vibrate-when-ringing ─► feedback]
//!       ─► idle? Admit ─► running alarm ─► running repeat ─► unknown usage ─► Admit
//! ```
//!
//! The user gates are skipped only for trusted system callers that also flag
//! the request as system usage.

use super::{PolicySnapshot, PolicyStore, RingerMode};
use crate::model::{Usage, VibrateRequest};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreReason {
    Muted,
    DoNotDisturb,
    RingerSilent,
    VibrateWhenRingingOff,
    FeedbackOff,
    LowerPriorityThanAlarm,
    LowerPriorityThanRepeating,
    UnknownPriority,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            IgnoreReason::Muted => "device is muted",
            IgnoreReason::DoNotDisturb => "do not disturb is active",
            IgnoreReason::RingerSilent => "ringer mode is silent",
            IgnoreReason::VibrateWhenRingingOff => "vibrate when ringing is off",
            IgnoreReason::FeedbackOff => "haptic feedback is off",
            IgnoreReason::LowerPriorityThanAlarm => "an alarm is vibrating",
            IgnoreReason::LowerPriorityThanRepeating => "a repeating effect is vibrating",
            IgnoreReason::UnknownPriority => "unknown usage cannot preempt",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    Ignore(IgnoreReason),
}

impl AdmissionDecision {
    pub fn is_admit(&self) -> bool {
        matches!(self, AdmissionDecision::Admit)
    }
}

/// Who is calling, as established by the caller bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallerContext {
    pub is_system_caller: bool,
}

impl CallerContext {
    pub fn system() -> Self {
        Self {
            is_system_caller: true,
        }
    }

    pub fn application() -> Self {
        Self {
            is_system_caller: false,
        }
    }
}

#[derive(Clone)]
pub struct AdmissionController {
    policy: Arc<PolicyStore>,
}

impl AdmissionController {
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Arc<PolicyStore> {
        &self.policy
    }

    /// Decides `request` against the request currently running on the vibrator
    pub fn decide(
        &self,
        request: &VibrateRequest,
        caller: &CallerContext,
        current: Option<&VibrateRequest>,
    ) -> AdmissionDecision {
        let decision = self
            .policy
            .with_snapshot(|policy| evaluate(request, caller, current, policy));
        debug!(
            "Admission for {} request from '{}': {:?}",
            request.usage, request.package_name, decision
        );
        decision
    }
}

/// Pure decision function behind [`AdmissionController::decide`]
pub fn evaluate(
    request: &VibrateRequest,
    caller: &CallerContext,
    current: Option<&VibrateRequest>,
    policy: &PolicySnapshot,
) -> AdmissionDecision {
    let usage = request.usage;

    if usage.is_alerting() && policy.device_muted {
        return AdmissionDecision::Ignore(IgnoreReason::Muted);
    }

    if !(caller.is_system_caller && request.system_usage) {
        if let Some(reason) = user_gate(request, policy) {
            return AdmissionDecision::Ignore(reason);
        }
    }

    let Some(current) = current else {
        return AdmissionDecision::Admit;
    };
    if current.usage == Usage::Alarm {
        return AdmissionDecision::Ignore(IgnoreReason::LowerPriorityThanAlarm);
    }
    if current.is_repeating() {
        return AdmissionDecision::Ignore(IgnoreReason::LowerPriorityThanRepeating);
    }
    if current.usage != usage && usage == Usage::Unknown {
        return AdmissionDecision::Ignore(IgnoreReason::UnknownPriority);
    }
    AdmissionDecision::Admit
}

fn user_gate(request: &VibrateRequest, policy: &PolicySnapshot) -> Option<IgnoreReason> {
    let usage = request.usage;

    if policy.do_not_disturb
        && matches!(usage, Usage::Ring | Usage::Notification)
        && !policy
            .do_not_disturb_whitelist
            .iter()
            .any(|package| *package == request.package_name)
    {
        return Some(IgnoreReason::DoNotDisturb);
    }
    if policy.ringer_mode == RingerMode::Silent && usage.is_alerting() {
        return Some(IgnoreReason::RingerSilent);
    }
    if !policy.vibrate_when_ringing
        && policy.ringer_mode == RingerMode::Normal
        && matches!(usage, Usage::Ring | Usage::Communication)
    {
        return Some(IgnoreReason::VibrateWhenRingingOff);
    }
    if !policy.feedback_enabled
        && usage.is_feedback()
        && !policy
            .input_method_apps
            .iter()
            .any(|package| *package == request.package_name)
    {
        return Some(IgnoreReason::FeedbackOff);
    }
    None
}
