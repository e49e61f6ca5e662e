//! In-memory vibrator HAL
//!
//! Keeps a device table, a preset effect library and one session per
//! vibrator whose lifetime is measured on the wall clock. Every call is
//! appended to a log so callers can inspect ordering afterwards.

use super::{
    CompositeEffect, DeviceDescriptor, EffectInfo, HalError, StopMode, VibratorHal,
};
use crate::model::{Pattern, VibratorCapability, VibratorRef};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalOperation {
    StartOnce,
    StartEffect,
    Stop,
    EnableComposite,
    PlayPattern,
}

/// Recorded hardware call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalCall {
    StartOnce {
        target: VibratorRef,
        duration_ms: u32,
    },
    StartEffect {
        target: VibratorRef,
        effect_id: String,
        intensity: i32,
    },
    Stop {
        target: VibratorRef,
        mode: StopMode,
    },
    EnableComposite {
        target: VibratorRef,
        entries: usize,
        delay_ms: u32,
    },
    PlayPattern {
        target: VibratorRef,
        start_time_ms: u32,
        events: usize,
    },
}

impl HalCall {
    pub fn target(&self) -> VibratorRef {
        match self {
            HalCall::StartOnce { target, .. }
            | HalCall::StartEffect { target, .. }
            | HalCall::Stop { target, .. }
            | HalCall::EnableComposite { target, .. }
            | HalCall::PlayPattern { target, .. } => *target,
        }
    }

    pub fn operation(&self) -> HalOperation {
        match self {
            HalCall::StartOnce { .. } => HalOperation::StartOnce,
            HalCall::StartEffect { .. } => HalOperation::StartEffect,
            HalCall::Stop { .. } => HalOperation::Stop,
            HalCall::EnableComposite { .. } => HalOperation::EnableComposite,
            HalCall::PlayPattern { .. } => HalOperation::PlayPattern,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.operation() == HalOperation::Stop
    }
}

#[derive(Debug)]
struct Session {
    mode: StopMode,
    until: Instant,
}

/// Calls kept for inspection; older ones are dropped
pub const DEFAULT_CALL_LOG_CAPACITY: usize = 4096;

#[derive(Debug, Default)]
struct SimState {
    devices: Vec<DeviceDescriptor>,
    effects: HashMap<String, u32>,
    sessions: HashMap<VibratorRef, Session>,
    calls: VecDeque<(Instant, HalCall)>,
    call_log_capacity: usize,
    failures: HashMap<(VibratorRef, HalOperation), u32>,
    ignored_stops: HashMap<VibratorRef, u32>,
}

impl SimState {
    fn knows(&self, target: VibratorRef) -> bool {
        self.devices
            .iter()
            .any(|device| device.refs().any(|r| r == target))
    }

    fn enter(&mut self, call: HalCall) -> Result<(), HalError> {
        let target = call.target();
        let operation = call.operation();
        if self.calls.len() >= self.call_log_capacity {
            self.calls.pop_front();
        }
        if self.call_log_capacity > 0 {
            self.calls.push_back((Instant::now(), call));
        }

        if !self.knows(target) {
            return Err(HalError::Unavailable(target));
        }
        if let Some(remaining) = self.failures.get_mut(&(target, operation)) {
            if *remaining > 0 {
                *remaining -= 1;
                warn!("Injected failure for {:?} on vibrator {}", operation, target);
                return Err(HalError::Rejected(-1));
            }
        }
        Ok(())
    }

    fn begin_session(&mut self, target: VibratorRef, mode: StopMode, length_ms: u32) {
        self.sessions.insert(
            target,
            Session {
                mode,
                until: Instant::now() + Duration::from_millis(u64::from(length_ms)),
            },
        );
    }
}

pub struct SimulatedHal {
    state: Mutex<SimState>,
}

impl Default for SimulatedHal {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHal {
    pub fn new() -> Self {
        let mut state = SimState {
            call_log_capacity: DEFAULT_CALL_LOG_CAPACITY,
            ..SimState::default()
        };
        state.effects.insert("haptic.clock.timer".to_string(), 2000);
        state.effects.insert("haptic.default.effect".to_string(), 804);
        Self {
            state: Mutex::new(state),
        }
    }

    /// Keeps at most `capacity` calls in the log; 0 disables recording
    pub fn with_call_log_capacity(self, capacity: usize) -> Self {
        {
            let mut state = self.state();
            state.call_log_capacity = capacity;
            let excess = state.calls.len().saturating_sub(capacity);
            state.calls.drain(..excess);
        }
        self
    }

    pub fn with_device(self, device: DeviceDescriptor) -> Self {
        self.add_device(device);
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, device: DeviceDescriptor) {
        let mut state = self.state();
        state.devices.retain(|d| d.device_id != device.device_id);
        debug!(
            "Simulated device {} ({}) with {} vibrators",
            device.device_id,
            device.device_name,
            device.vibrators.len()
        );
        state.devices.push(device);
    }

    pub fn remove_device(&self, device_id: i32) -> Option<DeviceDescriptor> {
        let mut state = self.state();
        let index = state.devices.iter().position(|d| d.device_id == device_id)?;
        let device = state.devices.remove(index);
        state.sessions.retain(|r, _| r.device_id != device_id);
        Some(device)
    }

    pub fn register_effect(&self, effect_id: impl Into<String>, duration_ms: u32) {
        self.state().effects.insert(effect_id.into(), duration_ms);
    }

    /// Makes the next `count` calls of `operation` on `target` fail
    pub fn fail_next(&self, target: VibratorRef, operation: HalOperation, count: u32) {
        self.state().failures.insert((target, operation), count);
    }

    /// Makes the next `count` stop calls on `target` leave the session running
    pub fn ignore_stops(&self, target: VibratorRef, count: u32) {
        self.state().ignored_stops.insert(target, count);
    }

    pub fn calls(&self) -> Vec<HalCall> {
        self.state().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn calls_for(&self, target: VibratorRef) -> Vec<HalCall> {
        self.state()
            .calls
            .iter()
            .filter(|(_, c)| c.target() == target)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Calls with their time offset from the first recorded call
    pub fn timed_calls(&self) -> Vec<(Duration, HalCall)> {
        let state = self.state();
        let Some((origin, _)) = state.calls.front() else {
            return Vec::new();
        };
        let origin = *origin;
        state
            .calls
            .iter()
            .map(|(at, c)| (at.duration_since(origin), c.clone()))
            .collect()
    }
}

impl VibratorHal for SimulatedHal {
    fn start_once(&self, target: VibratorRef, duration_ms: u32) -> Result<(), HalError> {
        let mut state = self.state();
        state.enter(HalCall::StartOnce {
            target,
            duration_ms,
        })?;
        state.begin_session(target, StopMode::Once, duration_ms);
        Ok(())
    }

    fn start_effect(
        &self,
        target: VibratorRef,
        effect_id: &str,
        intensity: i32,
    ) -> Result<(), HalError> {
        let mut state = self.state();
        state.enter(HalCall::StartEffect {
            target,
            effect_id: effect_id.to_string(),
            intensity,
        })?;
        let duration_ms = *state
            .effects
            .get(effect_id)
            .ok_or_else(|| HalError::UnsupportedEffect(effect_id.to_string()))?;
        state.begin_session(target, StopMode::Preset, duration_ms);
        Ok(())
    }

    fn stop(&self, target: VibratorRef, mode: StopMode) -> Result<(), HalError> {
        let mut state = self.state();
        state.enter(HalCall::Stop { target, mode })?;

        if let Some(remaining) = state.ignored_stops.get_mut(&target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(());
            }
        }

        let mismatch = state
            .sessions
            .get(&target)
            .filter(|session| session.until > Instant::now() && session.mode != mode)
            .map(|session| session.mode);
        if let Some(running) = mismatch {
            return Err(HalError::StopFailed(format!(
                "running session is {}, stop requested for {}",
                running, mode
            )));
        }
        state.sessions.remove(&target);
        Ok(())
    }

    fn is_running(&self, target: VibratorRef) -> bool {
        let state = self.state();
        let held = state
            .ignored_stops
            .get(&target)
            .is_some_and(|remaining| *remaining > 0);
        state
            .sessions
            .get(&target)
            .is_some_and(|session| held || session.until > Instant::now())
    }

    fn enable_composite(
        &self,
        target: VibratorRef,
        chunk: &[CompositeEffect],
    ) -> Result<(), HalError> {
        let delay_ms: u32 = chunk.iter().map(CompositeEffect::delay_ms).sum();
        let mut state = self.state();
        state.enter(HalCall::EnableComposite {
            target,
            entries: chunk.len(),
            delay_ms,
        })?;
        state.begin_session(target, StopMode::Composite, delay_ms);
        Ok(())
    }

    fn play_pattern(&self, target: VibratorRef, pattern: &Pattern) -> Result<(), HalError> {
        let mut state = self.state();
        state.enter(HalCall::PlayPattern {
            target,
            start_time_ms: pattern.start_time_ms,
            events: pattern.events.len(),
        })?;
        state.begin_session(target, StopMode::HdPattern, pattern.span_ms());
        Ok(())
    }

    fn capability(&self, target: VibratorRef) -> Result<VibratorCapability, HalError> {
        self.state()
            .devices
            .iter()
            .find(|device| device.refs().any(|r| r == target))
            .map(|device| device.capability)
            .ok_or(HalError::Unavailable(target))
    }

    fn vibrator_list(&self) -> Result<Vec<DeviceDescriptor>, HalError> {
        Ok(self.state().devices.clone())
    }

    fn effect_info(&self, target: VibratorRef, effect_id: &str) -> Result<EffectInfo, HalError> {
        let state = self.state();
        if !state.knows(target) {
            return Err(HalError::Unavailable(target));
        }
        Ok(match state.effects.get(effect_id) {
            Some(duration_ms) => EffectInfo {
                supported: true,
                duration_ms: *duration_ms,
            },
            None => EffectInfo::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::VibratorSlot;

    fn device() -> DeviceDescriptor {
        DeviceDescriptor {
            device_id: 1,
            device_name: "sim".to_string(),
            is_local: true,
            vibrators: vec![VibratorSlot {
                vibrator_id: 0,
                position: 0,
            }],
            capability: VibratorCapability::hd(),
        }
    }

    #[test]
    fn test_stop_mode_must_match_session() {
        let hal = SimulatedHal::new().with_device(device());
        let target = VibratorRef::new(1, 0);

        hal.start_once(target, 1_000).unwrap();
        assert!(hal.is_running(target));
        assert!(matches!(
            hal.stop(target, StopMode::Preset),
            Err(HalError::StopFailed(_))
        ));
        hal.stop(target, StopMode::Once).unwrap();
        assert!(!hal.is_running(target));
    }

    #[test]
    fn test_call_log_is_bounded() {
        let hal = SimulatedHal::new()
            .with_device(device())
            .with_call_log_capacity(3);
        let target = VibratorRef::new(1, 0);
        for duration_ms in 1..=5 {
            hal.start_once(target, duration_ms).unwrap();
        }
        assert_eq!(
            hal.calls(),
            (3..=5)
                .map(|duration_ms| HalCall::StartOnce {
                    target,
                    duration_ms
                })
                .collect::<Vec<_>>()
        );

        let silent = SimulatedHal::new()
            .with_device(device())
            .with_call_log_capacity(0);
        silent.start_once(target, 10).unwrap();
        assert!(silent.calls().is_empty());
        assert!(silent.timed_calls().is_empty());
    }

    #[test]
    fn test_unknown_vibrator_is_unavailable() {
        let hal = SimulatedHal::new().with_device(device());
        let result = hal.start_once(VibratorRef::new(9, 0), 10);
        assert_eq!(result, Err(HalError::Unavailable(VibratorRef::new(9, 0))));
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let hal = SimulatedHal::new().with_device(device());
        let target = VibratorRef::new(1, 0);
        hal.fail_next(target, HalOperation::StartOnce, 1);

        assert!(hal.start_once(target, 10).is_err());
        assert!(hal.start_once(target, 10).is_ok());
        assert_eq!(hal.calls_for(target).len(), 2);
    }

    #[test]
    fn test_ignored_stop_keeps_session_running() {
        let hal = SimulatedHal::new().with_device(device());
        let target = VibratorRef::new(1, 0);
        hal.start_once(target, 5).unwrap();
        hal.ignore_stops(target, 2);

        hal.stop(target, StopMode::Once).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(hal.is_running(target));
    }

    #[test]
    fn test_effect_library() {
        let hal = SimulatedHal::new().with_device(device());
        let target = VibratorRef::new(1, 0);
        let info = hal.effect_info(target, "haptic.clock.timer").unwrap();
        assert!(info.supported);
        assert_eq!(info.duration_ms, 2000);
        assert!(!hal.effect_info(target, "haptic.nope").unwrap().supported);
    }
}
