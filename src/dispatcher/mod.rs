//! Request dispatch across vibrators
//!
//! ```text
//! startVibration(identifier, request)
//!   │ validate
//!   ├─► registry.resolve(identifier) ──► [VibratorRef]      (none: NotFound)
//!   └─► per vibrator: motor filter ─► compile ─► admit_and_start
//!                                                   │
//!                      Admitted / Ignored(reason) / Failed(error)
//! ```
//!
//! The call succeeds as soon as one vibrator admitted the request. Otherwise
//! the first ignore reason is reported, then the first failure.

use crate::codec::CompositeTransform;
use crate::error::VibratorError;
use crate::hal::{EffectInfo, VibratorHal};
use crate::model::{
    RequestLimits, RequestMode, VibrateRequest, VibratorCapability, VibratorIdentifier,
    VibratorInfo, VibratorRef,
};
use crate::playback::{PlaybackState, Program};
use crate::policy::{AdmissionController, AdmissionDecision, CallerContext, IgnoreReason};
use crate::registry::VibratorRegistry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Optional narrowing for `stop_vibration`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopFilter {
    #[default]
    Any,
    Mode(RequestMode),
    Session(u32),
}

impl StopFilter {
    pub fn matches(&self, state: &PlaybackState) -> bool {
        match self {
            StopFilter::Any => true,
            StopFilter::Mode(mode) => state.request.mode == *mode,
            StopFilter::Session(session_id) => state.request.session_id == *session_id,
        }
    }
}

#[derive(Debug)]
pub enum VibratorOutcome {
    Admitted,
    Ignored(IgnoreReason),
    /// No event of the request addresses this motor
    Skipped,
    Failed(VibratorError),
}

/// Per-vibrator results of one `start_vibration` call
#[derive(Debug, Default)]
pub struct AdmissionOutcome {
    pub outcomes: Vec<(VibratorRef, VibratorOutcome)>,
}

impl AdmissionOutcome {
    pub fn admitted(&self) -> Vec<VibratorRef> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, VibratorOutcome::Admitted))
            .map(|(r, _)| *r)
            .collect()
    }

    pub fn ignored(&self) -> Vec<(VibratorRef, IgnoreReason)> {
        self.outcomes
            .iter()
            .filter_map(|(r, o)| match o {
                VibratorOutcome::Ignored(reason) => Some((*r, *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, VibratorOutcome::Admitted))
    }

    fn into_result(self) -> Result<AdmissionOutcome, VibratorError> {
        if self.is_success() {
            return Ok(self);
        }
        if let Some((_, reason)) = self.ignored().first() {
            return Err(VibratorError::Ignored(*reason));
        }
        let first_failure = self.outcomes.into_iter().find_map(|(_, o)| match o {
            VibratorOutcome::Failed(e) => Some(e),
            _ => None,
        });
        Err(first_failure.unwrap_or_else(|| {
            VibratorError::ParameterError("no event addresses the resolved vibrators".to_string())
        }))
    }
}

pub struct Dispatcher {
    registry: Arc<VibratorRegistry>,
    admission: AdmissionController,
    hal: Arc<dyn VibratorHal>,
    transform: Arc<dyn CompositeTransform>,
    limits: RequestLimits,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<VibratorRegistry>,
        admission: AdmissionController,
        hal: Arc<dyn VibratorHal>,
        transform: Arc<dyn CompositeTransform>,
        limits: RequestLimits,
    ) -> Self {
        Self {
            registry,
            admission,
            hal,
            transform,
            limits,
        }
    }

    pub fn registry(&self) -> &Arc<VibratorRegistry> {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn start_vibration(
        &self,
        identifier: &VibratorIdentifier,
        request: VibrateRequest,
        caller: &CallerContext,
    ) -> Result<AdmissionOutcome, VibratorError> {
        request.validate(&self.limits)?;

        let targets = self.registry.resolve(identifier);
        if targets.is_empty() {
            info!("No vibrator for {}", identifier);
            return Err(VibratorError::NotFound(*identifier));
        }

        let mut outcome = AdmissionOutcome::default();
        for target in targets {
            let result = self.start_on(target, identifier, &request, caller);
            if let VibratorOutcome::Ignored(reason) = &result {
                info!("Vibrator {}: {} request ignored, {}", target, request.usage, reason);
            }
            if let VibratorOutcome::Failed(e) = &result {
                warn!("Vibrator {}: could not start: {}", target, e);
            }
            outcome.outcomes.push((target, result));
        }
        outcome.into_result()
    }

    fn start_on(
        &self,
        target: VibratorRef,
        identifier: &VibratorIdentifier,
        request: &VibrateRequest,
        caller: &CallerContext,
    ) -> VibratorOutcome {
        let Some(info) = self.registry.info_of(target) else {
            return VibratorOutcome::Failed(VibratorError::NotFound(*identifier));
        };

        // position 0 is a single-motor vibrator and takes every event
        let request = if info.position == 0 {
            request.clone()
        } else {
            match request.for_motor(info.position) {
                Some(filtered) => filtered,
                None => {
                    debug!("Vibrator {}: no events for motor {}", target, info.position);
                    return VibratorOutcome::Skipped;
                }
            }
        };

        let program = match self.compile(target, &request) {
            Ok(program) => program,
            Err(e) => return VibratorOutcome::Failed(e),
        };

        // detach may retire the vibrator at any point from here on
        let Some(controller) = self.registry.pool().controller(target) else {
            return VibratorOutcome::Failed(VibratorError::NotFound(*identifier));
        };
        let request = Arc::new(request);
        let decision = controller.admit_and_start(*identifier, request.clone(), program, |current| {
            self.admission.decide(&request, caller, current)
        });
        match decision {
            Ok(AdmissionDecision::Admit) => VibratorOutcome::Admitted,
            Ok(AdmissionDecision::Ignore(reason)) => VibratorOutcome::Ignored(reason),
            Err(e) => VibratorOutcome::Failed(e),
        }
    }

    fn compile(&self, target: VibratorRef, request: &VibrateRequest) -> Result<Program, VibratorError> {
        if self.registry.capability_of(target).is_none() {
            return Err(VibratorError::NotSupported(format!("vibrator {} is gone", target)));
        }
        let capability = self
            .hal
            .capability(target)
            .map_err(|source| VibratorError::DeviceError {
                vibrator: target,
                source,
            })?;

        let preset_duration = if request.mode == RequestMode::PresetEffect {
            let effect = self.effect_on(target, &request.effect_id)?;
            if !effect.supported {
                return Err(VibratorError::NotSupported(format!(
                    "effect '{}' on vibrator {}",
                    request.effect_id, target
                )));
            }
            Some(effect.duration_ms)
        } else {
            None
        };

        Program::compile(
            request,
            capability,
            preset_duration,
            self.transform.as_ref(),
            self.registry.pool().timing().chunk_size(),
        )
    }

    fn effect_on(&self, target: VibratorRef, effect_id: &str) -> Result<EffectInfo, VibratorError> {
        self.hal
            .effect_info(target, effect_id)
            .map_err(|source| VibratorError::DeviceError {
                vibrator: target,
                source,
            })
    }

    /// Stops matching vibrations; returns how many controllers were stopped
    pub fn stop_vibration(
        &self,
        identifier: &VibratorIdentifier,
        filter: StopFilter,
    ) -> Result<usize, VibratorError> {
        let targets = self.registry.resolve(identifier);
        if targets.is_empty() {
            return Err(VibratorError::NotFound(*identifier));
        }

        let stopped = targets
            .into_iter()
            .filter_map(|target| self.registry.pool().get(target))
            .filter(|controller| controller.stop_if(|state| filter.matches(state)))
            .count();
        if stopped > 0 {
            info!("Stopped {} vibrators for {} ({:?})", stopped, identifier, filter);
        } else {
            debug!("Nothing to stop for {} ({:?})", identifier, filter);
        }
        Ok(stopped)
    }

    /// Capability of the first vibrator `identifier` resolves to
    pub fn get_capacity(
        &self,
        identifier: &VibratorIdentifier,
    ) -> Result<VibratorCapability, VibratorError> {
        self.registry
            .resolve(identifier)
            .first()
            .and_then(|target| self.registry.capability_of(*target))
            .ok_or(VibratorError::NotFound(*identifier))
    }

    pub fn get_vibrator_list(&self, identifier: &VibratorIdentifier) -> Vec<VibratorInfo> {
        self.registry
            .resolve(identifier)
            .into_iter()
            .filter_map(|target| self.registry.info_of(target))
            .collect()
    }

    /// True if every addressed vibrator knows `effect_id`
    pub fn is_support_effect(
        &self,
        identifier: &VibratorIdentifier,
        effect_id: &str,
    ) -> Result<bool, VibratorError> {
        let targets = self.registry.resolve(identifier);
        if targets.is_empty() {
            return Err(VibratorError::NotFound(*identifier));
        }
        for target in targets {
            if !self.effect_on(target, effect_id)?.supported {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn effect_info(
        &self,
        identifier: &VibratorIdentifier,
        effect_id: &str,
    ) -> Result<EffectInfo, VibratorError> {
        let target = self
            .registry
            .resolve(identifier)
            .first()
            .copied()
            .ok_or(VibratorError::NotFound(*identifier))?;
        self.effect_on(target, effect_id)
    }

    pub fn playback_state(&self, target: VibratorRef) -> Option<PlaybackState> {
        self.registry.pool().get(target).and_then(|c| c.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(results: Vec<VibratorOutcome>) -> AdmissionOutcome {
        AdmissionOutcome {
            outcomes: results
                .into_iter()
                .enumerate()
                .map(|(i, o)| (VibratorRef::new(1, i as i32), o))
                .collect(),
        }
    }

    #[test]
    fn test_one_admitted_vibrator_is_success() {
        let result = outcome(vec![
            VibratorOutcome::Ignored(IgnoreReason::Muted),
            VibratorOutcome::Admitted,
            VibratorOutcome::Failed(VibratorError::NotSupported("x".to_string())),
        ])
        .into_result()
        .unwrap();
        assert_eq!(result.admitted(), vec![VibratorRef::new(1, 1)]);
        assert_eq!(
            result.ignored(),
            vec![(VibratorRef::new(1, 0), IgnoreReason::Muted)]
        );
    }

    #[test]
    fn test_ignore_reported_before_failure() {
        let result = outcome(vec![
            VibratorOutcome::Failed(VibratorError::NotSupported("x".to_string())),
            VibratorOutcome::Ignored(IgnoreReason::FeedbackOff),
        ])
        .into_result();
        assert!(matches!(
            result,
            Err(VibratorError::Ignored(IgnoreReason::FeedbackOff))
        ));
    }

    #[test]
    fn test_only_skipped_is_parameter_error() {
        let result = outcome(vec![VibratorOutcome::Skipped]).into_result();
        assert!(matches!(result, Err(VibratorError::ParameterError(_))));
    }
}
