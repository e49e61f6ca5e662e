use crate::error::VibratorError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic purpose of a vibration, used to prioritize and gate requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    #[default]
    Unknown,
    Alarm,
    Ring,
    Notification,
    Communication,
    Touch,
    Media,
    PhysicalFeedback,
    SimulateReality,
}

impl Usage {
    /// Alarm, ring, notification and communication vibrations
    pub fn is_alerting(self) -> bool {
        matches!(
            self,
            Usage::Alarm | Usage::Ring | Usage::Notification | Usage::Communication
        )
    }

    /// Usages switched off by the haptic feedback toggle
    pub fn is_feedback(self) -> bool {
        matches!(
            self,
            Usage::Touch
                | Usage::Media
                | Usage::Unknown
                | Usage::PhysicalFeedback
                | Usage::SimulateReality
        )
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Usage::Unknown => "unknown",
            Usage::Alarm => "alarm",
            Usage::Ring => "ring",
            Usage::Notification => "notification",
            Usage::Communication => "communication",
            Usage::Touch => "touch",
            Usage::Media => "media",
            Usage::PhysicalFeedback => "physical_feedback",
            Usage::SimulateReality => "simulate_reality",
        };
        f.write_str(name)
    }
}

/// What the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    Once,
    PresetEffect,
    CustomPattern,
}

/// How a custom pattern is delivered to a particular vibrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomMode {
    /// Full pattern streamed to hardware
    Hd,
    /// Discretized into preset primitives
    CompositeEffect,
    /// Discretized into timed on/off segments
    CompositeTime,
}

/// Compiled playback mode of a request on one vibrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackMode {
    Once,
    Preset,
    Custom(CustomMode),
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackMode::Once => f.write_str("once"),
            PlaybackMode::Preset => f.write_str("preset"),
            PlaybackMode::Custom(CustomMode::Hd) => f.write_str("custom.hd"),
            PlaybackMode::Custom(CustomMode::CompositeEffect) => f.write_str("custom.composite.effect"),
            PlaybackMode::Custom(CustomMode::CompositeTime) => f.write_str("custom.composite.time"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Continuous,
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub time_ms: u32,
    pub intensity: i32,
    pub frequency: i32,
}

/// One haptic event inside a pattern, offsets relative to the pattern start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub start_offset_ms: u32,
    pub duration_ms: u32,
    pub intensity: i32,
    pub frequency: i32,
    /// 0 applies to every resolved vibrator
    pub motor_index: i32,
    #[serde(default)]
    pub points: Vec<CurvePoint>,
}

impl Event {
    pub fn continuous(start_offset_ms: u32, duration_ms: u32, intensity: i32, frequency: i32) -> Self {
        Self {
            kind: EventKind::Continuous,
            start_offset_ms,
            duration_ms,
            intensity,
            frequency,
            motor_index: 0,
            points: Vec::new(),
        }
    }

    pub fn transient(start_offset_ms: u32, intensity: i32, frequency: i32) -> Self {
        Self {
            kind: EventKind::Transient,
            duration_ms: TRANSIENT_DURATION_MS,
            ..Self::continuous(start_offset_ms, 0, intensity, frequency)
        }
    }

    pub fn on_motor(mut self, motor_index: i32) -> Self {
        self.motor_index = motor_index;
        self
    }

    pub fn end_ms(&self) -> u32 {
        self.start_offset_ms.saturating_add(self.duration_ms)
    }
}

/// Nominal length of a transient tap
pub const TRANSIENT_DURATION_MS: u32 = 48;

/// A timed group of events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub start_time_ms: u32,
    /// Declared length; 0 means "derive from the events"
    #[serde(default)]
    pub duration_ms: u32,
    pub events: Vec<Event>,
}

impl Pattern {
    pub fn new(start_time_ms: u32, events: Vec<Event>) -> Self {
        Self {
            start_time_ms,
            duration_ms: 0,
            events,
        }
    }

    /// Time the pattern occupies the actuator
    pub fn span_ms(&self) -> u32 {
        if self.duration_ms > 0 {
            return self.duration_ms;
        }
        self.events.iter().map(Event::end_ms).max().unwrap_or(0)
    }
}

/// Validation bounds applied before a request reaches any vibrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub max_once_duration_ms: u32,
    pub event_start_ceiling_ms: u32,
    pub max_events_per_pattern: usize,
    pub max_patterns: Option<usize>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_once_duration_ms: 1_800_000,   // 30 minutes
            event_start_ceiling_ms: 1_800_000, // same ceiling as single pulses
            max_events_per_pattern: 128,
            max_patterns: None,
        }
    }
}

const MIN_CURVE_POINTS: usize = 4;
const MAX_CURVE_POINTS: usize = 16;

/// A vibration request as handed over by the caller bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VibrateRequest {
    pub mode: RequestMode,
    pub usage: Usage,
    pub system_usage: bool,
    pub package_name: String,
    pub duration_ms: u32,
    pub effect_id: String,
    pub loop_count: u32,
    pub intensity: i32,
    pub session_id: u32,
    pub patterns: Vec<Pattern>,
}

impl VibrateRequest {
    fn base(mode: RequestMode) -> Self {
        Self {
            mode,
            usage: Usage::Unknown,
            system_usage: false,
            package_name: String::new(),
            duration_ms: 0,
            effect_id: String::new(),
            loop_count: 1,
            intensity: 100,
            session_id: 0,
            patterns: Vec::new(),
        }
    }

    pub fn once(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            ..Self::base(RequestMode::Once)
        }
    }

    /// Preset effect; a zero duration is filled in from the effect library
    pub fn preset(effect_id: impl Into<String>, loop_count: u32, intensity: i32) -> Self {
        Self {
            effect_id: effect_id.into(),
            loop_count,
            intensity,
            ..Self::base(RequestMode::PresetEffect)
        }
    }

    pub fn custom(patterns: Vec<Pattern>) -> Self {
        Self {
            patterns,
            ..Self::base(RequestMode::CustomPattern)
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_system_usage(mut self, system_usage: bool) -> Self {
        self.system_usage = system_usage;
        self
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = package_name.into();
        self
    }

    pub fn with_session(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_duration(mut self, duration_ms: u32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Preset effect played more than once
    pub fn is_repeating(&self) -> bool {
        self.mode == RequestMode::PresetEffect && self.loop_count > 1
    }

    /// Checks the request against `limits`; no side effects
    pub fn validate(&self, limits: &RequestLimits) -> Result<(), VibratorError> {
        match self.mode {
            RequestMode::Once => {
                if self.duration_ms == 0 || self.duration_ms > limits.max_once_duration_ms {
                    return Err(VibratorError::ParameterError(format!(
                        "duration {}ms outside 1..={}",
                        self.duration_ms, limits.max_once_duration_ms
                    )));
                }
            }
            RequestMode::PresetEffect => {
                if self.effect_id.is_empty() {
                    return Err(VibratorError::ParameterError("empty effect id".to_string()));
                }
                if self.loop_count == 0 {
                    return Err(VibratorError::ParameterError(
                        "loop count must be at least 1".to_string(),
                    ));
                }
                check_range("intensity", self.intensity, 0, 100)?;
            }
            RequestMode::CustomPattern => self.validate_patterns(limits)?,
        }
        Ok(())
    }

    fn validate_patterns(&self, limits: &RequestLimits) -> Result<(), VibratorError> {
        if self.patterns.is_empty() {
            return Err(VibratorError::ParameterError(
                "custom request without patterns".to_string(),
            ));
        }
        if let Some(max) = limits.max_patterns {
            if self.patterns.len() > max {
                return Err(VibratorError::ParameterError(format!(
                    "{} patterns exceed the limit of {}",
                    self.patterns.len(),
                    max
                )));
            }
        }

        let mut previous_start = 0;
        for (index, pattern) in self.patterns.iter().enumerate() {
            if pattern.start_time_ms < previous_start {
                return Err(VibratorError::ParameterError(format!(
                    "pattern {} starts at {}ms before its predecessor ({}ms)",
                    index, pattern.start_time_ms, previous_start
                )));
            }
            previous_start = pattern.start_time_ms;

            if pattern.events.len() > limits.max_events_per_pattern {
                return Err(VibratorError::ParameterError(format!(
                    "pattern {} has {} events, limit is {}",
                    index,
                    pattern.events.len(),
                    limits.max_events_per_pattern
                )));
            }

            for event in &pattern.events {
                check_range("event intensity", event.intensity, 0, 100)?;
                check_range("event frequency", event.frequency, -100, 100)?;

                let absolute_end = u64::from(pattern.start_time_ms) + u64::from(event.end_ms());
                if absolute_end > u64::from(limits.event_start_ceiling_ms) {
                    return Err(VibratorError::ParameterError(format!(
                        "event ending at {}ms exceeds the {}ms ceiling",
                        absolute_end, limits.event_start_ceiling_ms
                    )));
                }

                if !event.points.is_empty()
                    && !(MIN_CURVE_POINTS..=MAX_CURVE_POINTS).contains(&event.points.len())
                {
                    return Err(VibratorError::ParameterError(format!(
                        "{} curve points, expected {}..={}",
                        event.points.len(),
                        MIN_CURVE_POINTS,
                        MAX_CURVE_POINTS
                    )));
                }
                for point in &event.points {
                    check_range("curve intensity", point.intensity, 0, 100)?;
                    check_range("curve frequency", point.frequency, -100, 100)?;
                }
            }
        }
        Ok(())
    }

    /// Copy of the request keeping only events addressed to `position`
    ///
    /// Returns `None` for a custom request with no event left for this motor.
    pub fn for_motor(&self, position: i32) -> Option<VibrateRequest> {
        if self.mode != RequestMode::CustomPattern {
            return Some(self.clone());
        }

        let patterns: Vec<Pattern> = self
            .patterns
            .iter()
            .filter_map(|pattern| {
                let events: Vec<Event> = pattern
                    .events
                    .iter()
                    .filter(|event| event.motor_index == 0 || event.motor_index == position)
                    .cloned()
                    .collect();
                (!events.is_empty()).then(|| Pattern {
                    events,
                    ..pattern.clone()
                })
            })
            .collect();

        if patterns.is_empty() {
            return None;
        }
        Some(VibrateRequest {
            patterns,
            ..self.clone()
        })
    }
}

fn check_range(what: &str, value: i32, min: i32, max: i32) -> Result<(), VibratorError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(VibratorError::ParameterError(format!(
            "{} {} outside {}..={}",
            what, value, min, max
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_motor_request() -> VibrateRequest {
        VibrateRequest::custom(vec![
            Pattern::new(
                0,
                vec![
                    Event::continuous(0, 100, 50, 10).on_motor(1),
                    Event::continuous(100, 100, 50, 10).on_motor(2),
                ],
            ),
            Pattern::new(400, vec![Event::transient(0, 80, 0)]),
        ])
    }

    #[test]
    fn test_once_duration_bounds() {
        let limits = RequestLimits::default();
        assert!(VibrateRequest::once(0).validate(&limits).is_err());
        assert!(VibrateRequest::once(1_800_001).validate(&limits).is_err());
        assert!(VibrateRequest::once(250).validate(&limits).is_ok());
    }

    #[test]
    fn test_event_ceiling_counts_pattern_start() {
        let limits = RequestLimits {
            event_start_ceiling_ms: 1_000,
            ..RequestLimits::default()
        };
        let request =
            VibrateRequest::custom(vec![Pattern::new(900, vec![Event::continuous(50, 100, 50, 0)])]);
        assert!(matches!(
            request.validate(&limits),
            Err(VibratorError::ParameterError(_))
        ));
    }

    #[test]
    fn test_curve_point_count() {
        let mut event = Event::continuous(0, 100, 50, 0);
        event.points = vec![
            CurvePoint {
                time_ms: 0,
                intensity: 10,
                frequency: 0
            };
            3
        ];
        let request = VibrateRequest::custom(vec![Pattern::new(0, vec![event])]);
        assert!(request.validate(&RequestLimits::default()).is_err());
    }

    #[test]
    fn test_patterns_must_be_ordered() {
        let request = VibrateRequest::custom(vec![
            Pattern::new(600, vec![Event::transient(0, 50, 0)]),
            Pattern::new(0, vec![Event::transient(0, 50, 0)]),
        ]);
        assert!(request.validate(&RequestLimits::default()).is_err());
    }

    #[test]
    fn test_for_motor_filters_events() {
        let request = two_motor_request();

        let first = request.for_motor(1).unwrap();
        assert_eq!(first.patterns[0].events.len(), 1);
        assert_eq!(first.patterns[0].events[0].motor_index, 1);
        // motor index 0 applies everywhere
        assert_eq!(first.patterns[1].events.len(), 1);

        let unrelated = VibrateRequest::custom(vec![Pattern::new(
            0,
            vec![Event::continuous(0, 10, 50, 0).on_motor(2)],
        )]);
        assert!(unrelated.for_motor(1).is_none());
    }

    #[test]
    fn test_repeating_preset() {
        assert!(VibrateRequest::preset("haptic.clock.timer", 3, 50).is_repeating());
        assert!(!VibrateRequest::preset("haptic.clock.timer", 1, 50).is_repeating());
        assert!(!VibrateRequest::once(100).is_repeating());
    }

    #[test]
    fn test_pattern_span() {
        let pattern = Pattern::new(
            0,
            vec![Event::continuous(0, 100, 50, 0), Event::continuous(250, 50, 50, 0)],
        );
        assert_eq!(pattern.span_ms(), 300);
    }
}
