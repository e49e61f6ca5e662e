//! Pattern → composite effect transform
//!
//! Vibrators without HD streaming get a discretized version of a custom
//! pattern. The transform flattens every event onto one absolute timeline and
//! emits one composite entry per event plus a trailing terminator whose delay
//! carries the remaining tail, so the delays always add up to the span of
//! the whole request.
//!
//! ```text
//! Pattern[0] ─┐
//! Pattern[1] ─┼─► timeline (absolute ms, ordered) ─► [CompositeEffect; N] + terminator
//! Pattern[n] ─┘
//! ```

use crate::hal::CompositeEffect;
use crate::model::{CustomMode, Event, EventKind, Pattern};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to transform pattern: {0}")]
    Invalid(String),

    #[error("Composite transform does not handle {0:?}")]
    UnsupportedMode(CustomMode),
}

/// Turns a validated pattern list into a flat composite list
pub trait CompositeTransform: Send + Sync + 'static {
    fn transform(
        &self,
        patterns: &[Pattern],
        mode: CustomMode,
    ) -> Result<Vec<CompositeEffect>, TransformError>;
}

/// Effect id of the closing primitive
pub const STOP_PRIMITIVE: u32 = 0;
/// Transient primitives occupy ids 1..=9
pub const TRANSIENT_PRIMITIVE_BASE: u32 = 1;

const MAX_GRADE: u32 = 8;

/// Default transform working purely on event timing and intensity
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineTransform;

impl TimelineTransform {
    fn timeline(patterns: &[Pattern]) -> Vec<(u32, &Event)> {
        let mut timeline: Vec<(u32, &Event)> = patterns
            .iter()
            .flat_map(|pattern| {
                pattern
                    .events
                    .iter()
                    .map(move |event| (pattern.start_time_ms + event.start_offset_ms, event))
            })
            .collect();
        timeline.sort_by_key(|(at, _)| *at);
        timeline
    }

    /// Intensity bucket 0..=8 in steps of 12.5
    fn grade(intensity: i32) -> u32 {
        let intensity = intensity.clamp(0, 100) as u32;
        ((intensity * 2 + 12) / 25).min(MAX_GRADE)
    }

    fn primitive_id(event: &Event) -> u32 {
        match event.kind {
            EventKind::Continuous => event.duration_ms * 100 + Self::grade(event.intensity),
            EventKind::Transient => TRANSIENT_PRIMITIVE_BASE + Self::grade(event.intensity),
        }
    }
}

impl CompositeTransform for TimelineTransform {
    fn transform(
        &self,
        patterns: &[Pattern],
        mode: CustomMode,
    ) -> Result<Vec<CompositeEffect>, TransformError> {
        if mode == CustomMode::Hd {
            return Err(TransformError::UnsupportedMode(mode));
        }

        let timeline = Self::timeline(patterns);
        let Some((last_start, _)) = timeline.last() else {
            return Err(TransformError::Invalid("pattern without events".to_string()));
        };
        let last_start = *last_start;
        let declared_end = patterns
            .iter()
            .map(|pattern| pattern.start_time_ms.saturating_add(pattern.span_ms()))
            .max()
            .unwrap_or(last_start);
        let end = timeline
            .iter()
            .map(|(at, event)| at.saturating_add(event.duration_ms))
            .fold(declared_end.max(last_start), u32::max);

        let mut effects = Vec::with_capacity(timeline.len() + 1);
        let mut front = 0;
        for (at, event) in &timeline {
            let delay_ms = at - front;
            front = *at;
            effects.push(match mode {
                CustomMode::CompositeTime => CompositeEffect::Time {
                    delay_ms,
                    time_ms: event.duration_ms,
                    intensity: event.intensity,
                    frequency: event.frequency,
                },
                _ => CompositeEffect::Primitive {
                    delay_ms,
                    effect_id: Self::primitive_id(event),
                    intensity: event.intensity,
                },
            });
        }

        // tail until the last event or declared pattern length has run out
        let tail_ms = end - last_start;
        effects.push(match mode {
            CustomMode::CompositeTime => CompositeEffect::Time {
                delay_ms: tail_ms,
                time_ms: 0,
                intensity: 0,
                frequency: 0,
            },
            _ => CompositeEffect::Primitive {
                delay_ms: tail_ms,
                effect_id: STOP_PRIMITIVE,
                intensity: 0,
            },
        });
        Ok(effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn patterns() -> Vec<Pattern> {
        vec![
            Pattern::new(
                0,
                vec![Event::continuous(0, 100, 50, 0), Event::transient(300, 100, 0)],
            ),
            Pattern::new(1_000, vec![Event::continuous(0, 200, 100, 20)]),
        ]
    }

    fn total_delay(effects: &[CompositeEffect]) -> u32 {
        effects.iter().map(CompositeEffect::delay_ms).sum()
    }

    #[test]
    fn test_time_transform_delays() {
        let effects = TimelineTransform
            .transform(&patterns(), CustomMode::CompositeTime)
            .unwrap();

        let delays: Vec<u32> = effects.iter().map(CompositeEffect::delay_ms).collect();
        assert_eq!(delays, vec![0, 300, 700, 200]);
        assert_eq!(total_delay(&effects), 1_200);
        assert_eq!(
            effects[2],
            CompositeEffect::Time {
                delay_ms: 700,
                time_ms: 200,
                intensity: 100,
                frequency: 20
            }
        );
    }

    #[test]
    fn test_primitive_transform_ids() {
        let effects = TimelineTransform
            .transform(&patterns(), CustomMode::CompositeEffect)
            .unwrap();

        let ids: Vec<u32> = effects
            .iter()
            .map(|effect| match effect {
                CompositeEffect::Primitive { effect_id, .. } => *effect_id,
                CompositeEffect::Time { .. } => u32::MAX,
            })
            .collect();
        assert_eq!(ids, vec![10_004, 9, 20_008, STOP_PRIMITIVE]);
    }

    #[test]
    fn test_overlapping_tail_covers_longest_event() {
        let patterns = vec![Pattern::new(
            0,
            vec![Event::continuous(0, 500, 50, 0), Event::continuous(100, 50, 50, 0)],
        )];
        let effects = TimelineTransform
            .transform(&patterns, CustomMode::CompositeTime)
            .unwrap();
        assert_eq!(total_delay(&effects), 500);
    }

    #[test]
    fn test_tail_honours_declared_pattern_length() {
        let mut pattern = Pattern::new(0, vec![Event::continuous(0, 300, 50, 0)]);
        pattern.duration_ms = 1_000;
        let effects = TimelineTransform
            .transform(&[pattern.clone()], CustomMode::CompositeTime)
            .unwrap();
        assert_eq!(total_delay(&effects), pattern.span_ms());
        assert_eq!(effects.last().map(CompositeEffect::delay_ms), Some(1_000));
    }

    #[test]
    fn test_hd_mode_rejected() {
        assert!(matches!(
            TimelineTransform.transform(&patterns(), CustomMode::Hd),
            Err(TransformError::UnsupportedMode(CustomMode::Hd))
        ));
    }
}
