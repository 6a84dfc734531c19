// src/parameter.rs
//
// Scheduled parameters: a numeric control value with queued breakpoints
// evaluated against the external clock.

use std::fmt;

/// Interpolation law for a ramp segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RampLaw {
    Linear,
    /// Exponential approach; equal time gives equal ratio. Undefined at zero.
    #[default]
    Multiplicative,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationKind {
    /// Jump to the value at the event time.
    SetValue,
    /// Ramp from the previous event to the value, arriving at the event time.
    Ramp(RampLaw),
}

/// One breakpoint on a parameter's timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Automation {
    pub time: f64,
    pub value: f32,
    pub kind: AutomationKind,
}

/// Error scheduling a parameter change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamError {
    /// Multiplicative ramps cannot reach zero or cross sign.
    NonPositiveTarget { value: f32 },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamError::NonPositiveTarget { value } => {
                write!(f, "multiplicative ramp target must be positive, got {}", value)
            }
        }
    }
}

impl std::error::Error for ParamError {}

/// A parameter with a time-ordered automation timeline.
///
/// Parameters do not own their modulation sources; audio-rate inputs are
/// graph connections and are summed in by whatever renders the graph.
#[derive(Debug, Clone)]
pub struct ScheduledParam {
    default: f32,
    events: Vec<Automation>,
}

impl ScheduledParam {
    pub fn new(default: f32) -> Self {
        Self {
            default,
            events: Vec::new(),
        }
    }

    /// Value in effect before any breakpoint.
    #[inline]
    pub fn default_value(&self) -> f32 {
        self.default
    }

    /// Set the intrinsic value (e.g. UI control with no automation).
    #[inline]
    pub fn set_default(&mut self, value: f32) {
        self.default = value;
    }

    /// Scheduled breakpoints, ordered by time.
    #[inline]
    pub fn events(&self) -> &[Automation] {
        &self.events
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation {
            time,
            value,
            kind: AutomationKind::SetValue,
        });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Automation {
            time,
            value,
            kind: AutomationKind::Ramp(RampLaw::Linear),
        });
    }

    pub fn exponential_ramp_to_value_at_time(
        &mut self,
        value: f32,
        time: f64,
    ) -> Result<(), ParamError> {
        if value <= 0.0 {
            return Err(ParamError::NonPositiveTarget { value });
        }
        self.insert(Automation {
            time,
            value,
            kind: AutomationKind::Ramp(RampLaw::Multiplicative),
        });
        Ok(())
    }

    pub fn ramp_to_value_at_time(
        &mut self,
        law: RampLaw,
        value: f32,
        time: f64,
    ) -> Result<(), ParamError> {
        match law {
            RampLaw::Linear => {
                self.linear_ramp_to_value_at_time(value, time);
                Ok(())
            }
            RampLaw::Multiplicative => self.exponential_ramp_to_value_at_time(value, time),
        }
    }

    /// Drop every breakpoint at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|e| e.time < time);
    }

    /// Drop every breakpoint at or after `time` and pin the curve there.
    ///
    /// A ramp in flight at `time` is truncated to end at `time` with the value
    /// it had reached, so the curve before `time` is unchanged.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) {
        let held = self.value_at(time);

        let cut = self.events.iter().position(|e| e.time >= time);
        let in_flight = cut
            .map(|i| self.events[i])
            .filter(|e| e.time > time)
            .and_then(|e| match e.kind {
                AutomationKind::Ramp(law) => Some(law),
                AutomationKind::SetValue => None,
            });

        if let Some(i) = cut {
            self.events.truncate(i);
        }

        let kind = match in_flight {
            // A multiplicative ramp that never left its start value holds it.
            Some(RampLaw::Multiplicative) if held <= 0.0 => AutomationKind::SetValue,
            Some(law) => AutomationKind::Ramp(law),
            None => AutomationKind::SetValue,
        };
        self.events.push(Automation {
            time,
            value: held,
            kind,
        });
    }

    /// Evaluate the curve at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let mut prev_time = f64::NEG_INFINITY;
        let mut prev_value = self.default;

        for event in &self.events {
            if event.time > time {
                return match event.kind {
                    AutomationKind::SetValue => prev_value,
                    AutomationKind::Ramp(law) => {
                        interpolate(law, prev_time, prev_value, event.time, event.value, time)
                    }
                };
            }
            prev_time = event.time;
            prev_value = event.value;
        }

        prev_value
    }

    // Stable insert: equal times keep insertion order.
    fn insert(&mut self, event: Automation) {
        let at = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(at, event);
    }
}

#[inline]
fn interpolate(law: RampLaw, t0: f64, v0: f32, t1: f64, v1: f32, t: f64) -> f32 {
    // Ramp with no anchor before it: nothing to interpolate from.
    if !t0.is_finite() || t1 <= t0 {
        return v0;
    }
    let progress = ((t - t0) / (t1 - t0)) as f32;

    match law {
        RampLaw::Linear => v0 + (v1 - v0) * progress,
        RampLaw::Multiplicative => {
            if v0 * v1 <= 0.0 {
                v0
            } else {
                v0 * (v1 / v0).powf(progress)
            }
        }
    }
}
