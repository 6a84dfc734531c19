// src/state/param_info.rs
//
// Knob metadata for UI display and validation.

use std::fmt;

use super::KnobId;

/// Display curve for knob UI.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DisplayCurve {
    /// Linear mapping
    #[default]
    Linear,
    /// Logarithmic (good for frequency, time)
    Logarithmic,
}

/// Unit type for knob display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ParamUnit {
    #[default]
    None,
    /// Hertz (frequency)
    Hz,
    /// Seconds
    Seconds,
    /// Octaves
    Octaves,
}

impl fmt::Display for ParamUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamUnit::None => Ok(()),
            ParamUnit::Hz => write!(f, "Hz"),
            ParamUnit::Seconds => write!(f, "s"),
            ParamUnit::Octaves => write!(f, "oct"),
        }
    }
}

/// Metadata describing a knob.
///
/// Used by the UI to:
/// - Display appropriate controls (knobs, sliders, etc.)
/// - Validate input ranges
/// - Format values for display
#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub id: KnobId,

    /// Human-readable name
    pub name: String,

    /// Short name for compact displays
    pub short_name: String,

    pub min: f32,
    pub max: f32,
    pub default: f32,

    pub unit: ParamUnit,

    /// Display curve for UI mapping
    pub curve: DisplayCurve,

    /// Step size for discrete knobs (0 = continuous)
    pub step: f32,
}

impl ParamInfo {
    pub fn new(id: KnobId, name: impl Into<String>) -> Self {
        let name = name.into();
        let short_name = name.chars().take(4).collect();
        Self {
            id,
            name,
            short_name,
            min: 0.0,
            max: 1.0,
            default: 0.0,
            unit: ParamUnit::None,
            curve: DisplayCurve::Linear,
            step: 0.0,
        }
    }

    pub fn range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn default(mut self, value: f32) -> Self {
        self.default = value;
        self
    }

    pub fn unit(mut self, unit: ParamUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn curve(mut self, curve: DisplayCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn step(mut self, step: f32) -> Self {
        self.step = step;
        self
    }

    /// Clamp a value to the valid range, snapping discrete knobs to their step.
    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        if self.step > 0.0 {
            self.min + ((value - self.min) / self.step).round() * self.step
        } else {
            value
        }
    }

    /// Normalize a value to 0..1 range.
    #[inline]
    pub fn normalize(&self, value: f32) -> f32 {
        let value = value.clamp(self.min, self.max);
        match self.curve {
            DisplayCurve::Linear => (value - self.min) / (self.max - self.min),
            DisplayCurve::Logarithmic => {
                let (lo, hi) = self.log_bounds();
                (value.max(lo).ln() - lo.ln()) / (hi.ln() - lo.ln())
            }
        }
    }

    /// Denormalize a 0..1 value to the knob range.
    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        let normalized = normalized.clamp(0.0, 1.0);
        match self.curve {
            DisplayCurve::Linear => self.min + normalized * (self.max - self.min),
            DisplayCurve::Logarithmic => {
                let (lo, hi) = self.log_bounds();
                lo * (hi / lo).powf(normalized)
            }
        }
    }

    /// Format a value for display.
    pub fn format(&self, value: f32) -> String {
        let precision = if self.step >= 1.0 { 0 } else { 3 };
        if self.unit == ParamUnit::None {
            format!("{:.prec$}", value, prec = precision)
        } else {
            format!("{:.prec$} {}", value, self.unit, prec = precision)
        }
    }

    // Log curves need a positive lower bound; a zero minimum maps to a
    // millisecond-scale floor.
    fn log_bounds(&self) -> (f32, f32) {
        (self.min.max(1e-3), self.max)
    }
}
