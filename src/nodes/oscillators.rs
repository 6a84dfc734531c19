// Periodic signal sources.

use crate::node::{Node, NodeKind, ParamSlot, SourceLifetime};
use crate::parameter::ScheduledParam;

/// Waveform shape of a periodic source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Sawtooth,
    Square,
}

/// Frequency after applying a detune in cents.
#[inline]
pub fn detuned(frequency: f32, cents: f32) -> f32 {
    frequency * 2.0_f32.powf(cents / 1200.0)
}

pub struct Oscillator {
    waveform: Waveform,
    frequency: ScheduledParam,
    detune: ScheduledParam,
    lifetime: SourceLifetime,
}

impl Oscillator {
    pub fn new(waveform: Waveform) -> Self {
        Self {
            waveform,
            frequency: ScheduledParam::new(440.0),
            detune: ScheduledParam::new(0.0),
            lifetime: SourceLifetime::default(),
        }
    }
}

impl Node for Oscillator {
    fn kind(&self) -> NodeKind {
        NodeKind::Oscillator
    }

    fn param(&self, slot: ParamSlot) -> Option<&ScheduledParam> {
        match slot {
            ParamSlot::Frequency => Some(&self.frequency),
            ParamSlot::Detune => Some(&self.detune),
            _ => None,
        }
    }

    fn param_mut(&mut self, slot: ParamSlot) -> Option<&mut ScheduledParam> {
        match slot {
            ParamSlot::Frequency => Some(&mut self.frequency),
            ParamSlot::Detune => Some(&mut self.detune),
            _ => None,
        }
    }

    fn lifetime(&self) -> Option<&SourceLifetime> {
        Some(&self.lifetime)
    }

    fn lifetime_mut(&mut self) -> Option<&mut SourceLifetime> {
        Some(&mut self.lifetime)
    }

    fn waveform(&self) -> Option<Waveform> {
        Some(self.waveform)
    }
}
