// src/state/knobs.rs
//
// Shared tunables read by every new voice of a subtractive instrument.

use std::fmt;
use std::str::FromStr;

use super::{DisplayCurve, ParamInfo, ParamUnit};
use crate::envelope::EnvelopeSpec;
use crate::nodes::Waveform;

/// Split a 0..1 mix into (dry, wet) gains.
#[inline]
pub fn mix_to_dry_wet(mix: f32) -> (f32, f32) {
    let mix = mix.clamp(0.0, 1.0);
    (1.0 - mix, mix)
}

/// Which oscillator of the subtractive voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OscillatorLayer {
    Top,
    Sub,
}

/// Which envelope of the subtractive voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EnvelopeTarget {
    /// Amplitude
    Vca,
    /// Filter cutoff
    Vcf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EnvelopeStage {
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
}

impl EnvelopeStage {
    pub const ALL: [EnvelopeStage; 5] = [
        EnvelopeStage::Attack,
        EnvelopeStage::Hold,
        EnvelopeStage::Decay,
        EnvelopeStage::Sustain,
        EnvelopeStage::Release,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OscillatorKnobs {
    pub waveform: Waveform,
    pub gain: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterKnobs {
    /// Base cutoff in Hz; the peak of the VCF envelope before keytracking.
    pub cutoff: f32,
    /// Filter Q
    pub resonance: f32,
    /// Cutoff added per Hz of the note's fundamental.
    pub keytrack: f32,
}

impl FilterKnobs {
    /// `cutoff + keytrack * frequency`
    #[inline]
    pub fn keytracked_cutoff(&self, frequency: f32) -> f32 {
        self.cutoff + self.keytrack * frequency
    }
}

/// Knob state of a subtractive instrument.
///
/// Read at each press; changes never reach voices already sounding.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Knobs {
    pub top_oscillator: OscillatorKnobs,
    pub sub_oscillator: OscillatorKnobs,
    /// Octaves the sub oscillator sits below the top one.
    pub sub_octaves: u8,
    pub lpf: FilterKnobs,
    pub vca_eg: EnvelopeSpec,
    pub vcf_eg: EnvelopeSpec,
}

impl Default for Knobs {
    fn default() -> Self {
        Self {
            top_oscillator: OscillatorKnobs {
                waveform: Waveform::Sawtooth,
                gain: 0.5,
            },
            sub_oscillator: OscillatorKnobs {
                waveform: Waveform::Square,
                gain: 0.5,
            },
            sub_octaves: 1,
            lpf: FilterKnobs {
                cutoff: 20000.0,
                resonance: 1.0,
                keytrack: 0.0,
            },
            vca_eg: EnvelopeSpec::new(0.0, 0.0, 3.0, 0.001, 0.5),
            vcf_eg: EnvelopeSpec::new(0.25, 0.0, 1.0, 0.001, 0.5),
        }
    }
}

impl Knobs {
    pub fn oscillator(&self, layer: OscillatorLayer) -> &OscillatorKnobs {
        match layer {
            OscillatorLayer::Top => &self.top_oscillator,
            OscillatorLayer::Sub => &self.sub_oscillator,
        }
    }

    pub fn oscillator_mut(&mut self, layer: OscillatorLayer) -> &mut OscillatorKnobs {
        match layer {
            OscillatorLayer::Top => &mut self.top_oscillator,
            OscillatorLayer::Sub => &mut self.sub_oscillator,
        }
    }

    pub fn envelope(&self, target: EnvelopeTarget) -> &EnvelopeSpec {
        match target {
            EnvelopeTarget::Vca => &self.vca_eg,
            EnvelopeTarget::Vcf => &self.vcf_eg,
        }
    }

    pub fn envelope_mut(&mut self, target: EnvelopeTarget) -> &mut EnvelopeSpec {
        match target {
            EnvelopeTarget::Vca => &mut self.vca_eg,
            EnvelopeTarget::Vcf => &mut self.vcf_eg,
        }
    }

    /// Balance between the oscillators: 0 is all top, 1 is all sub.
    pub fn oscillator_mix(&self) -> f32 {
        let total = self.top_oscillator.gain + self.sub_oscillator.gain;
        if total <= 0.0 {
            return 0.5;
        }
        self.sub_oscillator.gain / total
    }

    pub fn set_oscillator_mix(&mut self, mix: f32) {
        let (top, sub) = mix_to_dry_wet(mix);
        self.top_oscillator.gain = top;
        self.sub_oscillator.gain = sub;
    }

    /// Read a numeric knob.
    pub fn get(&self, id: KnobId) -> f32 {
        match id {
            KnobId::OscillatorGain(layer) => self.oscillator(layer).gain,
            KnobId::SubOctaves => self.sub_octaves as f32,
            KnobId::Cutoff => self.lpf.cutoff,
            KnobId::Resonance => self.lpf.resonance,
            KnobId::Keytrack => self.lpf.keytrack,
            KnobId::Envelope(target, stage) => {
                let spec = self.envelope(target);
                match stage {
                    EnvelopeStage::Attack => spec.attack as f32,
                    EnvelopeStage::Hold => spec.hold as f32,
                    EnvelopeStage::Decay => spec.decay as f32,
                    EnvelopeStage::Sustain => spec.sustain,
                    EnvelopeStage::Release => spec.release as f32,
                }
            }
        }
    }

    /// Write a numeric knob, clamped to its range. Returns the stored value.
    pub fn set(&mut self, id: KnobId, value: f32) -> f32 {
        let value = id.info().clamp(value);
        match id {
            KnobId::OscillatorGain(layer) => self.oscillator_mut(layer).gain = value,
            KnobId::SubOctaves => self.sub_octaves = value as u8,
            KnobId::Cutoff => self.lpf.cutoff = value,
            KnobId::Resonance => self.lpf.resonance = value,
            KnobId::Keytrack => self.lpf.keytrack = value,
            KnobId::Envelope(target, stage) => {
                let spec = self.envelope_mut(target);
                match stage {
                    EnvelopeStage::Attack => spec.attack = value as f64,
                    EnvelopeStage::Hold => spec.hold = value as f64,
                    EnvelopeStage::Decay => spec.decay = value as f64,
                    EnvelopeStage::Sustain => spec.sustain = value,
                    EnvelopeStage::Release => spec.release = value as f64,
                }
            }
        }
        value
    }
}

#[cfg(feature = "serde")]
impl Knobs {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Address of one numeric knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnobId {
    OscillatorGain(OscillatorLayer),
    SubOctaves,
    Cutoff,
    Resonance,
    Keytrack,
    Envelope(EnvelopeTarget, EnvelopeStage),
}

impl KnobId {
    /// Every knob, in display order.
    pub fn all() -> Vec<KnobId> {
        let mut ids = vec![
            KnobId::OscillatorGain(OscillatorLayer::Top),
            KnobId::OscillatorGain(OscillatorLayer::Sub),
            KnobId::SubOctaves,
            KnobId::Cutoff,
            KnobId::Resonance,
            KnobId::Keytrack,
        ];
        for target in [EnvelopeTarget::Vca, EnvelopeTarget::Vcf] {
            ids.extend(EnvelopeStage::ALL.map(|stage| KnobId::Envelope(target, stage)));
        }
        ids
    }

    /// Range, unit and default of this knob.
    pub fn info(self) -> ParamInfo {
        let default = Knobs::default().get(self);
        let info = match self {
            KnobId::OscillatorGain(_) => ParamInfo::new(self, "Level"),
            KnobId::SubOctaves => ParamInfo::new(self, "Sub octaves")
                .range(0.0, 3.0)
                .step(1.0)
                .unit(ParamUnit::Octaves),
            KnobId::Cutoff => ParamInfo::new(self, "Cutoff")
                .range(20.0, 20000.0)
                .unit(ParamUnit::Hz)
                .curve(DisplayCurve::Logarithmic),
            KnobId::Resonance => ParamInfo::new(self, "Resonance").range(0.0001, 30.0),
            KnobId::Keytrack => ParamInfo::new(self, "Keytrack").range(0.0, 4.0),
            KnobId::Envelope(_, EnvelopeStage::Sustain) => {
                ParamInfo::new(self, "Sustain").range(0.001, 1.0)
            }
            KnobId::Envelope(_, stage) => {
                let (name, max) = match stage {
                    EnvelopeStage::Attack => ("Attack", 10.0),
                    EnvelopeStage::Hold => ("Hold", 10.0),
                    EnvelopeStage::Decay => ("Decay", 20.0),
                    _ => ("Release", 20.0),
                };
                ParamInfo::new(self, name)
                    .range(0.0, max)
                    .unit(ParamUnit::Seconds)
                    .curve(DisplayCurve::Logarithmic)
            }
        };
        info.default(default)
    }
}

impl fmt::Display for KnobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnobId::OscillatorGain(OscillatorLayer::Top) => write!(f, "top.gain"),
            KnobId::OscillatorGain(OscillatorLayer::Sub) => write!(f, "sub.gain"),
            KnobId::SubOctaves => write!(f, "sub.octaves"),
            KnobId::Cutoff => write!(f, "lpf.cutoff"),
            KnobId::Resonance => write!(f, "lpf.resonance"),
            KnobId::Keytrack => write!(f, "lpf.keytrack"),
            KnobId::Envelope(target, stage) => {
                let target = match target {
                    EnvelopeTarget::Vca => "vca",
                    EnvelopeTarget::Vcf => "vcf",
                };
                let stage = match stage {
                    EnvelopeStage::Attack => "attack",
                    EnvelopeStage::Hold => "hold",
                    EnvelopeStage::Decay => "decay",
                    EnvelopeStage::Sustain => "sustain",
                    EnvelopeStage::Release => "release",
                };
                write!(f, "{}.{}", target, stage)
            }
        }
    }
}

/// Unrecognized knob name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKnob(pub String);

impl fmt::Display for UnknownKnob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown knob '{}'", self.0)
    }
}

impl std::error::Error for UnknownKnob {}

impl FromStr for KnobId {
    type Err = UnknownKnob;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KnobId::all()
            .into_iter()
            .find(|id| id.to_string() == s)
            .ok_or_else(|| UnknownKnob(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let knobs = Knobs::default();
        assert_eq!(knobs.top_oscillator.waveform, Waveform::Sawtooth);
        assert_eq!(knobs.sub_oscillator.waveform, Waveform::Square);
        assert_eq!(knobs.lpf.cutoff, 20000.0);
        assert_eq!(knobs.vca_eg.decay, 3.0);
        assert_eq!(knobs.vcf_eg.attack, 0.25);
        assert_eq!(knobs.get(KnobId::Envelope(EnvelopeTarget::Vca, EnvelopeStage::Sustain)), 0.001);
    }

    #[test]
    fn test_set_clamps() {
        let mut knobs = Knobs::default();
        assert_eq!(knobs.set(KnobId::OscillatorGain(OscillatorLayer::Top), 1.5), 1.0);
        assert_eq!(knobs.top_oscillator.gain, 1.0);

        let sustain = KnobId::Envelope(EnvelopeTarget::Vcf, EnvelopeStage::Sustain);
        assert_eq!(knobs.set(sustain, 0.0), 0.001);
        assert_eq!(knobs.set(KnobId::SubOctaves, 2.2), 2.0);
        assert_eq!(knobs.sub_octaves, 2);
    }

    #[test]
    fn test_oscillator_mix() {
        let mut knobs = Knobs::default();
        assert_eq!(knobs.oscillator_mix(), 0.5);
        knobs.set_oscillator_mix(0.25);
        assert_eq!(knobs.top_oscillator.gain, 0.75);
        assert_eq!(knobs.sub_oscillator.gain, 0.25);
        assert!((knobs.oscillator_mix() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_keytracked_cutoff() {
        let lpf = FilterKnobs {
            cutoff: 1000.0,
            resonance: 1.0,
            keytrack: 0.5,
        };
        assert_eq!(lpf.keytracked_cutoff(440.0), 1220.0);
    }

    #[test]
    fn test_knob_names() {
        for id in KnobId::all() {
            assert_eq!(id.to_string().parse::<KnobId>(), Ok(id));
            assert_eq!(id.info().default, Knobs::default().get(id));
        }
        assert_eq!(KnobId::all().len(), 16);
        assert!("lpf.drive".parse::<KnobId>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_json_round_trip() {
        let mut knobs = Knobs::default();
        knobs.lpf.keytrack = 1.5;
        let json = knobs.to_json().unwrap();
        assert!(json.contains("\"sawtooth\""));
        assert_eq!(Knobs::from_json(&json).unwrap(), knobs);

        let partial = Knobs::from_json(r#"{ "sub_octaves": 2 }"#).unwrap();
        assert_eq!(partial.sub_octaves, 2);
        assert_eq!(partial.lpf, Knobs::default().lpf);
    }
}
