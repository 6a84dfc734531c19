// src/patch.rs
//
// Voice presets. A patch decides which nodes a voice is made of and how
// they are wired; the instrument owns what happens to the voice afterwards.

use std::fmt;
use std::str::FromStr;

use crate::envelope::{EnvelopeSpec, SegmentLaws};
use crate::node::{NodeId, ParamRef, ParamSlot};
use crate::nodes::{FilterType, Waveform};
use crate::state::Knobs;
use crate::voice::{VoiceBuilder, VoiceError};

/// Builds the sub-graph of one voice.
pub trait VoicePatch: Send {
    fn name(&self) -> &'static str;

    /// Create and wire the voice's nodes. Returns the node carrying the
    /// voice's final signal.
    fn build(&self, voice: &mut VoiceBuilder<'_>, knobs: &Knobs) -> Result<NodeId, VoiceError>;
}

// ═══════════════════════════════════════════════════════════════════
// Subtractive
// ═══════════════════════════════════════════════════════════════════

/// Two-oscillator subtractive voice shaped entirely by [`Knobs`].
///
/// ```text
/// top ─► top gain ─┐
///                  ├─► amp (VCA) ─► low-pass (VCF) ─► out
/// sub ─► sub gain ─┘
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SubtractivePatch;

impl SubtractivePatch {
    /// Frequency of the sub oscillator, from the pitch table when the
    /// transposed key exists and by division otherwise.
    pub fn sub_frequency(voice: &VoiceBuilder<'_>, octaves: u8) -> f32 {
        let shifted = i8::try_from(octaves)
            .ok()
            .and_then(|o| voice.key().transpose_octaves(-o));
        match shifted {
            Some(key) => key.frequency(),
            None => voice.frequency() / 2.0_f32.powi(octaves as i32),
        }
    }
}

impl VoicePatch for SubtractivePatch {
    fn name(&self) -> &'static str {
        "subtractive"
    }

    fn build(&self, voice: &mut VoiceBuilder<'_>, knobs: &Knobs) -> Result<NodeId, VoiceError> {
        let frequency = voice.frequency();
        let sub_frequency = Self::sub_frequency(voice, knobs.sub_octaves);

        let top = voice.oscillator(knobs.top_oscillator.waveform, frequency, 0.0);
        let sub = voice.oscillator(knobs.sub_oscillator.waveform, sub_frequency, 0.0);
        let top_gain = voice.gain(knobs.top_oscillator.gain);
        let sub_gain = voice.gain(knobs.sub_oscillator.gain);

        let amp = voice.gain(0.0);
        let lpf = voice.filter(FilterType::Lowpass, 0.0, knobs.lpf.resonance);

        voice.connect(top, top_gain)?;
        voice.connect(sub, sub_gain)?;
        voice.connect(top_gain, amp)?;
        voice.connect(sub_gain, amp)?;
        voice.connect(amp, lpf)?;

        let vca = knobs.vca_eg;
        let vcf = knobs
            .vcf_eg
            .with_amount(knobs.lpf.keytracked_cutoff(frequency));
        voice.envelope(vca, ParamRef::new(amp, ParamSlot::Gain))?;
        voice.envelope(vcf, ParamRef::new(lpf, ParamSlot::Frequency))?;
        voice.layer(&[top, sub], vca.release);

        Ok(lpf)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Piano
// ═══════════════════════════════════════════════════════════════════

/// Layered piano voice: a short square "impact" over a long triangle body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PianoPatch;

impl PianoPatch {
    /// Slightly sharp of the table pitch.
    pub const NEAR_UNIT: f32 = 1.005;
    pub const FULL_DECAY: f64 = 9.0;
    pub const BANDPASS_Q: f32 = 0.3;
    pub const HIGHPASS_Q: f32 = 1.0;

    pub fn impact_envelope() -> EnvelopeSpec {
        EnvelopeSpec::new(0.01, 0.1, 0.4, 0.001, 0.05)
    }

    pub fn body_envelope() -> EnvelopeSpec {
        EnvelopeSpec::new(0.05, 0.0, Self::FULL_DECAY, 0.05, 0.25)
    }

    /// Oscillators at `detunes` cents, each scaled by `level`, summed into an
    /// envelope-driven layer gain.
    fn layer(
        voice: &mut VoiceBuilder<'_>,
        waveform: Waveform,
        frequency: f32,
        detunes: &[f32],
        level: f32,
        envelope: EnvelopeSpec,
    ) -> Result<NodeId, VoiceError> {
        let output = voice.gain(0.0);
        let mut sources = Vec::with_capacity(detunes.len());
        for &detune in detunes {
            let osc = voice.oscillator(waveform, frequency, detune);
            let gain = voice.gain(level);
            voice.connect(osc, gain)?;
            voice.connect(gain, output)?;
            sources.push(osc);
        }
        voice.envelope(envelope, ParamRef::new(output, ParamSlot::Gain))?;
        voice.layer(&sources, envelope.release);
        Ok(output)
    }
}

impl VoicePatch for PianoPatch {
    fn name(&self) -> &'static str {
        "piano"
    }

    fn build(&self, voice: &mut VoiceBuilder<'_>, _knobs: &Knobs) -> Result<NodeId, VoiceError> {
        let frequency = voice.frequency() * Self::NEAR_UNIT;

        let impact = Self::layer(
            voice,
            Waveform::Square,
            frequency,
            &[9.0, 12.0],
            0.5,
            Self::impact_envelope(),
        )?;
        let body = Self::layer(
            voice,
            Waveform::Triangle,
            frequency,
            &[6.0, -2.0, -4.0],
            0.333,
            Self::body_envelope(),
        )?;

        let impact_mix = voice.gain(0.5);
        let body_mix = voice.gain(0.5);
        // Strips rumble below the fundamental before the resonant band.
        let highpass = voice.filter(FilterType::Highpass, frequency, Self::HIGHPASS_Q);
        let bandpass = voice.filter(FilterType::Bandpass, frequency, Self::BANDPASS_Q);
        let output = voice.gain(1.0);

        voice.connect(impact, impact_mix)?;
        voice.connect(body, body_mix)?;
        voice.connect(impact_mix, highpass)?;
        voice.connect(body_mix, highpass)?;
        voice.connect(highpass, bandpass)?;
        voice.connect(bandpass, output)?;

        Ok(output)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Organ
// ═══════════════════════════════════════════════════════════════════

/// Sine plus octave with vibrato on the fundamental.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrganPatch;

impl OrganPatch {
    pub const VIBRATO_RATE: f32 = 5.0;
    /// Peak frequency deviation in Hz.
    pub const VIBRATO_DEPTH: f32 = 6.5;

    pub fn envelope() -> EnvelopeSpec {
        EnvelopeSpec::new(0.03, 0.05, 0.3, 0.05, 0.4).with_laws(SegmentLaws::LINEAR_HOLD)
    }
}

impl VoicePatch for OrganPatch {
    fn name(&self) -> &'static str {
        "organ"
    }

    fn build(&self, voice: &mut VoiceBuilder<'_>, _knobs: &Knobs) -> Result<NodeId, VoiceError> {
        let frequency = voice.frequency();

        let fundamental = voice.oscillator(Waveform::Sine, frequency, 0.0);
        let octave = voice.oscillator(Waveform::Sine, frequency * 2.0, 0.0);
        let fundamental_gain = voice.gain(0.7);
        let octave_gain = voice.gain(0.3);

        let vibrato = voice.oscillator(Waveform::Sine, Self::VIBRATO_RATE, 0.0);
        let vibrato_depth = voice.gain(Self::VIBRATO_DEPTH);
        voice.connect(vibrato, vibrato_depth)?;
        voice.connect(vibrato_depth, ParamRef::new(fundamental, ParamSlot::Frequency))?;

        let amp = voice.gain(0.0);
        voice.connect(fundamental, fundamental_gain)?;
        voice.connect(octave, octave_gain)?;
        voice.connect(fundamental_gain, amp)?;
        voice.connect(octave_gain, amp)?;

        let envelope = Self::envelope();
        voice.envelope(envelope, ParamRef::new(amp, ParamSlot::Gain))?;
        voice.layer(&[fundamental, octave, vibrato], envelope.release);

        Ok(amp)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Selection
// ═══════════════════════════════════════════════════════════════════

/// Named patch, for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PatchKind {
    #[default]
    Subtractive,
    Piano,
    Organ,
}

impl PatchKind {
    pub fn into_patch(self) -> Box<dyn VoicePatch> {
        match self {
            PatchKind::Subtractive => Box::new(SubtractivePatch),
            PatchKind::Piano => Box::new(PianoPatch),
            PatchKind::Organ => Box::new(OrganPatch),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PatchKind::Subtractive => "subtractive",
            PatchKind::Piano => "piano",
            PatchKind::Organ => "organ",
        }
    }
}

impl fmt::Display for PatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPatch(pub String);

impl fmt::Display for UnknownPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown patch '{}'", self.0)
    }
}

impl std::error::Error for UnknownPatch {}

impl FromStr for PatchKind {
    type Err = UnknownPatch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "subtractive" | "synth" => Ok(PatchKind::Subtractive),
            "piano" => Ok(PatchKind::Piano),
            "organ" => Ok(PatchKind::Organ),
            _ => Err(UnknownPatch(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Endpoint, SignalGraph};
    use crate::key::Key;
    use crate::node::NodeKind;

    fn build(patch: &dyn VoicePatch, knobs: &Knobs, key: &str) -> (SignalGraph, crate::voice::Voice) {
        let mut graph = SignalGraph::new();
        let key: Key = key.parse().unwrap();
        let mut builder = VoiceBuilder::new(&mut graph, key, 0.0);
        let output = patch.build(&mut builder, knobs).unwrap();
        let voice = builder.finish(output).unwrap();
        (graph, voice)
    }

    fn waveforms(graph: &SignalGraph, voice: &crate::voice::Voice) -> Vec<Waveform> {
        voice
            .sources()
            .iter()
            .map(|s| graph.waveform(s.node).unwrap())
            .collect()
    }

    fn oscillator_frequencies(graph: &SignalGraph, voice: &crate::voice::Voice) -> Vec<f32> {
        voice
            .sources()
            .iter()
            .map(|s| {
                graph
                    .param(ParamRef::new(s.node, ParamSlot::Frequency))
                    .unwrap()
                    .default_value()
            })
            .collect()
    }

    #[test]
    fn test_subtractive_topology() {
        let knobs = Knobs::default();
        let (graph, voice) = build(&SubtractivePatch, &knobs, "A-4");

        assert_eq!(voice.sources().len(), 2);
        assert_eq!(voice.envelopes().len(), 2);
        assert_eq!(graph.kind(voice.output()), Some(NodeKind::Filter));
        assert_eq!(graph.filter_type(voice.output()), Some(FilterType::Lowpass));
        assert_eq!(waveforms(&graph, &voice), vec![Waveform::Sawtooth, Waveform::Square]);
        let freqs = oscillator_frequencies(&graph, &voice);
        assert!((freqs[0] - 440.0).abs() < 1e-3);
        assert!((freqs[1] - 220.0).abs() < 1e-3);

        // both envelopes read the knob snapshot
        let vcf = voice.envelopes()[1].spec();
        assert_eq!(vcf.amount, 20000.0);
        assert!(voice.sources().iter().all(|s| s.tail == knobs.vca_eg.release));
    }

    #[test]
    fn test_subtractive_waveforms_follow_knobs() {
        let mut knobs = Knobs::default();
        knobs.top_oscillator.waveform = Waveform::Triangle;
        knobs.sub_oscillator.waveform = Waveform::Sine;
        let (graph, voice) = build(&SubtractivePatch, &knobs, "C-3");
        assert_eq!(waveforms(&graph, &voice), vec![Waveform::Triangle, Waveform::Sine]);
    }

    #[test]
    fn test_subtractive_keytrack() {
        let mut knobs = Knobs::default();
        knobs.lpf.cutoff = 1000.0;
        knobs.lpf.keytrack = 2.0;
        let (graph, voice) = build(&SubtractivePatch, &knobs, "A-4");

        let lpf = ParamRef::new(voice.output(), ParamSlot::Frequency);
        let peak = graph.param(lpf).unwrap().value_at(knobs.vcf_eg.attack);
        assert!((peak - 1880.0).abs() < 0.5);
    }

    #[test]
    fn test_sub_falls_back_below_range() {
        let mut knobs = Knobs::default();
        knobs.sub_octaves = 2;
        let (graph, voice) = build(&SubtractivePatch, &knobs, "C-1");
        let freqs = oscillator_frequencies(&graph, &voice);
        assert!((freqs[1] - freqs[0] / 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_piano_layers() {
        let (graph, voice) = build(&PianoPatch, &Knobs::default(), "A-4");
        assert_eq!(voice.sources().len(), 5);
        assert_eq!(voice.envelopes().len(), 2);

        let tails: Vec<f64> = voice.sources().iter().map(|s| s.tail).collect();
        assert_eq!(tails, vec![0.05, 0.05, 0.25, 0.25, 0.25]);

        let f = 440.0 * PianoPatch::NEAR_UNIT;
        for freq in oscillator_frequencies(&graph, &voice) {
            assert!((freq - f).abs() < 1e-3);
        }

        let detunes: Vec<f32> = voice
            .sources()
            .iter()
            .map(|s| {
                graph
                    .param(ParamRef::new(s.node, ParamSlot::Detune))
                    .unwrap()
                    .default_value()
            })
            .collect();
        assert_eq!(detunes, vec![9.0, 12.0, 6.0, -2.0, -4.0]);

        // square impact, triangle body
        assert_eq!(
            waveforms(&graph, &voice),
            vec![
                Waveform::Square,
                Waveform::Square,
                Waveform::Triangle,
                Waveform::Triangle,
                Waveform::Triangle,
            ]
        );
        let effective = graph.frequency_at(voice.sources()[1].node, 0.0).unwrap();
        assert!(effective > f && effective < f * 1.01, "impact detuned up");
    }

    #[test]
    fn test_piano_filter_chain() {
        let (graph, voice) = build(&PianoPatch, &Knobs::default(), "A-4");
        let f = 440.0 * PianoPatch::NEAR_UNIT;

        let bandpass = graph.inputs(voice.output());
        assert_eq!(bandpass.len(), 1);
        assert_eq!(graph.filter_type(bandpass[0]), Some(FilterType::Bandpass));
        let q = graph.param(ParamRef::new(bandpass[0], ParamSlot::Q)).unwrap();
        assert_eq!(q.default_value(), PianoPatch::BANDPASS_Q);

        let highpass = graph.inputs(bandpass[0]);
        assert_eq!(highpass.len(), 1);
        assert_eq!(graph.filter_type(highpass[0]), Some(FilterType::Highpass));
        assert!((graph.frequency_at(highpass[0], 0.0).unwrap() - f).abs() < 1e-3);
        // both layer mixes feed the highpass
        assert_eq!(graph.inputs(highpass[0]).len(), 2);
    }

    #[test]
    fn test_organ_vibrato_modulates_fundamental() {
        let (graph, voice) = build(&OrganPatch, &Knobs::default(), "A-4");
        let fundamental = voice.sources()[0].node;
        let target = Endpoint::Param(ParamRef::new(fundamental, ParamSlot::Frequency));
        let depth = graph.inputs(target);
        assert_eq!(depth.len(), 1);
        assert_eq!(
            graph
                .param(ParamRef::new(depth[0], ParamSlot::Gain))
                .unwrap()
                .default_value(),
            OrganPatch::VIBRATO_DEPTH
        );
        assert_eq!(voice.envelopes()[0].spec().laws, SegmentLaws::LINEAR_HOLD);
    }

    #[test]
    fn test_patch_kind_names() {
        for kind in [PatchKind::Subtractive, PatchKind::Piano, PatchKind::Organ] {
            assert_eq!(kind.to_string().parse::<PatchKind>(), Ok(kind));
            assert_eq!(kind.into_patch().name(), kind.name());
        }
        assert!("harpsichord".parse::<PatchKind>().is_err());
    }
}
