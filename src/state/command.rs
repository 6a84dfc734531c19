// src/state/command.rs
//
// Commands from a controller thread to the instrument.
//
// Commands are the ONLY way a controller can mutate instrument state.
// They are queued and applied in order on the instrument's thread.

use super::{EnvelopeTarget, KnobId, OscillatorLayer};
use crate::envelope::EnvelopeSpec;
use crate::key::Key;
use crate::nodes::Waveform;

/// A command from a controller to the instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // ═══════════════════════════════════════════
    // Keys
    // ═══════════════════════════════════════════
    /// Press a key, at `time` or now.
    Press { key: Key, time: Option<f64> },

    /// Release a key, at `time` or now.
    Release { key: Key, time: Option<f64> },

    /// Press now and tell the peer.
    Play { key: Key },

    /// Release now and tell the peer.
    Stop { key: Key },

    /// Incoming wire message from the peer.
    Remote { message: String },

    // ═══════════════════════════════════════════
    // Knobs (future voices only)
    // ═══════════════════════════════════════════
    SetKnob { id: KnobId, value: f32 },

    SetWaveform {
        layer: OscillatorLayer,
        waveform: Waveform,
    },

    SetOscillatorMix { mix: f32 },

    SetEnvelope {
        target: EnvelopeTarget,
        spec: EnvelopeSpec,
    },

    // ═══════════════════════════════════════════
    // Bus (scheduled now)
    // ═══════════════════════════════════════════
    SetOutputGain { gain: f32 },

    SetEffectMix { mix: f32 },
}

impl Command {
    /// Key this command acts on, if any.
    pub fn key(&self) -> Option<Key> {
        match self {
            Command::Press { key, .. }
            | Command::Release { key, .. }
            | Command::Play { key }
            | Command::Stop { key } => Some(*key),
            _ => None,
        }
    }
}
