//! Thread-safe bridge between a controller (UI, socket reader) and the
//! instrument.
//!
//! # Architecture
//!
//! - **Controller thread** owns [`ControllerHandle`] with a local mirror of the [`Knobs`]
//! - **Instrument thread** owns [`InstrumentHandle`] with the [`Instrument`]
//! - Communication uses MPSC channels for commands and key events, atomics for readback
//!
//! The instrument drains commands in order, so the run-to-completion model
//! of a single-threaded instrument holds across threads.
//!
//! # Usage
//!
//! ```ignore
//! let (controller, mut instrument) = create_bridge(instrument);
//!
//! // Controller thread: send commands
//! controller.play(key);
//!
//! // Instrument thread: apply them and free finished voices
//! instrument.process_commands();
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, Sender},
};

use log::warn;

use crate::clock::Clock;
use crate::envelope::EnvelopeSpec;
use crate::instrument::{Instrument, KeyObserver};
use crate::key::Key;
use crate::nodes::Waveform;
use crate::state::{Command, EnvelopeTarget, KnobId, Knobs, OscillatorLayer};

/// Subscriber id the bridge registers on the instrument.
pub const BRIDGE_SUBSCRIBER: &str = "bridge";

/// Key state change, as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed(Key),
    Released(Key),
}

/// Forwards key events into a channel.
struct ChannelObserver {
    tx: Sender<KeyEvent>,
}

impl KeyObserver for ChannelObserver {
    fn on_press(&mut self, key: Key) {
        let _ = self.tx.send(KeyEvent::Pressed(key));
    }

    fn on_release(&mut self, key: Key) {
        let _ = self.tx.send(KeyEvent::Released(key));
    }
}

/// Snapshot of instrument state for display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InstrumentReadback {
    pub active_voices: usize,
    pub releasing_voices: usize,
    /// Instrument clock at the last sync.
    pub time: f64,
    /// Commands that failed since creation.
    pub failed_commands: u64,
}

/// Lock-free shared state for instrument -> controller readback.
struct SharedReadback {
    active_voices: AtomicU64,
    releasing_voices: AtomicU64,
    /// Stored as f64 bits (no AtomicF64 in std)
    time_bits: AtomicU64,
    failed_commands: AtomicU64,
}

impl SharedReadback {
    fn new() -> Self {
        Self {
            active_voices: AtomicU64::new(0),
            releasing_voices: AtomicU64::new(0),
            time_bits: AtomicU64::new(0.0_f64.to_bits()),
            failed_commands: AtomicU64::new(0),
        }
    }
}

/// Handle for the controller thread.
pub struct ControllerHandle {
    /// Local copy of the knobs, updated optimistically.
    knobs: Knobs,

    command_tx: Sender<Command>,

    event_rx: Receiver<KeyEvent>,

    readback: Arc<SharedReadback>,
}

/// Handle for the thread that owns the instrument.
pub struct InstrumentHandle<C: Clock> {
    instrument: Instrument<C>,

    command_rx: Receiver<Command>,

    readback: Arc<SharedReadback>,
}

/// Create a linked pair of handles around `instrument`.
///
/// Registers a subscriber on the instrument that feeds
/// [`ControllerHandle::poll_events`].
pub fn create_bridge<C: Clock>(mut instrument: Instrument<C>) -> (ControllerHandle, InstrumentHandle<C>) {
    let (command_tx, command_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let readback = Arc::new(SharedReadback::new());

    instrument.subscribe(Box::new(ChannelObserver { tx: event_tx }), BRIDGE_SUBSCRIBER);

    let controller = ControllerHandle {
        knobs: instrument.knobs().clone(),
        command_tx,
        event_rx,
        readback: Arc::clone(&readback),
    };

    let handle = InstrumentHandle {
        instrument,
        command_rx,
        readback,
    };
    handle.sync_readback();

    (controller, handle)
}

// ═══════════════════════════════════════════════════════════════════
// ControllerHandle - Controller Thread API
// ═══════════════════════════════════════════════════════════════════

impl ControllerHandle {
    /// Knob state as last sent.
    pub fn knobs(&self) -> &Knobs {
        &self.knobs
    }

    /// Send a command to the instrument.
    ///
    /// Knob edits are applied to the local copy first for immediate UI feedback.
    pub fn send(&mut self, cmd: Command) {
        self.apply_to_knobs(&cmd);
        let _ = self.command_tx.send(cmd);
    }

    fn apply_to_knobs(&mut self, cmd: &Command) {
        match cmd {
            Command::SetKnob { id, value } => {
                self.knobs.set(*id, *value);
            }
            Command::SetWaveform { layer, waveform } => {
                self.knobs.oscillator_mut(*layer).waveform = *waveform;
            }
            Command::SetOscillatorMix { mix } => self.knobs.set_oscillator_mix(*mix),
            Command::SetEnvelope { target, spec } => *self.knobs.envelope_mut(*target) = *spec,
            // Commands that don't affect knob state
            Command::Press { .. }
            | Command::Release { .. }
            | Command::Play { .. }
            | Command::Stop { .. }
            | Command::Remote { .. }
            | Command::SetOutputGain { .. }
            | Command::SetEffectMix { .. } => {}
        }
    }

    /// Drain key events published since the last call.
    pub fn poll_events(&self) -> Vec<KeyEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Next pending key event, if any.
    pub fn try_event(&self) -> Option<KeyEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn readback(&self) -> InstrumentReadback {
        InstrumentReadback {
            active_voices: self.readback.active_voices.load(Ordering::Relaxed) as usize,
            releasing_voices: self.readback.releasing_voices.load(Ordering::Relaxed) as usize,
            time: f64::from_bits(self.readback.time_bits.load(Ordering::Relaxed)),
            failed_commands: self.readback.failed_commands.load(Ordering::Relaxed),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Convenience methods
    // ───────────────────────────────────────────────────────────────

    pub fn press(&mut self, key: Key) {
        self.send(Command::Press { key, time: None });
    }

    pub fn release(&mut self, key: Key) {
        self.send(Command::Release { key, time: None });
    }

    pub fn play(&mut self, key: Key) {
        self.send(Command::Play { key });
    }

    pub fn stop(&mut self, key: Key) {
        self.send(Command::Stop { key });
    }

    /// Forward a message received from the peer.
    pub fn remote(&mut self, message: impl Into<String>) {
        self.send(Command::Remote {
            message: message.into(),
        });
    }

    pub fn set_knob(&mut self, id: KnobId, value: f32) {
        self.send(Command::SetKnob { id, value });
    }

    pub fn set_waveform(&mut self, layer: OscillatorLayer, waveform: Waveform) {
        self.send(Command::SetWaveform { layer, waveform });
    }

    pub fn set_envelope(&mut self, target: EnvelopeTarget, spec: EnvelopeSpec) {
        self.send(Command::SetEnvelope { target, spec });
    }

    pub fn set_output_gain(&mut self, gain: f32) {
        self.send(Command::SetOutputGain { gain });
    }

    pub fn set_effect_mix(&mut self, mix: f32) {
        self.send(Command::SetEffectMix { mix });
    }
}

// ═══════════════════════════════════════════════════════════════════
// InstrumentHandle - Instrument Thread API
// ═══════════════════════════════════════════════════════════════════

impl<C: Clock> InstrumentHandle<C> {
    /// Apply all pending commands in order, free finished voices and
    /// publish readback. Returns the number of commands applied.
    pub fn process_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(cmd) = self.command_rx.try_recv() {
            if let Err(e) = self.instrument.apply(cmd) {
                warn!("Command failed: {}", e);
                self.readback.failed_commands.fetch_add(1, Ordering::Relaxed);
            }
            applied += 1;
        }
        self.instrument.poll();
        self.sync_readback();
        applied
    }

    /// Try to receive a single command (non-blocking).
    pub fn try_recv(&self) -> Option<Command> {
        self.command_rx.try_recv().ok()
    }

    pub fn instrument(&self) -> &Instrument<C> {
        &self.instrument
    }

    pub fn instrument_mut(&mut self) -> &mut Instrument<C> {
        &mut self.instrument
    }

    pub fn into_instrument(self) -> Instrument<C> {
        self.instrument
    }

    /// Publish voice counts and clock.
    pub fn sync_readback(&self) {
        self.readback
            .active_voices
            .store(self.instrument.active_voices() as u64, Ordering::Relaxed);
        self.readback
            .releasing_voices
            .store(self.instrument.releasing_voices() as u64, Ordering::Relaxed);
        self.readback
            .time_bits
            .store(self.instrument.now().to_bits(), Ordering::Relaxed);
    }
}
