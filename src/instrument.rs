// src/instrument.rs
//
// Polyphonic instrument: key → voice allocation, subscriber notification,
// knob state, and disposal of voices once their release has played out.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::bus::{self, ImpulseLoader, MasterBus, WavFileLoader};
use crate::clock::{Clock, SystemClock};
use crate::envelope::EnvelopeSpec;
use crate::graph::{GraphError, SignalGraph};
use crate::key::Key;
use crate::message::WireMessage;
use crate::nodes::Waveform;
use crate::patch::{PatchKind, VoicePatch};
use crate::remote::{Applied, KeyTarget, MessageSink, RemoteSync};
use crate::state::{Command, EnvelopeTarget, KnobId, Knobs, OscillatorLayer};
use crate::voice::{Voice, VoiceBuilder, VoiceError};

/// Receives key state changes, e.g. to light up keys in a UI.
pub trait KeyObserver: Send {
    fn on_press(&mut self, key: Key);
    fn on_release(&mut self, key: Key);
}

/// [`KeyObserver`] from a pair of closures.
pub struct Callbacks<P, R> {
    pub on_press: P,
    pub on_release: R,
}

impl<P, R> KeyObserver for Callbacks<P, R>
where
    P: FnMut(Key) + Send,
    R: FnMut(Key) + Send,
{
    fn on_press(&mut self, key: Key) {
        (self.on_press)(key)
    }

    fn on_release(&mut self, key: Key) {
        (self.on_release)(key)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════

/// Everything needed to set up an instrument.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InstrumentConfig {
    pub patch: PatchKind,
    pub output_gain: f32,
    /// 0 is dry, 1 fully through the effect.
    pub effect_mix: f32,
    /// WAV impulse response for the effect stage, loaded in the background.
    pub impulse_response: Option<PathBuf>,
    /// Initial knob state. Only the subtractive patch reads knobs.
    pub knobs: Knobs,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            patch: PatchKind::default(),
            output_gain: bus::DEFAULT_OUTPUT_GAIN,
            effect_mix: 0.0,
            impulse_response: None,
            knobs: Knobs::default(),
        }
    }
}

/// Error reading a configuration file.
#[cfg(feature = "serde")]
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

#[cfg(feature = "serde")]
impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "could not read config: {}", e),
            ConfigError::Json(e) => write!(f, "invalid config: {}", e),
        }
    }
}

#[cfg(feature = "serde")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "serde")]
impl InstrumentConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Json)
    }

    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Json)
    }
}

// ═══════════════════════════════════════════════════════════════════
// Instrument
// ═══════════════════════════════════════════════════════════════════

/// A playable instrument.
///
/// Single-threaded: every operation runs to completion before the next.
/// Use [`create_bridge`](crate::create_bridge) to drive one from another
/// thread.
pub struct Instrument<C: Clock = SystemClock> {
    clock: C,
    graph: SignalGraph,
    bus: MasterBus,
    patch: Box<dyn VoicePatch>,
    patch_kind: PatchKind,
    knobs: Knobs,

    /// At most one voice per sounding key.
    voices: HashMap<Key, Voice>,
    /// Released voices still fading out.
    releasing: Vec<Voice>,

    subscribers: BTreeMap<String, Box<dyn KeyObserver>>,
    outbox: Option<Box<dyn MessageSink>>,
    remote: RemoteSync,
}

impl<C: Clock> Instrument<C> {
    pub fn new(config: InstrumentConfig, clock: C) -> Result<Self, GraphError> {
        let mut graph = SignalGraph::new();
        let bus = MasterBus::new(&mut graph, config.output_gain, config.effect_mix)?;

        let instrument = Self {
            clock,
            graph,
            bus,
            patch: config.patch.into_patch(),
            patch_kind: config.patch,
            knobs: config.knobs,
            voices: HashMap::new(),
            releasing: Vec::new(),
            subscribers: BTreeMap::new(),
            outbox: None,
            remote: RemoteSync::new(),
        };

        if let Some(path) = config.impulse_response {
            // Detached: the effect switches on whenever the file is decoded.
            let _ = instrument.load_impulse(WavFileLoader::new(path));
        }
        Ok(instrument)
    }

    /// Start loading an impulse response into the effect stage.
    pub fn load_impulse(&self, loader: impl ImpulseLoader) -> JoinHandle<()> {
        bus::load_in_background(loader, self.bus.impulse().clone())
    }

    #[inline]
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    // -------------------------------
    // MARK: Keys
    // -------------------------------

    /// Start a voice for `key` at `time` (default now).
    ///
    /// Returns `Ok(false)` if the key is already sounding.
    pub fn press(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError> {
        if self.voices.contains_key(&key) {
            return Ok(false);
        }
        let time = time.unwrap_or_else(|| self.clock.now());

        let mut builder = VoiceBuilder::new(&mut self.graph, key, time);
        let output = match self.patch.build(&mut builder, &self.knobs) {
            Ok(output) => output,
            Err(e) => {
                builder.abandon();
                return Err(e);
            }
        };
        let voice = builder.finish(output)?;
        if let Err(e) = self.graph.connect(voice.output(), self.bus.input()) {
            voice.dispose(&mut self.graph);
            return Err(e.into());
        }

        debug!("Press {} at {:.3} ({} voice)", key, time, self.patch.name());
        self.voices.insert(key, voice);
        for subscriber in self.subscribers.values_mut() {
            subscriber.on_press(key);
        }
        Ok(true)
    }

    /// Release the voice for `key` at `time` (default now).
    ///
    /// The key is free again as soon as this returns; the old voice keeps
    /// fading on its own and a new press starts an independent one.
    /// Returns `Ok(false)` if the key is not sounding.
    pub fn release(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError> {
        let Some(mut voice) = self.voices.remove(&key) else {
            return Ok(false);
        };
        let time = time.unwrap_or_else(|| self.clock.now());

        for subscriber in self.subscribers.values_mut() {
            subscriber.on_release(key);
        }

        match voice.release(&mut self.graph, time) {
            Ok(end) => {
                debug!("Release {} at {:.3}, silent at {:.3}", key, time, end);
                self.releasing.push(voice);
                Ok(true)
            }
            Err(e) => {
                voice.dispose(&mut self.graph);
                Err(e)
            }
        }
    }

    /// Press now and tell the peer, unless the key is already sounding.
    pub fn play(&mut self, key: Key) -> Result<bool, VoiceError> {
        if self.voices.contains_key(&key) {
            return Ok(false);
        }
        self.emit(WireMessage::press(key, self.now()));
        self.press(key, None)
    }

    /// Tell the peer, then release now.
    pub fn stop(&mut self, key: Key) -> Result<bool, VoiceError> {
        self.emit(WireMessage::release(key, self.now()));
        self.release(key, None)
    }

    /// Apply a message from the peer. Undecodable messages are dropped.
    pub fn handle_message(&mut self, text: &str) -> Result<Option<Applied>, VoiceError> {
        let mut remote = std::mem::take(&mut self.remote);
        let result = remote.handle_text(self, text);
        self.remote = remote;
        result
    }

    /// Start-time bookkeeping for remote presses.
    pub fn remote(&self) -> &RemoteSync {
        &self.remote
    }

    /// Where `play`/`stop` report to. Without one they behave like
    /// `press`/`release`.
    pub fn set_outbox(&mut self, sink: Box<dyn MessageSink>) {
        self.outbox = Some(sink);
    }

    pub fn take_outbox(&mut self) -> Option<Box<dyn MessageSink>> {
        self.outbox.take()
    }

    fn emit(&mut self, message: WireMessage) {
        if let Some(outbox) = self.outbox.as_mut() {
            outbox.send(&message);
        }
    }

    // -------------------------------
    // MARK: Subscribers
    // -------------------------------

    /// Register an observer. Re-using an id replaces the previous observer.
    pub fn subscribe(&mut self, observer: Box<dyn KeyObserver>, id: impl Into<String>) {
        self.subscribers.insert(id.into(), observer);
    }

    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subscribers.remove(id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // -------------------------------
    // MARK: Disposal
    // -------------------------------

    /// Advance to now, collect finished sources and free every released
    /// voice whose sources have all ended. Returns the number disposed.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now();
        for node in self.graph.advance(now) {
            let owner = self.releasing.iter_mut().any(|v| v.on_source_ended(node));
            if !owner {
                warn!("Source {} ended without a releasing voice", node);
            }
        }

        let (finished, fading): (Vec<_>, Vec<_>) = std::mem::take(&mut self.releasing)
            .into_iter()
            .partition(Voice::is_finished);
        self.releasing = fading;

        let disposed = finished.len();
        for voice in finished {
            let key = voice.key();
            let nodes = voice.dispose(&mut self.graph);
            debug!("Disposed {} ({} nodes)", key, nodes);
        }
        disposed
    }

    // -------------------------------
    // MARK: Knobs (future voices only)
    // -------------------------------

    pub fn knobs(&self) -> &Knobs {
        &self.knobs
    }

    pub fn set_knobs(&mut self, knobs: Knobs) {
        self.knobs = knobs;
    }

    /// Returns the clamped value stored.
    pub fn set_knob(&mut self, id: KnobId, value: f32) -> f32 {
        self.knobs.set(id, value)
    }

    pub fn set_oscillator_gain(&mut self, layer: OscillatorLayer, gain: f32) -> f32 {
        self.knobs.set(KnobId::OscillatorGain(layer), gain)
    }

    pub fn set_oscillator_waveform(&mut self, layer: OscillatorLayer, waveform: Waveform) {
        self.knobs.oscillator_mut(layer).waveform = waveform;
    }

    pub fn set_oscillator_mix(&mut self, mix: f32) {
        self.knobs.set_oscillator_mix(mix);
    }

    pub fn set_filter_cutoff(&mut self, cutoff: f32) -> f32 {
        self.knobs.set(KnobId::Cutoff, cutoff)
    }

    pub fn set_filter_resonance(&mut self, resonance: f32) -> f32 {
        self.knobs.set(KnobId::Resonance, resonance)
    }

    pub fn set_filter_keytrack(&mut self, keytrack: f32) -> f32 {
        self.knobs.set(KnobId::Keytrack, keytrack)
    }

    pub fn set_envelope(&mut self, target: EnvelopeTarget, spec: EnvelopeSpec) {
        *self.knobs.envelope_mut(target) = spec;
    }

    pub fn patch(&self) -> PatchKind {
        self.patch_kind
    }

    /// Switch presets. Sounding voices keep their old shape.
    pub fn set_patch(&mut self, patch: PatchKind) {
        self.patch = patch.into_patch();
        self.patch_kind = patch;
    }

    // -------------------------------
    // MARK: Bus (scheduled now)
    // -------------------------------

    pub fn set_output_gain(&mut self, gain: f32) -> Result<(), GraphError> {
        let now = self.clock.now();
        self.bus.set_output_gain(&mut self.graph, gain, now)
    }

    pub fn set_effect_mix(&mut self, mix: f32) -> Result<(), GraphError> {
        let now = self.clock.now();
        self.bus.set_effect_mix(&mut self.graph, mix, now)
    }

    // -------------------------------
    // MARK: Commands
    // -------------------------------

    /// Apply one controller command.
    pub fn apply(&mut self, command: Command) -> Result<(), VoiceError> {
        match command {
            Command::Press { key, time } => {
                self.press(key, time)?;
            }
            Command::Release { key, time } => {
                self.release(key, time)?;
            }
            Command::Play { key } => {
                self.play(key)?;
            }
            Command::Stop { key } => {
                self.stop(key)?;
            }
            Command::Remote { message } => {
                self.handle_message(&message)?;
            }
            Command::SetKnob { id, value } => {
                self.set_knob(id, value);
            }
            Command::SetWaveform { layer, waveform } => {
                self.set_oscillator_waveform(layer, waveform);
            }
            Command::SetOscillatorMix { mix } => self.set_oscillator_mix(mix),
            Command::SetEnvelope { target, spec } => self.set_envelope(target, spec),
            Command::SetOutputGain { gain } => self.set_output_gain(gain)?,
            Command::SetEffectMix { mix } => self.set_effect_mix(mix)?,
        }
        Ok(())
    }

    // -------------------------------
    // MARK: Inspection
    // -------------------------------

    pub fn is_sounding(&self, key: Key) -> bool {
        self.voices.contains_key(&key)
    }

    /// Sounding keys in pitch order.
    pub fn active_keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.voices.keys().copied().collect();
        keys.sort();
        keys
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn releasing_voices(&self) -> usize {
        self.releasing.len()
    }

    pub fn voice(&self, key: Key) -> Option<&Voice> {
        self.voices.get(&key)
    }

    pub fn graph(&self) -> &SignalGraph {
        &self.graph
    }

    pub fn bus(&self) -> &MasterBus {
        &self.bus
    }
}

impl<C: Clock> KeyTarget for Instrument<C> {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn press(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError> {
        Instrument::press(self, key, time)
    }

    fn release(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError> {
        Instrument::release(self, key, time)
    }
}

impl<C: Clock> fmt::Debug for Instrument<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrument")
            .field("patch", &self.patch_kind)
            .field("active", &self.active_keys())
            .field("releasing", &self.releasing.len())
            .field("nodes", &self.graph.len())
            .finish()
    }
}
