// src/bus.rs
//
// Shared output bus every voice feeds, and the impulse-response asset its
// effect stage waits on.
//
// ```text
//        ┌─► dry ──────────────┐
// send ──┤                     ├─► output
//        └─► convolver ─► wet ─┘
// ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::graph::{GraphError, SignalGraph};
use crate::node::{NodeId, ParamRef, ParamSlot};
use crate::nodes::{ImpulseResponse, ImpulseSlot};
use crate::state::mix_to_dry_wet;

/// Voices the output gain is scaled for.
pub const NOMINAL_VOICES: usize = 5;

pub const DEFAULT_OUTPUT_GAIN: f32 = 1.0 / NOMINAL_VOICES as f32;

pub struct MasterBus {
    send: NodeId,
    dry: NodeId,
    convolver: NodeId,
    wet: NodeId,
    output: NodeId,
    impulse: ImpulseSlot,
}

impl MasterBus {
    pub fn new(
        graph: &mut SignalGraph,
        output_gain: f32,
        effect_mix: f32,
    ) -> Result<Self, GraphError> {
        let impulse = ImpulseSlot::new();
        let send = graph.add_gain();
        let dry = graph.add_gain();
        let convolver = graph.add_convolver(impulse.clone());
        let wet = graph.add_gain();
        let output = graph.add_gain();

        graph.connect(send, dry)?;
        graph.connect(send, convolver)?;
        graph.connect(convolver, wet)?;
        graph.connect(dry, output)?;
        graph.connect(wet, output)?;

        let bus = Self {
            send,
            dry,
            convolver,
            wet,
            output,
            impulse,
        };
        let (dry_gain, wet_gain) = mix_to_dry_wet(effect_mix);
        bus.set_default(graph, bus.dry, dry_gain);
        bus.set_default(graph, bus.wet, wet_gain);
        bus.set_default(graph, bus.output, output_gain);
        Ok(bus)
    }

    /// Node voices connect their output to.
    #[inline]
    pub fn input(&self) -> NodeId {
        self.send
    }

    #[inline]
    pub fn output(&self) -> NodeId {
        self.output
    }

    #[inline]
    pub fn convolver(&self) -> NodeId {
        self.convolver
    }

    /// Slot the effect's impulse response is loaded into.
    pub fn impulse(&self) -> &ImpulseSlot {
        &self.impulse
    }

    /// Whether the effect stage has its impulse response.
    pub fn effect_ready(&self, graph: &SignalGraph) -> bool {
        graph.effect_ready(self.convolver).unwrap_or(false)
    }

    pub fn set_output_gain(
        &self,
        graph: &mut SignalGraph,
        gain: f32,
        time: f64,
    ) -> Result<(), GraphError> {
        Self::schedule(graph, self.output, gain, time)
    }

    /// 0 is fully dry, 1 fully through the effect.
    pub fn set_effect_mix(
        &self,
        graph: &mut SignalGraph,
        mix: f32,
        time: f64,
    ) -> Result<(), GraphError> {
        let (dry, wet) = mix_to_dry_wet(mix);
        Self::schedule(graph, self.dry, dry, time)?;
        Self::schedule(graph, self.wet, wet, time)
    }

    pub fn output_gain_at(&self, graph: &SignalGraph, time: f64) -> Option<f32> {
        graph
            .param(ParamRef::new(self.output, ParamSlot::Gain))
            .map(|p| p.value_at(time))
    }

    pub fn effect_mix_at(&self, graph: &SignalGraph, time: f64) -> Option<f32> {
        graph
            .param(ParamRef::new(self.wet, ParamSlot::Gain))
            .map(|p| p.value_at(time))
    }

    fn schedule(
        graph: &mut SignalGraph,
        node: NodeId,
        value: f32,
        time: f64,
    ) -> Result<(), GraphError> {
        let param = ParamRef::new(node, ParamSlot::Gain);
        let p = graph.param_mut(param).ok_or(GraphError::UnknownParam(param))?;
        p.cancel_scheduled_values(time);
        p.set_value_at_time(value, time);
        Ok(())
    }

    fn set_default(&self, graph: &mut SignalGraph, node: NodeId, value: f32) {
        if let Some(p) = graph.param_mut(ParamRef::new(node, ParamSlot::Gain)) {
            p.set_default(value);
        }
    }
}

// -------------------------------
// MARK: Impulse response loading
// -------------------------------

/// Error loading an impulse response.
#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Wav(hound::Error),
    /// Decoded to zero frames.
    Empty,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "I/O error: {}", e),
            LoadError::Wav(e) => write!(f, "WAV decode error: {}", e),
            LoadError::Empty => write!(f, "impulse response has no frames"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            LoadError::Wav(e) => Some(e),
            LoadError::Empty => None,
        }
    }
}

impl From<hound::Error> for LoadError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(e) => LoadError::Io(e),
            other => LoadError::Wav(other),
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e)
    }
}

/// Source of an impulse response.
pub trait ImpulseLoader: Send + 'static {
    /// Human-readable origin, for logging.
    fn describe(&self) -> String;

    fn load(&self) -> Result<ImpulseResponse, LoadError>;
}

/// Decodes a WAV file into per-channel buffers.
#[derive(Debug, Clone)]
pub struct WavFileLoader {
    path: PathBuf,
}

impl WavFileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImpulseLoader for WavFileLoader {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<ImpulseResponse, LoadError> {
        let reader = hound::WavReader::open(&self.path)?;
        let spec = reader.spec();
        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let channel_count = spec.channels.max(1) as usize;
        let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        let response = ImpulseResponse {
            sample_rate: spec.sample_rate,
            channels,
        };
        if response.frames() == 0 {
            return Err(LoadError::Empty);
        }
        Ok(response)
    }
}

/// Load on a background thread and fill `slot` when done.
///
/// Failure leaves the slot empty and the bus dry. Nothing waits on the
/// result; voices pressed before it lands simply miss the effect.
pub fn load_in_background(loader: impl ImpulseLoader, slot: ImpulseSlot) -> JoinHandle<()> {
    thread::spawn(move || match loader.load() {
        Ok(response) => {
            info!(
                "Loaded impulse response {} ({} ch, {:.2}s)",
                loader.describe(),
                response.channels.len(),
                response.duration()
            );
            slot.fill(response);
        }
        Err(e) => {
            warn!(
                "Impulse response {} failed to load, effect stays dry: {}",
                loader.describe(),
                e
            );
        }
    })
}
