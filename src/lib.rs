// src/lib.rs
//
// Library entry point for Rust, FFI (iOS/Swift) and wasm consumers.

mod bridge;
mod bus;
mod clock;
mod envelope;
mod graph;
mod instrument;
mod key;
mod message;
mod node;
mod nodes;
mod parameter;
mod patch;
mod remote;
mod state;
mod voice;

#[cfg(feature = "ios")]
pub mod ffi;

#[cfg(feature = "web")]
pub mod wasm;

#[cfg(test)]
mod test;

// Re-export key types for Rust consumers
pub use bridge::{ControllerHandle, InstrumentHandle, InstrumentReadback, KeyEvent, create_bridge};
pub use bus::{ImpulseLoader, LoadError, MasterBus, WavFileLoader};
pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{EnvelopeError, EnvelopeGenerator, EnvelopeSpec, SegmentLaws};
pub use graph::{Endpoint, GraphError, SignalGraph};
pub use instrument::{Callbacks, Instrument, InstrumentConfig, KeyObserver};
pub use key::{Key, KeyParseError};
pub use message::{Action, MessageError, WireMessage};
pub use node::{NodeId, NodeKind, ParamRef, ParamSlot};
pub use nodes::{FilterType, ImpulseResponse, Waveform};
pub use parameter::{RampLaw, ScheduledParam};
pub use patch::{OrganPatch, PatchKind, PianoPatch, SubtractivePatch, VoicePatch};
pub use remote::{Applied, ChannelSink, KeyTarget, MessageSink, QueueSink, RemoteSync};
pub use state::{Command, EnvelopeStage, EnvelopeTarget, KnobId, Knobs, OscillatorLayer, ParamInfo};
pub use voice::{Voice, VoiceBuilder, VoiceError};

#[cfg(feature = "serde")]
pub use instrument::ConfigError;
