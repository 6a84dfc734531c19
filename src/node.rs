// src/node.rs

use crate::nodes::{FilterType, ImpulseSlot, Waveform};
use crate::parameter::ScheduledParam;

/// Node identifier inside a [`SignalGraph`](crate::graph::SignalGraph).
pub type NodeId = u32;

/// Which scheduled parameter of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSlot {
    Frequency,
    /// Pitch offset in cents
    Detune,
    Gain,
    Q,
}

/// Address of one scheduled parameter in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub slot: ParamSlot,
}

impl ParamRef {
    #[inline]
    pub fn new(node: NodeId, slot: ParamSlot) -> Self {
        Self { node, slot }
    }
}

/// Closed set of node kinds, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Oscillator,
    Gain,
    Filter,
    Convolver,
}

/// Start/stop schedule of a signal source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceLifetime {
    pub start: Option<f64>,
    pub stop: Option<f64>,
    pub ended: bool,
}

impl SourceLifetime {
    /// Whether the source is producing signal at `time`.
    pub fn is_running_at(&self, time: f64) -> bool {
        match (self.start, self.stop) {
            (Some(start), Some(stop)) => time >= start && time < stop,
            (Some(start), None) => time >= start,
            _ => false,
        }
    }
}

/// Core graph node trait.
///
/// Nodes:
/// - do NOT know about voices or keys
/// - do NOT render samples here
/// - ONLY expose their scheduled parameters and, for sources, their lifetime
pub trait Node: Send {
    fn kind(&self) -> NodeKind;

    fn param(&self, slot: ParamSlot) -> Option<&ScheduledParam>;

    fn param_mut(&mut self, slot: ParamSlot) -> Option<&mut ScheduledParam>;

    /// Lifetime for nodes that generate signal on their own.
    fn lifetime(&self) -> Option<&SourceLifetime> {
        None
    }

    fn lifetime_mut(&mut self) -> Option<&mut SourceLifetime> {
        None
    }

    fn waveform(&self) -> Option<Waveform> {
        None
    }

    fn filter_type(&self) -> Option<FilterType> {
        None
    }

    /// Impulse response slot of a convolution stage.
    fn impulse(&self) -> Option<&ImpulseSlot> {
        None
    }
}
