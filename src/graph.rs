//! Signal graph: the node arena every voice and the shared bus are built in.
//!
//! The graph records topology, scheduled parameters and source lifetimes.
//! Whatever renders audio (a host DSP runtime) mirrors it; the graph itself
//! only answers "what is scheduled" and "which sources have finished".

use std::collections::BTreeMap;
use std::fmt;

use crate::node::{Node, NodeId, NodeKind, ParamRef, ParamSlot, SourceLifetime};
use crate::nodes::{
    BiquadFilter, Convolver, FilterType, Gain, ImpulseSlot, Oscillator, Waveform, detuned,
};
use crate::parameter::ScheduledParam;

/// Where a connection lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Audio input of a node.
    Node(NodeId),
    /// Audio-rate modulation of a parameter.
    Param(ParamRef),
}

impl From<NodeId> for Endpoint {
    fn from(node: NodeId) -> Self {
        Endpoint::Node(node)
    }
}

impl From<ParamRef> for Endpoint {
    fn from(param: ParamRef) -> Self {
        Endpoint::Param(param)
    }
}

impl Endpoint {
    #[inline]
    pub fn node(&self) -> NodeId {
        match self {
            Endpoint::Node(id) => *id,
            Endpoint::Param(param) => param.node,
        }
    }
}

/// Error from a graph operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphError {
    UnknownNode(NodeId),
    UnknownParam(ParamRef),
    /// Only sources can be started or stopped.
    NotASource(NodeId),
    AlreadyStarted(NodeId),
    NotStarted(NodeId),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownNode(id) => write!(f, "Node {} does not exist", id),
            GraphError::UnknownParam(param) => {
                write!(f, "Node {} has no {:?} parameter", param.node, param.slot)
            }
            GraphError::NotASource(id) => write!(f, "Node {} is not a source", id),
            GraphError::AlreadyStarted(id) => write!(f, "Node {} was already started", id),
            GraphError::NotStarted(id) => write!(f, "Node {} was stopped before start", id),
        }
    }
}

impl std::error::Error for GraphError {}

/// One node in the graph
pub struct GraphNode {
    pub node: Box<dyn Node>,
    pub outputs: Vec<Endpoint>,
}

/// The signal graph
#[derive(Default)]
pub struct SignalGraph {
    nodes: BTreeMap<NodeId, GraphNode>,
    next_id: NodeId,
}

impl SignalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------
    // MARK: Construction
    // -------------------------------

    pub fn add_node(&mut self, node: Box<dyn Node>) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            GraphNode {
                node,
                outputs: Vec::new(),
            },
        );
        id
    }

    pub fn add_oscillator(&mut self, waveform: Waveform) -> NodeId {
        self.add_node(Box::new(Oscillator::new(waveform)))
    }

    pub fn add_gain(&mut self) -> NodeId {
        self.add_node(Box::new(Gain::new()))
    }

    pub fn add_filter(&mut self, filter_type: FilterType) -> NodeId {
        self.add_node(Box::new(BiquadFilter::new(filter_type)))
    }

    pub fn add_convolver(&mut self, buffer: ImpulseSlot) -> NodeId {
        self.add_node(Box::new(Convolver::new(buffer)))
    }

    /// Connect a node's output to a node input or a parameter.
    pub fn connect(&mut self, source: NodeId, dest: impl Into<Endpoint>) -> Result<(), GraphError> {
        let dest = dest.into();
        match dest {
            Endpoint::Node(id) if !self.nodes.contains_key(&id) => {
                return Err(GraphError::UnknownNode(id));
            }
            Endpoint::Param(param) if self.param(param).is_none() => {
                return Err(GraphError::UnknownParam(param));
            }
            _ => {}
        }

        let entry = self
            .nodes
            .get_mut(&source)
            .ok_or(GraphError::UnknownNode(source))?;
        if !entry.outputs.contains(&dest) {
            entry.outputs.push(dest);
        }
        Ok(())
    }

    /// Drop every outgoing connection of `node`.
    pub fn disconnect(&mut self, node: NodeId) {
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.outputs.clear();
        }
    }

    /// Free a node and every connection touching it.
    pub fn remove(&mut self, node: NodeId) -> bool {
        if self.nodes.remove(&node).is_none() {
            return false;
        }
        for entry in self.nodes.values_mut() {
            entry.outputs.retain(|dest| dest.node() != node);
        }
        true
    }

    // -------------------------------
    // MARK: Scheduling
    // -------------------------------

    pub fn param(&self, param: ParamRef) -> Option<&ScheduledParam> {
        self.nodes.get(&param.node)?.node.param(param.slot)
    }

    pub fn param_mut(&mut self, param: ParamRef) -> Option<&mut ScheduledParam> {
        self.nodes.get_mut(&param.node)?.node.param_mut(param.slot)
    }

    /// Schedule a source to begin at `time`. A source starts at most once.
    pub fn start(&mut self, node: NodeId, time: f64) -> Result<(), GraphError> {
        let lifetime = self.lifetime_entry(node)?;
        if lifetime.start.is_some() {
            return Err(GraphError::AlreadyStarted(node));
        }
        lifetime.start = Some(time);
        Ok(())
    }

    /// Schedule a started source to cease at `time`. Later calls override.
    pub fn stop(&mut self, node: NodeId, time: f64) -> Result<(), GraphError> {
        let lifetime = self.lifetime_entry(node)?;
        if lifetime.start.is_none() {
            return Err(GraphError::NotStarted(node));
        }
        lifetime.stop = Some(time);
        Ok(())
    }

    /// Advance to `now` and report sources that finished since the last call.
    pub fn advance(&mut self, now: f64) -> Vec<NodeId> {
        let mut ended = Vec::new();
        for (id, entry) in &mut self.nodes {
            if let Some(lifetime) = entry.node.lifetime_mut() {
                if !lifetime.ended && lifetime.stop.is_some_and(|stop| stop <= now) {
                    lifetime.ended = true;
                    ended.push(*id);
                }
            }
        }
        ended
    }

    // -------------------------------
    // MARK: Inspection
    // -------------------------------

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node: NodeId) -> Option<&dyn Node> {
        self.nodes.get(&node).map(|entry| entry.node.as_ref())
    }

    pub fn kind(&self, node: NodeId) -> Option<NodeKind> {
        self.node(node).map(|n| n.kind())
    }

    pub fn lifetime(&self, node: NodeId) -> Option<&SourceLifetime> {
        self.nodes.get(&node)?.node.lifetime()
    }

    pub fn waveform(&self, node: NodeId) -> Option<Waveform> {
        self.node(node)?.waveform()
    }

    pub fn filter_type(&self, node: NodeId) -> Option<FilterType> {
        self.node(node)?.filter_type()
    }

    /// Whether a convolver's impulse response has arrived.
    /// `None` for anything that is not a convolver.
    pub fn effect_ready(&self, node: NodeId) -> Option<bool> {
        self.node(node)?.impulse().map(ImpulseSlot::is_filled)
    }

    /// Scheduled frequency at `time` with any detune applied.
    /// Audio-rate modulation (vibrato) is not included.
    pub fn frequency_at(&self, node: NodeId, time: f64) -> Option<f32> {
        let node = self.node(node)?;
        let frequency = node.param(ParamSlot::Frequency)?.value_at(time);
        let cents = node.param(ParamSlot::Detune).map_or(0.0, |p| p.value_at(time));
        Some(detuned(frequency, cents))
    }

    pub fn outputs(&self, node: NodeId) -> &[Endpoint] {
        self.nodes
            .get(&node)
            .map(|entry| entry.outputs.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes feeding `dest`.
    pub fn inputs(&self, dest: impl Into<Endpoint>) -> Vec<NodeId> {
        let dest = dest.into();
        self.nodes
            .iter()
            .filter(|(_, entry)| entry.outputs.contains(&dest))
            .map(|(id, _)| *id)
            .collect()
    }

    fn lifetime_entry(&mut self, node: NodeId) -> Result<&mut SourceLifetime, GraphError> {
        self.nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?
            .node
            .lifetime_mut()
            .ok_or(GraphError::NotASource(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_remove() {
        let mut graph = SignalGraph::new();
        let osc = graph.add_oscillator(Waveform::Sine);
        let gain = graph.add_gain();
        graph.connect(osc, gain).unwrap();
        assert_eq!(graph.outputs(osc), &[Endpoint::Node(gain)]);
        assert_eq!(graph.inputs(gain), vec![osc]);

        assert!(graph.remove(gain));
        assert!(graph.outputs(osc).is_empty());
        assert!(!graph.remove(gain));
    }

    #[test]
    fn test_connect_to_param() {
        let mut graph = SignalGraph::new();
        let lfo = graph.add_oscillator(Waveform::Sine);
        let osc = graph.add_oscillator(Waveform::Sine);
        let gain = graph.add_gain();

        graph
            .connect(lfo, ParamRef::new(osc, ParamSlot::Frequency))
            .unwrap();
        assert_eq!(
            graph.connect(lfo, ParamRef::new(gain, ParamSlot::Q)),
            Err(GraphError::UnknownParam(ParamRef::new(gain, ParamSlot::Q)))
        );
        assert_eq!(graph.connect(lfo, 99u32), Err(GraphError::UnknownNode(99)));
    }

    #[test]
    fn test_node_lookups() {
        let mut graph = SignalGraph::new();
        let osc = graph.add_oscillator(Waveform::Triangle);
        let filter = graph.add_filter(FilterType::Highpass);
        let slot = ImpulseSlot::new();
        let convolver = graph.add_convolver(slot.clone());

        assert_eq!(graph.waveform(osc), Some(Waveform::Triangle));
        assert_eq!(graph.waveform(filter), None);
        assert_eq!(graph.filter_type(filter), Some(FilterType::Highpass));
        assert_eq!(graph.filter_type(99), None);
        assert_eq!(graph.effect_ready(osc), None);
        assert_eq!(graph.effect_ready(convolver), Some(false));

        graph
            .param_mut(ParamRef::new(osc, ParamSlot::Frequency))
            .unwrap()
            .set_value_at_time(440.0, 0.0);
        graph
            .param_mut(ParamRef::new(osc, ParamSlot::Detune))
            .unwrap()
            .set_value_at_time(-1200.0, 1.0);
        assert_eq!(graph.frequency_at(osc, 0.5), Some(440.0));
        assert!((graph.frequency_at(osc, 1.5).unwrap() - 220.0).abs() < 1e-3);
        assert_eq!(graph.frequency_at(convolver, 0.0), None);
    }

    #[test]
    fn test_source_lifetime() {
        let mut graph = SignalGraph::new();
        let osc = graph.add_oscillator(Waveform::Square);
        let gain = graph.add_gain();

        assert_eq!(graph.stop(osc, 1.0), Err(GraphError::NotStarted(osc)));
        assert_eq!(graph.start(gain, 0.0), Err(GraphError::NotASource(gain)));

        graph.start(osc, 0.0).unwrap();
        assert_eq!(graph.start(osc, 0.5), Err(GraphError::AlreadyStarted(osc)));
        graph.stop(osc, 1.0).unwrap();

        assert!(graph.advance(0.5).is_empty());
        assert_eq!(graph.advance(1.0), vec![osc]);
        // notified once
        assert!(graph.advance(2.0).is_empty());
        assert!(graph.lifetime(osc).unwrap().ended);
    }

    #[test]
    fn test_disconnect_keeps_node() {
        let mut graph = SignalGraph::new();
        let a = graph.add_gain();
        let b = graph.add_gain();
        graph.connect(a, b).unwrap();
        graph.disconnect(a);
        assert!(graph.outputs(a).is_empty());
        assert!(graph.contains(a));
        assert_eq!(graph.len(), 2);
    }
}
