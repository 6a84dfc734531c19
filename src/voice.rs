// src/voice.rs
//
// One sounding note: the sub-graph it built, the envelopes driving it, and
// the bookkeeping needed to tear it down once its sources have finished.

use std::collections::BTreeSet;
use std::fmt;

use crate::envelope::{EnvelopeError, EnvelopeGenerator, EnvelopeSpec};
use crate::graph::{Endpoint, GraphError, SignalGraph};
use crate::key::Key;
use crate::node::{NodeId, ParamRef, ParamSlot};
use crate::nodes::{FilterType, Waveform};

/// Error building or releasing a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VoiceError {
    Graph(GraphError),
    Envelope(EnvelopeError),
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::Graph(e) => write!(f, "voice graph error: {}", e),
            VoiceError::Envelope(e) => write!(f, "voice envelope error: {}", e),
        }
    }
}

impl std::error::Error for VoiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VoiceError::Graph(e) => Some(e),
            VoiceError::Envelope(e) => Some(e),
        }
    }
}

impl From<GraphError> for VoiceError {
    fn from(e: GraphError) -> Self {
        VoiceError::Graph(e)
    }
}

impl From<EnvelopeError> for VoiceError {
    fn from(e: EnvelopeError) -> Self {
        VoiceError::Envelope(e)
    }
}

/// A signal source and how long it keeps running after release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSource {
    pub node: NodeId,
    /// Seconds between release and cessation; the release time of the
    /// envelope that shapes this source.
    pub tail: f64,
}

/// Builds one voice's sub-graph.
///
/// Every node created through the builder is owned by the resulting
/// [`Voice`] and freed by [`Voice::dispose`].
pub struct VoiceBuilder<'g> {
    graph: &'g mut SignalGraph,
    key: Key,
    frequency: f32,
    time: f64,
    nodes: Vec<NodeId>,
    sources: Vec<(NodeId, Option<f64>)>,
    envelopes: Vec<EnvelopeGenerator>,
}

impl<'g> VoiceBuilder<'g> {
    pub fn new(graph: &'g mut SignalGraph, key: Key, time: f64) -> Self {
        Self {
            graph,
            key,
            frequency: key.frequency(),
            time,
            nodes: Vec::new(),
            sources: Vec::new(),
            envelopes: Vec::new(),
        }
    }

    #[inline]
    pub fn key(&self) -> Key {
        self.key
    }

    /// Fundamental of the key, before any patch detuning.
    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Note-on time.
    #[inline]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Periodic source at `frequency` Hz, offset by `detune` cents.
    pub fn oscillator(&mut self, waveform: Waveform, frequency: f32, detune: f32) -> NodeId {
        let id = self.graph.add_oscillator(waveform);
        self.set_default(ParamRef::new(id, ParamSlot::Frequency), frequency);
        self.set_default(ParamRef::new(id, ParamSlot::Detune), detune);
        self.nodes.push(id);
        self.sources.push((id, None));
        id
    }

    pub fn gain(&mut self, gain: f32) -> NodeId {
        let id = self.graph.add_gain();
        self.set_default(ParamRef::new(id, ParamSlot::Gain), gain);
        self.nodes.push(id);
        id
    }

    pub fn filter(&mut self, filter_type: FilterType, frequency: f32, q: f32) -> NodeId {
        let id = self.graph.add_filter(filter_type);
        self.set_default(ParamRef::new(id, ParamSlot::Frequency), frequency);
        self.set_default(ParamRef::new(id, ParamSlot::Q), q);
        self.nodes.push(id);
        id
    }

    pub fn connect(&mut self, source: NodeId, dest: impl Into<Endpoint>) -> Result<(), VoiceError> {
        self.graph.connect(source, dest)?;
        Ok(())
    }

    /// Attach an envelope to `target`. It starts with the voice.
    pub fn envelope(&mut self, spec: EnvelopeSpec, target: ParamRef) -> Result<(), VoiceError> {
        if self.graph.param(target).is_none() {
            return Err(GraphError::UnknownParam(target).into());
        }
        let mut envelope = EnvelopeGenerator::new(spec);
        envelope.connect(target);
        self.envelopes.push(envelope);
        Ok(())
    }

    /// Group sources under an envelope: they cease `release` seconds after
    /// the voice is released.
    pub fn layer(&mut self, sources: &[NodeId], release: f64) {
        for (node, tail) in &mut self.sources {
            if sources.contains(node) {
                *tail = Some(release);
            }
        }
    }

    /// Start every source and envelope at the note-on time.
    ///
    /// On failure the partial sub-graph is freed.
    pub fn finish(mut self, output: NodeId) -> Result<Voice, VoiceError> {
        if let Err(e) = self.start_all() {
            self.abandon();
            return Err(e);
        }

        let longest = self
            .envelopes
            .iter()
            .map(EnvelopeGenerator::release)
            .fold(0.0, f64::max);
        let sources: Vec<VoiceSource> = self
            .sources
            .iter()
            .map(|&(node, tail)| VoiceSource {
                node,
                tail: tail.unwrap_or(longest),
            })
            .collect();
        let pending = sources.iter().map(|s| s.node).collect();

        Ok(Voice {
            key: self.key,
            frequency: self.frequency,
            started_at: self.time,
            released_at: None,
            nodes: self.nodes,
            sources,
            pending,
            envelopes: self.envelopes,
            output,
        })
    }

    /// Free every node created so far.
    pub fn abandon(self) {
        for node in self.nodes {
            self.graph.remove(node);
        }
    }

    fn start_all(&mut self) -> Result<(), VoiceError> {
        for &(node, _) in &self.sources {
            self.graph.start(node, self.time)?;
        }
        for envelope in &self.envelopes {
            envelope.start(self.graph, self.time)?;
        }
        Ok(())
    }

    fn set_default(&mut self, param: ParamRef, value: f32) {
        if let Some(p) = self.graph.param_mut(param) {
            p.set_default(value);
        }
    }
}

/// A sounding note.
///
/// Owned by the instrument from press until every source has ended.
#[derive(Debug)]
pub struct Voice {
    key: Key,
    frequency: f32,
    started_at: f64,
    released_at: Option<f64>,
    nodes: Vec<NodeId>,
    sources: Vec<VoiceSource>,
    pending: BTreeSet<NodeId>,
    envelopes: Vec<EnvelopeGenerator>,
    output: NodeId,
}

impl Voice {
    #[inline]
    pub fn key(&self) -> Key {
        self.key
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    #[inline]
    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    #[inline]
    pub fn released_at(&self) -> Option<f64> {
        self.released_at
    }

    /// Node carrying the voice's final signal.
    #[inline]
    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn sources(&self) -> &[VoiceSource] {
        &self.sources
    }

    pub fn envelopes(&self) -> &[EnvelopeGenerator] {
        &self.envelopes
    }

    /// Stop every envelope at `time` and schedule each source to cease once
    /// its envelope has reached the floor.
    ///
    /// Returns the time the last source stops.
    pub fn release(&mut self, graph: &mut SignalGraph, time: f64) -> Result<f64, VoiceError> {
        for envelope in &self.envelopes {
            envelope.stop(graph, time)?;
        }

        let mut end = time;
        for source in &self.sources {
            let stop = time + source.tail;
            graph.stop(source.node, stop)?;
            end = end.max(stop);
        }
        self.released_at = Some(time);
        Ok(end)
    }

    /// Record that `node` stopped. Returns `false` if it isn't ours.
    pub fn on_source_ended(&mut self, node: NodeId) -> bool {
        self.pending.remove(&node)
    }

    /// All sources have ended.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    /// Free the voice's sub-graph. Returns the number of nodes removed.
    pub fn dispose(self, graph: &mut SignalGraph) -> usize {
        self.nodes
            .into_iter()
            .filter(|&node| graph.remove(node))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ENVELOPE_FLOOR;

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    /// osc -> amp(VCA) -> output
    fn simple_voice(graph: &mut SignalGraph, time: f64) -> Voice {
        let mut builder = VoiceBuilder::new(graph, key("A-4"), time);
        let f = builder.frequency();
        let osc = builder.oscillator(Waveform::Sine, f, 0.0);
        let amp = builder.gain(0.0);
        builder.connect(osc, amp).unwrap();
        builder
            .envelope(EnvelopeSpec::default(), ParamRef::new(amp, ParamSlot::Gain))
            .unwrap();
        builder.layer(&[osc], 0.4);
        builder.finish(amp).unwrap()
    }

    #[test]
    fn test_finish_starts_sources_and_envelopes() {
        let mut graph = SignalGraph::new();
        let voice = simple_voice(&mut graph, 1.0);

        assert_eq!(voice.nodes().len(), 2);
        let osc = voice.sources()[0].node;
        assert_eq!(graph.lifetime(osc).unwrap().start, Some(1.0));

        let amp = ParamRef::new(voice.output(), ParamSlot::Gain);
        assert!((graph.param(amp).unwrap().value_at(1.0) - ENVELOPE_FLOOR).abs() < 1e-6);
        assert!((graph.param(amp).unwrap().value_at(1.03) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_release_schedules_source_stop() {
        let mut graph = SignalGraph::new();
        let mut voice = simple_voice(&mut graph, 0.0);
        let end = voice.release(&mut graph, 1.0).unwrap();

        assert!((end - 1.4).abs() < 1e-9);
        assert_eq!(voice.released_at(), Some(1.0));
        let osc = voice.sources()[0].node;
        let stop = graph.lifetime(osc).unwrap().stop.unwrap();
        assert!((stop - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_unlayered_source_uses_longest_release() {
        let mut graph = SignalGraph::new();
        let mut builder = VoiceBuilder::new(&mut graph, key("C-4"), 0.0);
        let osc = builder.oscillator(Waveform::Square, 261.63, 0.0);
        let amp = builder.gain(0.0);
        let lpf = builder.filter(FilterType::Lowpass, 0.0, 1.0);
        builder.connect(osc, lpf).unwrap();
        builder.connect(lpf, amp).unwrap();
        builder
            .envelope(EnvelopeSpec::default(), ParamRef::new(amp, ParamSlot::Gain))
            .unwrap();
        builder
            .envelope(
                EnvelopeSpec::new(0.1, 0.0, 1.0, 0.5, 0.9),
                ParamRef::new(lpf, ParamSlot::Frequency),
            )
            .unwrap();
        let voice = builder.finish(amp).unwrap();
        assert_eq!(voice.sources()[0].tail, 0.9);
    }

    #[test]
    fn test_envelope_on_missing_param() {
        let mut graph = SignalGraph::new();
        let mut builder = VoiceBuilder::new(&mut graph, key("C-4"), 0.0);
        let osc = builder.oscillator(Waveform::Sine, 261.63, 0.0);
        let target = ParamRef::new(osc, ParamSlot::Gain);
        assert_eq!(
            builder.envelope(EnvelopeSpec::default(), target),
            Err(VoiceError::Graph(GraphError::UnknownParam(target)))
        );
        builder.abandon();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_failed_finish_frees_nodes() {
        let mut graph = SignalGraph::new();
        let mut builder = VoiceBuilder::new(&mut graph, key("C-4"), 0.0);
        let osc = builder.oscillator(Waveform::Sine, 261.63, 0.0);
        let amp = builder.gain(0.0);
        builder.connect(osc, amp).unwrap();
        // sustain of zero cannot be reached multiplicatively
        builder
            .envelope(
                EnvelopeSpec::new(0.0, 0.0, 1.0, 0.0, 0.1),
                ParamRef::new(amp, ParamSlot::Gain),
            )
            .unwrap();
        assert!(matches!(builder.finish(amp), Err(VoiceError::Envelope(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_dispose_after_sources_end() {
        let mut graph = SignalGraph::new();
        let other = graph.add_gain();
        let mut voice = simple_voice(&mut graph, 0.0);
        voice.release(&mut graph, 1.0).unwrap();

        assert!(graph.advance(1.2).is_empty());
        for node in graph.advance(1.5) {
            assert!(voice.on_source_ended(node));
        }
        assert!(!voice.on_source_ended(other));
        assert!(voice.is_finished());

        assert_eq!(voice.dispose(&mut graph), 2);
        assert_eq!(graph.len(), 1);
        assert!(graph.contains(other));
    }
}
