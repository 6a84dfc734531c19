// src/envelope.rs
//
// Attack/hold/decay/sustain/release envelope scheduled onto one parameter.

use std::fmt;

use crate::graph::SignalGraph;
use crate::node::ParamRef;
use crate::parameter::{ParamError, RampLaw, ScheduledParam};

/// Stand-in for zero. Multiplicative ramps cannot reach zero in finite time.
pub const ENVELOPE_FLOOR: f32 = 0.001;

/// Ramp law per envelope segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SegmentLaws {
    pub attack: RampLaw,
    /// Plateau at peak. Either law yields a flat line; the choice only
    /// matters to hosts that mirror the ramp type.
    pub hold: RampLaw,
    pub decay: RampLaw,
    pub release: RampLaw,
}

impl SegmentLaws {
    pub const MULTIPLICATIVE: SegmentLaws = SegmentLaws {
        attack: RampLaw::Multiplicative,
        hold: RampLaw::Multiplicative,
        decay: RampLaw::Multiplicative,
        release: RampLaw::Multiplicative,
    };

    /// Linear plateau, multiplicative everywhere else.
    pub const LINEAR_HOLD: SegmentLaws = SegmentLaws {
        hold: RampLaw::Linear,
        ..SegmentLaws::MULTIPLICATIVE
    };
}

/// Shape of an envelope. Durations in seconds.
///
/// `sustain` is a fraction of `amount` and must stay above zero.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EnvelopeSpec {
    pub attack: f64,
    pub hold: f64,
    pub decay: f64,
    pub sustain: f32,
    pub release: f64,
    /// Peak level.
    pub amount: f32,
    pub laws: SegmentLaws,
}

impl EnvelopeSpec {
    pub fn new(attack: f64, hold: f64, decay: f64, sustain: f32, release: f64) -> Self {
        Self {
            attack,
            hold,
            decay,
            sustain,
            release,
            ..Self::default()
        }
    }

    pub fn with_amount(mut self, amount: f32) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_laws(mut self, laws: SegmentLaws) -> Self {
        self.laws = laws;
        self
    }

    /// Time from start until the sustain level is reached.
    #[inline]
    pub fn time_to_sustain(&self) -> f64 {
        self.attack + self.hold + self.decay
    }
}

impl Default for EnvelopeSpec {
    fn default() -> Self {
        Self {
            attack: 0.03,
            hold: 0.01,
            decay: 0.1,
            sustain: 0.3,
            release: 0.4,
            amount: 1.0,
            laws: SegmentLaws::MULTIPLICATIVE,
        }
    }
}

/// Error driving an envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeError {
    /// `start`/`stop` without a live destination.
    NotConnected,
    Param(ParamError),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::NotConnected => write!(f, "envelope is not connected to a parameter"),
            EnvelopeError::Param(e) => write!(f, "envelope scheduling failed: {}", e),
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl From<ParamError> for EnvelopeError {
    fn from(e: ParamError) -> Self {
        EnvelopeError::Param(e)
    }
}

/// Drives one scheduled parameter through an [`EnvelopeSpec`].
///
/// Single use: one `start` and one `stop` per note.
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    spec: EnvelopeSpec,
    destination: Option<ParamRef>,
}

impl EnvelopeGenerator {
    pub fn new(spec: EnvelopeSpec) -> Self {
        Self {
            spec,
            destination: None,
        }
    }

    #[inline]
    pub fn spec(&self) -> &EnvelopeSpec {
        &self.spec
    }

    /// Seconds from `stop` until the curve reaches the floor.
    #[inline]
    pub fn release(&self) -> f64 {
        self.spec.release
    }

    #[inline]
    pub fn destination(&self) -> Option<ParamRef> {
        self.destination
    }

    /// Bind the parameter this envelope drives. Must precede `start`.
    pub fn connect(&mut self, destination: ParamRef) {
        self.destination = Some(destination);
    }

    /// Schedule attack, hold and decay from `time`.
    pub fn start(&self, graph: &mut SignalGraph, time: f64) -> Result<(), EnvelopeError> {
        let param = self.destination_mut(graph)?;
        schedule_start(&self.spec, param, time)
    }

    /// Schedule the release from whatever value the curve has at `time`.
    pub fn stop(&self, graph: &mut SignalGraph, time: f64) -> Result<(), EnvelopeError> {
        let param = self.destination_mut(graph)?;
        schedule_stop(&self.spec, param, time)
    }

    fn destination_mut<'g>(
        &self,
        graph: &'g mut SignalGraph,
    ) -> Result<&'g mut ScheduledParam, EnvelopeError> {
        let destination = self.destination.ok_or(EnvelopeError::NotConnected)?;
        graph
            .param_mut(destination)
            .ok_or(EnvelopeError::NotConnected)
    }
}

/// Breakpoints at `t0`, `t0+a`, `t0+a+h`, `t0+a+h+d`.
pub fn schedule_start(
    spec: &EnvelopeSpec,
    param: &mut ScheduledParam,
    t0: f64,
) -> Result<(), EnvelopeError> {
    let peak = spec.amount;
    let attack_end = t0 + spec.attack;
    let hold_end = attack_end + spec.hold;
    let decay_end = hold_end + spec.decay;

    // Reject before touching the timeline so a bad spec leaves the old curve.
    check_targets(spec)?;

    param.cancel_scheduled_values(t0);
    param.set_value_at_time(ENVELOPE_FLOOR, t0);
    param.ramp_to_value_at_time(spec.laws.attack, peak, attack_end)?;
    param.ramp_to_value_at_time(spec.laws.hold, peak, hold_end)?;
    param.ramp_to_value_at_time(spec.laws.decay, spec.sustain * peak, decay_end)?;
    Ok(())
}

fn check_targets(spec: &EnvelopeSpec) -> Result<(), ParamError> {
    let peak = spec.amount;
    let segments = [
        (spec.laws.attack, peak),
        (spec.laws.hold, peak),
        (spec.laws.decay, spec.sustain * peak),
    ];
    for (law, target) in segments {
        if law == RampLaw::Multiplicative && (target <= 0.0 || target.is_nan()) {
            return Err(ParamError::NonPositiveTarget { value: target });
        }
    }
    Ok(())
}

/// Anchor at the current value of `t1`, then fall to the floor over `release`.
pub fn schedule_stop(
    spec: &EnvelopeSpec,
    param: &mut ScheduledParam,
    t1: f64,
) -> Result<(), EnvelopeError> {
    param.cancel_and_hold_at_time(t1);
    if spec.laws.release == RampLaw::Multiplicative && param.value_at(t1) <= 0.0 {
        param.set_value_at_time(ENVELOPE_FLOOR, t1);
    }
    param.ramp_to_value_at_time(spec.laws.release, ENVELOPE_FLOOR, t1 + spec.release)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ParamRef, ParamSlot};
    use crate::parameter::AutomationKind;

    fn connected(spec: EnvelopeSpec) -> (SignalGraph, EnvelopeGenerator, ParamRef) {
        let mut graph = SignalGraph::new();
        let gain = graph.add_gain();
        let param = ParamRef::new(gain, ParamSlot::Gain);
        let mut env = EnvelopeGenerator::new(spec);
        env.connect(param);
        (graph, env, param)
    }

    #[test]
    fn test_start_requires_connect() {
        let mut graph = SignalGraph::new();
        let env = EnvelopeGenerator::new(EnvelopeSpec::default());
        assert_eq!(env.start(&mut graph, 0.0), Err(EnvelopeError::NotConnected));
        assert_eq!(env.stop(&mut graph, 0.0), Err(EnvelopeError::NotConnected));
    }

    #[test]
    fn test_dangling_destination_is_not_connected() {
        let (mut graph, env, param) = connected(EnvelopeSpec::default());
        graph.remove(param.node);
        assert_eq!(env.start(&mut graph, 0.0), Err(EnvelopeError::NotConnected));
    }

    #[test]
    fn test_start_breakpoints() {
        let spec = EnvelopeSpec::new(0.03, 0.01, 0.1, 0.3, 0.4);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 2.0).unwrap();

        let times: Vec<f64> = graph.param(param).unwrap().events().iter().map(|e| e.time).collect();
        let expected = [2.0, 2.03, 2.04, 2.14];
        assert_eq!(times.len(), expected.len());
        for (got, want) in times.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{} != {}", got, want);
        }
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_levels() {
        let spec = EnvelopeSpec::default().with_amount(2.0);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 0.0).unwrap();

        let p = graph.param(param).unwrap();
        assert!((p.value_at(0.0) - ENVELOPE_FLOOR).abs() < 1e-6);
        assert!((p.value_at(0.03) - 2.0).abs() < 1e-4);
        assert!((p.value_at(0.035) - 2.0).abs() < 1e-4, "hold plateau");
        assert!((p.value_at(0.14) - 0.6).abs() < 1e-4);
        assert!((p.value_at(5.0) - 0.6).abs() < 1e-4, "sustain");
    }

    #[test]
    fn test_restart_cancels_previous_curve() {
        let (mut graph, env, param) = connected(EnvelopeSpec::default());
        env.start(&mut graph, 0.0).unwrap();
        env.start(&mut graph, 0.02).unwrap();
        let events = graph.param(param).unwrap().events();
        // the first attack (time 0.03) was cancelled; only the t=0 pin survives
        assert_eq!(events.len(), 5);
        assert_eq!(events[1].time, 0.02);
    }

    #[test]
    fn test_release_anchors_inside_decay() {
        let (mut graph, env, param) = connected(EnvelopeSpec::default());
        env.start(&mut graph, 0.0).unwrap();

        let t1 = 0.09; // inside decay (0.04..0.14)
        let before_stop = graph.param(param).unwrap().value_at(t1);
        let just_before = graph.param(param).unwrap().value_at(t1 - 1e-3);
        env.stop(&mut graph, t1).unwrap();

        let p = graph.param(param).unwrap();
        assert!((p.value_at(t1) - before_stop).abs() < 1e-5, "jump at release");
        assert!((p.value_at(t1 - 1e-3) - just_before).abs() < 1e-5, "curve before release changed");
        assert!(before_stop > 0.3 + 1e-3, "should still be above sustain");
        assert!((p.value_at(t1 + 0.4) - ENVELOPE_FLOOR).abs() < 1e-6);
        assert!(p.value_at(t1 + 0.2) < before_stop);
    }

    #[test]
    fn test_release_from_sustain() {
        let (mut graph, env, param) = connected(EnvelopeSpec::default());
        env.start(&mut graph, 0.0).unwrap();
        env.stop(&mut graph, 1.0).unwrap();

        let p = graph.param(param).unwrap();
        let last = p.events().last().unwrap();
        assert_eq!(last.kind, AutomationKind::Ramp(RampLaw::Multiplicative));
        assert!((last.time - 1.4).abs() < 1e-9);
        assert!((p.value_at(1.0) - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_linear_hold_law() {
        let spec = EnvelopeSpec::new(0.03, 0.05, 0.3, 0.05, 0.4).with_laws(SegmentLaws::LINEAR_HOLD);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 0.0).unwrap();
        let kinds: Vec<_> = graph.param(param).unwrap().events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AutomationKind::SetValue,
                AutomationKind::Ramp(RampLaw::Multiplicative),
                AutomationKind::Ramp(RampLaw::Linear),
                AutomationKind::Ramp(RampLaw::Multiplicative),
            ]
        );
    }

    #[test]
    fn test_zero_sustain_is_rejected_for_multiplicative_decay() {
        let spec = EnvelopeSpec::new(0.0, 0.0, 1.0, 0.0, 0.5);
        let (mut graph, env, _) = connected(spec);
        assert_eq!(
            env.start(&mut graph, 0.0),
            Err(EnvelopeError::Param(ParamError::NonPositiveTarget { value: 0.0 }))
        );
    }

    #[test]
    fn test_rejected_spec_leaves_curve_untouched() {
        let (mut graph, env, param) = connected(EnvelopeSpec::default());
        env.start(&mut graph, 0.0).unwrap();
        let before = graph.param(param).unwrap().events().to_vec();

        let zero_sustain = EnvelopeSpec::new(0.1, 0.0, 0.1, 0.0, 0.3);
        let result = schedule_start(&zero_sustain, graph.param_mut(param).unwrap(), 0.05);
        assert_eq!(
            result,
            Err(EnvelopeError::Param(ParamError::NonPositiveTarget { value: 0.0 }))
        );
        assert_eq!(graph.param(param).unwrap().events(), &before[..]);

        let silent = EnvelopeSpec::default().with_amount(0.0);
        assert!(schedule_start(&silent, graph.param_mut(param).unwrap(), 0.05).is_err());
        assert_eq!(graph.param(param).unwrap().events(), &before[..]);
    }

    #[test]
    fn test_linear_laws_accept_zero_targets() {
        let laws = SegmentLaws {
            attack: RampLaw::Linear,
            hold: RampLaw::Linear,
            decay: RampLaw::Linear,
            release: RampLaw::Linear,
        };
        let spec = EnvelopeSpec::new(0.1, 0.0, 0.2, 0.0, 0.4).with_laws(laws);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 0.0).unwrap();
        let p = graph.param(param).unwrap();
        assert!((p.value_at(0.2) - 0.5).abs() < 1e-4);
        assert!(p.value_at(1.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_decay_midpoint() {
        let laws = SegmentLaws {
            decay: RampLaw::Linear,
            ..SegmentLaws::MULTIPLICATIVE
        };
        let spec = EnvelopeSpec::new(0.1, 0.0, 0.2, 0.5, 0.4).with_laws(laws);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 0.0).unwrap();

        let p = graph.param(param).unwrap();
        assert!((p.value_at(0.1) - 1.0).abs() < 1e-4);
        // straight line from 1.0 at 0.1 to 0.5 at 0.3
        assert!((p.value_at(0.2) - 0.75).abs() < 1e-4);
        assert!((p.value_at(0.3) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_linear_release_midpoint() {
        let laws = SegmentLaws {
            release: RampLaw::Linear,
            ..SegmentLaws::MULTIPLICATIVE
        };
        let spec = EnvelopeSpec::new(0.1, 0.0, 0.2, 0.5, 0.4).with_laws(laws);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 0.0).unwrap();
        env.stop(&mut graph, 1.0).unwrap();

        let p = graph.param(param).unwrap();
        let last = p.events().last().unwrap();
        assert_eq!(last.kind, AutomationKind::Ramp(RampLaw::Linear));
        assert!((p.value_at(1.0) - 0.5).abs() < 1e-4);
        assert!((p.value_at(1.2) - (0.5 + ENVELOPE_FLOOR) / 2.0).abs() < 1e-4);
        assert!((p.value_at(1.4) - ENVELOPE_FLOOR).abs() < 1e-6);
    }

    #[test]
    fn test_linear_release_anchored_mid_attack() {
        let laws = SegmentLaws {
            release: RampLaw::Linear,
            ..SegmentLaws::MULTIPLICATIVE
        };
        let spec = EnvelopeSpec::new(0.1, 0.0, 0.2, 0.5, 0.4).with_laws(laws);
        let (mut graph, env, param) = connected(spec);
        env.start(&mut graph, 0.0).unwrap();

        let early = graph.param(param).unwrap().value_at(0.025);
        let anchor = graph.param(param).unwrap().value_at(0.05);
        // halfway up a 0.001 -> 1.0 multiplicative attack
        assert!((anchor - 0.001_f32 * 1000_f32.sqrt()).abs() < 1e-4);
        env.stop(&mut graph, 0.05).unwrap();

        let p = graph.param(param).unwrap();
        assert!((p.value_at(0.025) - early).abs() < 1e-6, "curve before release changed");
        assert!((p.value_at(0.05) - anchor).abs() < 1e-6, "jump at release");
        assert!((p.value_at(0.25) - (anchor + ENVELOPE_FLOOR) / 2.0).abs() < 1e-4);
        assert!((p.value_at(0.45) - ENVELOPE_FLOOR).abs() < 1e-6);
        assert!(p.value_at(0.1) < anchor, "attack peak was cancelled");
    }
}
