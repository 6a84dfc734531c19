// src/nodes/filters.rs
//
// Biquad filter stage. Coefficients and the per-sample recursion belong to
// whatever renders the graph; this node only carries the schedule.

use crate::node::{Node, NodeKind, ParamSlot};
use crate::parameter::ScheduledParam;

/// Filter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

pub struct BiquadFilter {
    filter_type: FilterType,
    frequency: ScheduledParam,
    q: ScheduledParam,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            frequency: ScheduledParam::new(350.0),
            q: ScheduledParam::new(1.0),
        }
    }
}

impl Node for BiquadFilter {
    fn kind(&self) -> NodeKind {
        NodeKind::Filter
    }

    fn param(&self, slot: ParamSlot) -> Option<&ScheduledParam> {
        match slot {
            ParamSlot::Frequency => Some(&self.frequency),
            ParamSlot::Q => Some(&self.q),
            _ => None,
        }
    }

    fn param_mut(&mut self, slot: ParamSlot) -> Option<&mut ScheduledParam> {
        match slot {
            ParamSlot::Frequency => Some(&mut self.frequency),
            ParamSlot::Q => Some(&mut self.q),
            _ => None,
        }
    }

    fn filter_type(&self) -> Option<FilterType> {
        Some(self.filter_type)
    }
}
