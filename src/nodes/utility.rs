// Gain stage.

use crate::node::{Node, NodeKind, ParamSlot};
use crate::parameter::ScheduledParam;

pub struct Gain {
    gain: ScheduledParam,
}

impl Gain {
    pub fn new() -> Self {
        Self {
            gain: ScheduledParam::new(1.0),
        }
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for Gain {
    fn kind(&self) -> NodeKind {
        NodeKind::Gain
    }

    fn param(&self, slot: ParamSlot) -> Option<&ScheduledParam> {
        match slot {
            ParamSlot::Gain => Some(&self.gain),
            _ => None,
        }
    }

    fn param_mut(&mut self, slot: ParamSlot) -> Option<&mut ScheduledParam> {
        match slot {
            ParamSlot::Gain => Some(&mut self.gain),
            _ => None,
        }
    }
}
