// src/nodes/effects.rs
//
// Convolution effect stage. The impulse response arrives asynchronously;
// until then the stage is silent.

use std::sync::{Arc, Mutex};

use crate::node::{Node, NodeKind, ParamSlot};
use crate::parameter::ScheduledParam;

/// Decoded impulse response, one buffer per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl ImpulseResponse {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Shared, fill-once slot for an impulse response.
///
/// Written by a loader thread, read by the convolver. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct ImpulseSlot {
    inner: Arc<Mutex<Option<Arc<ImpulseResponse>>>>,
}

impl ImpulseSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&self, response: ImpulseResponse) {
        // A poisoned slot only means a reader panicked; the data is still usable.
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::new(response));
    }

    pub fn get(&self) -> Option<Arc<ImpulseResponse>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_filled(&self) -> bool {
        self.get().is_some()
    }
}

pub struct Convolver {
    buffer: ImpulseSlot,
}

impl Convolver {
    pub fn new(buffer: ImpulseSlot) -> Self {
        Self { buffer }
    }
}

impl Node for Convolver {
    fn kind(&self) -> NodeKind {
        NodeKind::Convolver
    }

    fn param(&self, _slot: ParamSlot) -> Option<&ScheduledParam> {
        None
    }

    fn param_mut(&mut self, _slot: ParamSlot) -> Option<&mut ScheduledParam> {
        None
    }

    fn impulse(&self) -> Option<&ImpulseSlot> {
        Some(&self.buffer)
    }
}
