// src/state/mod.rs
//
// Controller-side state.
//
// Knob values a UI edits freely, their metadata, and the commands that
// carry edits to the instrument. Nothing here touches the signal graph.

mod command;
mod knobs;
mod param_info;

pub use command::*;
pub use knobs::*;
pub use param_info::*;
