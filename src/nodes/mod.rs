// src/nodes/mod.rs
//
// Node kinds a voice or the shared bus can be built from.

mod effects;
mod filters;
mod oscillators;
mod utility;

pub use effects::*;
pub use filters::*;
pub use oscillators::*;
pub use utility::*;
