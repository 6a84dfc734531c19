//! WebAssembly bindings via wasm-bindgen for browser integration.
//!
//! This module is only compiled when the `web` feature is enabled.
//!
//! # Usage
//!
//! Build with wasm-pack:
//! ```bash
//! wasm-pack build --target web --features web
//! ```
//!
//! # JavaScript Example
//!
//! ```javascript
//! import init, { keybed_init, KeybedInstrument } from './keybed.js';
//!
//! await init();
//! keybed_init();
//!
//! const ctx = new AudioContext();
//! const synth = new KeybedInstrument("piano");
//!
//! // Keep the instrument clock on the audio timeline
//! synth.set_time(ctx.currentTime);
//! synth.play("C-4");
//!
//! // Forward our key events to the peer, apply theirs
//! for (const msg of synth.take_outgoing()) socket.send(msg);
//! socket.onmessage = (e) => synth.handle_message(e.data);
//! ```

use std::sync::{Arc, Mutex};

use log::warn;
use wasm_bindgen::prelude::*;

use crate::clock::ManualClock;
use crate::instrument::{Instrument, InstrumentConfig};
use crate::key::Key;
use crate::message::WireMessage;
use crate::patch::PatchKind;
use crate::remote::MessageSink;
use crate::state::KnobId;

// ═══════════════════════════════════════════════════════════════════════════
// Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the wasm module. Call this once before using any other functions.
/// Sets up panic hooks and console logging.
#[wasm_bindgen]
pub fn keybed_init() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Debug).ok();
}

/// Outgoing messages waiting for JavaScript to send them.
#[derive(Clone, Default)]
struct Outgoing(Arc<Mutex<Vec<String>>>);

impl MessageSink for Outgoing {
    fn send(&mut self, message: &WireMessage) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push(message.encode());
        }
    }
}

fn parse_key(name: &str) -> Option<Key> {
    match name.parse() {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Ignoring key {:?}: {}", name, e);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Instrument
// ═══════════════════════════════════════════════════════════════════════════

/// Browser-side instrument. Time is supplied by the page, normally from
/// `AudioContext.currentTime`.
#[wasm_bindgen]
pub struct KeybedInstrument {
    inner: Instrument<ManualClock>,
    clock: ManualClock,
    outgoing: Outgoing,
}

#[wasm_bindgen]
impl KeybedInstrument {
    /// Create an instrument with the named patch ("synth", "piano", "organ").
    /// Unknown names fall back to the synth.
    #[wasm_bindgen(constructor)]
    pub fn new(patch: &str) -> Result<KeybedInstrument, JsValue> {
        let patch = patch.parse::<PatchKind>().unwrap_or_else(|e| {
            warn!("{}, using the default patch", e);
            PatchKind::default()
        });
        let config = InstrumentConfig {
            patch,
            ..Default::default()
        };

        let clock = ManualClock::new(0.0);
        let mut inner = Instrument::new(config, clock.clone())
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let outgoing = Outgoing::default();
        inner.set_outbox(Box::new(outgoing.clone()));

        Ok(KeybedInstrument {
            inner,
            clock,
            outgoing,
        })
    }

    /// Advance the instrument clock.
    pub fn set_time(&mut self, seconds: f64) {
        self.clock.set(seconds);
    }

    pub fn now(&self) -> f64 {
        self.inner.now()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Sound a key locally. Returns false if it was already sounding.
    pub fn press(&mut self, key: &str) -> bool {
        let Some(key) = parse_key(key) else {
            return false;
        };
        self.inner.press(key, None).unwrap_or_else(|e| {
            warn!("Press {} failed: {}", key, e);
            false
        })
    }

    pub fn release(&mut self, key: &str) -> bool {
        let Some(key) = parse_key(key) else {
            return false;
        };
        self.inner.release(key, None).unwrap_or_else(|e| {
            warn!("Release {} failed: {}", key, e);
            false
        })
    }

    /// Sound a key and queue a message for the peer.
    pub fn play(&mut self, key: &str) -> bool {
        let Some(key) = parse_key(key) else {
            return false;
        };
        self.inner.play(key).unwrap_or_else(|e| {
            warn!("Play {} failed: {}", key, e);
            false
        })
    }

    pub fn stop(&mut self, key: &str) -> bool {
        let Some(key) = parse_key(key) else {
            return false;
        };
        self.inner.stop(key).unwrap_or_else(|e| {
            warn!("Stop {} failed: {}", key, e);
            false
        })
    }

    /// Apply a message received from the peer.
    pub fn handle_message(&mut self, text: &str) {
        if let Err(e) = self.inner.handle_message(text) {
            warn!("Remote message {:?} failed: {}", text, e);
        }
    }

    /// Drain messages queued by `play`/`stop`.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        match self.outgoing.0.lock() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => Vec::new(),
        }
    }

    /// Free voices whose release has played out. Call periodically.
    pub fn poll(&mut self) -> u32 {
        self.inner.poll() as u32
    }

    /// Sounding keys, lowest first.
    pub fn active_keys(&self) -> Vec<String> {
        self.inner
            .active_keys()
            .into_iter()
            .map(|k| k.to_string())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Knobs
    // ─────────────────────────────────────────────────────────────────────────

    /// Set a knob by name (e.g. "lpf.cutoff", "vca.release").
    /// Returns the stored value, or NaN for an unknown knob.
    pub fn set_knob(&mut self, name: &str, value: f32) -> f32 {
        match name.parse::<KnobId>() {
            Ok(id) => self.inner.set_knob(id, value),
            Err(e) => {
                warn!("{}", e);
                f32::NAN
            }
        }
    }

    pub fn set_oscillator_mix(&mut self, mix: f32) {
        self.inner.set_oscillator_mix(mix);
    }

    pub fn set_output_gain(&mut self, gain: f32) {
        if let Err(e) = self.inner.set_output_gain(gain) {
            warn!("Output gain failed: {}", e);
        }
    }

    pub fn set_effect_mix(&mut self, mix: f32) {
        if let Err(e) = self.inner.set_effect_mix(mix) {
            warn!("Effect mix failed: {}", e);
        }
    }
}
