// src/main.rs
//
// Sanity run: two instruments playing a duet over an in-process channel,
// one of them driven through the controller bridge.

use std::sync::mpsc;

use keybed::{
    ChannelSink, Command, EnvelopeTarget, Instrument, InstrumentConfig, Key, KeyEvent, KnobId,
    ManualClock, PatchKind, create_bridge,
};
use log::{error, info};

/// ===============================
/// Helpers
/// ===============================

fn key(name: &str) -> Option<Key> {
    match name.parse() {
        Ok(key) => Some(key),
        Err(e) => {
            error!("Bad key {:?}: {}", name, e);
            None
        }
    }
}

/// ===============================
/// Main
/// ===============================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    // --------------------------------
    // Local instrument, behind the bridge
    // --------------------------------

    let clock = ManualClock::new(0.0);
    let mut local = match Instrument::new(InstrumentConfig::default(), clock.clone()) {
        Ok(instrument) => instrument,
        Err(e) => {
            error!("Failed to create local instrument: {}", e);
            return;
        }
    };
    let (to_peer, from_local) = mpsc::channel();
    local.set_outbox(Box::new(ChannelSink::new(to_peer)));
    let (mut controller, mut handle) = create_bridge(local);

    // --------------------------------
    // Peer instrument, on its own clock
    // --------------------------------

    let peer_clock = ManualClock::new(100.0);
    let config = InstrumentConfig {
        patch: PatchKind::Piano,
        ..Default::default()
    };
    let mut peer = match Instrument::new(config, peer_clock.clone()) {
        Ok(instrument) => instrument,
        Err(e) => {
            error!("Failed to create peer instrument: {}", e);
            return;
        }
    };

    // --------------------------------
    // Shape the local synth
    // --------------------------------

    controller.set_knob(KnobId::Cutoff, 2_400.0);
    controller.set_knob(KnobId::Keytrack, 0.5);
    let mut vca = controller.knobs().vca_eg;
    vca.sustain = 0.6;
    controller.set_envelope(EnvelopeTarget::Vca, vca);
    controller.send(Command::SetEffectMix { mix: 0.2 });

    // --------------------------------
    // Play a phrase
    // --------------------------------

    info!("Starting duet sanity test");

    let phrase = [("C-4", 0.0, 0.4), ("E-4", 0.5, 0.9), ("G-4", 1.0, 2.0)];
    let mut steps: Vec<(f64, bool, &str)> = phrase
        .iter()
        .flat_map(|&(name, on, off)| [(on, true, name), (off, false, name)])
        .collect();
    steps.sort_by(|a, b| a.0.total_cmp(&b.0));

    for (at, down, name) in steps {
        let Some(key) = key(name) else { continue };

        clock.set(at);
        if down {
            controller.play(key);
        } else {
            controller.stop(key);
        }
        handle.process_commands();

        // Peer receives after some network delay.
        peer_clock.set(100.0 + at + 0.08);
        for message in from_local.try_iter() {
            match peer.handle_message(&message) {
                Ok(Some(applied)) => info!(
                    "Peer applied {} {} at {:.3}{}",
                    applied.action,
                    applied.key,
                    applied.time,
                    if applied.reconciled { " (held duration kept)" } else { "" }
                ),
                Ok(None) => {}
                Err(e) => error!("Peer failed on {:?}: {}", message, e),
            }
        }
        peer.poll();

        for event in controller.poll_events() {
            match event {
                KeyEvent::Pressed(key) => info!("Local key down {}", key),
                KeyEvent::Released(key) => info!("Local key up {}", key),
            }
        }
    }

    // --------------------------------
    // Let every tail finish
    // --------------------------------

    clock.set(10.0);
    peer_clock.set(115.0);
    handle.process_commands();
    let disposed = peer.poll();

    let readback = controller.readback();
    info!(
        "Local: {} active, {} releasing, {} failed commands",
        readback.active_voices, readback.releasing_voices, readback.failed_commands
    );
    info!(
        "Peer: {} active, {} releasing, {} disposed at the end",
        peer.active_voices(),
        peer.releasing_voices(),
        disposed
    );
    info!("Sanity test completed.");
}
