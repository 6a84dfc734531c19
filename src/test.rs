// src/test.rs
//
// End-to-end runs through the public surface: instrument, remote peer and
// the controller bridge together.

use std::sync::{Arc, Mutex, mpsc};

use crate::bridge::{KeyEvent, create_bridge};
use crate::clock::ManualClock;
use crate::envelope::EnvelopeSpec;
use crate::instrument::{Callbacks, Instrument, InstrumentConfig};
use crate::key::Key;
use crate::node::ParamRef;
use crate::patch::PatchKind;
use crate::remote::ChannelSink;
use crate::state::{EnvelopeTarget, Knobs};

fn key(s: &str) -> Key {
    s.parse().unwrap()
}

fn instrument(config: InstrumentConfig, start: f64) -> (Instrument<ManualClock>, ManualClock) {
    let clock = ManualClock::new(start);
    (Instrument::new(config, clock.clone()).unwrap(), clock)
}

#[test]
fn test_press_hold_release() {
    let mut knobs = Knobs::default();
    *knobs.envelope_mut(EnvelopeTarget::Vca) = EnvelopeSpec::default();
    let (mut inst, clock) = instrument(
        InstrumentConfig {
            knobs,
            ..Default::default()
        },
        0.0,
    );

    let log = Arc::new(Mutex::new(Vec::new()));
    let (pressed, released) = (Arc::clone(&log), Arc::clone(&log));
    inst.subscribe(
        Box::new(Callbacks {
            on_press: move |k: Key| pressed.lock().unwrap().push(format!("down {}", k)),
            on_release: move |k: Key| released.lock().unwrap().push(format!("up {}", k)),
        }),
        "keyboard",
    );

    let c4 = key("C-4");
    assert!(inst.press(c4, None).unwrap());
    assert_eq!(*log.lock().unwrap(), vec!["down C-4"]);

    let voice = inst.voice(c4).unwrap();
    let vca: ParamRef = voice.envelopes()[0].destination().unwrap();
    let sources: Vec<_> = voice.sources().iter().map(|s| s.node).collect();
    let level = inst.graph().param(vca).unwrap().value_at(0.14);
    assert!((level - 0.3).abs() < 1e-3, "VCA at {}", level);

    clock.set(1.0);
    assert!(inst.release(c4, None).unwrap());
    assert!(!inst.is_sounding(c4));
    assert_eq!(*log.lock().unwrap(), vec!["down C-4", "up C-4"]);
    for node in sources {
        let stop = inst.graph().lifetime(node).unwrap().stop.unwrap();
        assert!((stop - 1.4).abs() < 1e-9);
    }

    // still fading until the sources stop
    clock.set(1.3);
    assert_eq!(inst.poll(), 0);
    clock.set(1.4);
    assert_eq!(inst.poll(), 1);
}

#[test]
fn test_remote_release_keeps_held_duration() {
    let (mut inst, clock) = instrument(InstrumentConfig::default(), 5.2);
    let d4 = key("D-4");

    let applied = inst
        .handle_message("press|key=D-4&time=5.0")
        .unwrap()
        .unwrap();
    assert_eq!(applied.time, 5.2);
    assert!(inst.is_sounding(d4));
    assert_eq!(inst.voice(d4).unwrap().started_at(), 5.2);
    assert_eq!(inst.remote().peer_start(d4), Some(5.0));
    assert_eq!(inst.remote().local_start(d4), Some(5.2));

    clock.set(5.9);
    let applied = inst
        .handle_message("release|key=D-4&time=6.5")
        .unwrap()
        .unwrap();
    assert!(applied.reconciled);
    assert!((applied.time - 6.7).abs() < 1e-9);
    assert!(!inst.is_sounding(d4));
    assert!(!inst.remote().is_tracking(d4));
}

#[test]
fn test_duet_between_instruments() {
    let (mut alice, alice_clock) = instrument(InstrumentConfig::default(), 0.0);
    let (mut bob, bob_clock) = instrument(
        InstrumentConfig {
            patch: PatchKind::Organ,
            ..Default::default()
        },
        40.0,
    );
    let (tx, rx) = mpsc::channel();
    alice.set_outbox(Box::new(ChannelSink::new(tx)));

    let g3 = key("G-3");
    alice.play(g3).unwrap();
    alice_clock.set(2.0);
    alice.stop(g3).unwrap();

    // both messages arrive together, late
    bob_clock.set(41.0);
    for message in rx.try_iter() {
        bob.handle_message(&message).unwrap();
    }

    assert!(!bob.is_sounding(g3));
    assert_eq!(bob.releasing_voices(), 1);
    // held for 2s on Alice's side, so Bob releases at 43
    bob_clock.set(43.0);
    assert_eq!(bob.poll(), 0);
    bob_clock.set(44.0);
    assert_eq!(bob.poll(), 1);
}

#[test]
fn test_bridge_round_trip() {
    let (inst, clock) = instrument(InstrumentConfig::default(), 0.0);
    let (mut controller, mut handle) = create_bridge(inst);

    controller.set_envelope(EnvelopeTarget::Vca, EnvelopeSpec::new(0.0, 0.0, 0.1, 0.5, 0.25));
    controller.remote("press|key=A-4&time=1");
    controller.remote("not a message");
    handle.process_commands();

    assert_eq!(controller.poll_events(), vec![KeyEvent::Pressed(key("A-4"))]);
    assert_eq!(controller.readback().failed_commands, 0);
    assert_eq!(
        handle.instrument().voice(key("A-4")).unwrap().envelopes()[0].release(),
        0.25
    );

    clock.set(3.0);
    controller.remote("release|key=A-4&time=2");
    handle.process_commands();
    assert_eq!(controller.poll_events(), vec![KeyEvent::Released(key("A-4"))]);

    // released at 1.0 local, tail of 0.25 already over
    clock.set(3.5);
    handle.process_commands();
    let readback = controller.readback();
    assert_eq!(readback.active_voices, 0);
    assert_eq!(readback.releasing_voices, 0);
}
