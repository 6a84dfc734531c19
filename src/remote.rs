// src/remote.rs
//
// Duet support: mirror a peer's key events locally and report ours.
//
// Remote presses sound immediately on arrival. Network delay is not
// compensated; instead the peer's press time is kept so the matching release
// lands after the same held duration on the local timeline.

use std::collections::HashMap;
use std::sync::mpsc::Sender;

use log::{debug, warn};

use crate::key::Key;
use crate::message::{Action, WireMessage};
use crate::voice::VoiceError;

/// Outgoing half of the peer connection.
pub trait MessageSink: Send {
    fn send(&mut self, message: &WireMessage);
}

/// Sends encoded messages down a channel, e.g. to a socket writer thread.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: Sender<String>) -> Self {
        Self { tx }
    }
}

impl MessageSink for ChannelSink {
    fn send(&mut self, message: &WireMessage) {
        if self.tx.send(message.encode()).is_err() {
            debug!("Peer channel closed, dropping {}", message);
        }
    }
}

/// Collects messages in memory.
#[derive(Debug, Clone, Default)]
pub struct QueueSink {
    pub messages: Vec<String>,
}

impl MessageSink for QueueSink {
    fn send(&mut self, message: &WireMessage) {
        self.messages.push(message.encode());
    }
}

/// What remote events are applied to.
pub trait KeyTarget {
    /// Local clock.
    fn now(&self) -> f64;

    fn press(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError>;

    fn release(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError>;
}

/// Outcome of one remote event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    pub action: Action,
    pub key: Key,
    /// Local time the event was scheduled for.
    pub time: f64,
    /// Release placed by held duration rather than falling back to now.
    pub reconciled: bool,
    /// The target changed state (press/release was not a no-op).
    pub changed: bool,
}

/// Start-time bookkeeping for keys the peer is holding.
#[derive(Debug, Clone, Default)]
pub struct RemoteSync {
    key_to_start_time: HashMap<Key, f64>,
    peer_key_to_start_time: HashMap<Key, f64>,
}

impl RemoteSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local start time recorded for a remote press.
    pub fn local_start(&self, key: Key) -> Option<f64> {
        self.key_to_start_time.get(&key).copied()
    }

    /// Peer's own start time for a remote press.
    pub fn peer_start(&self, key: Key) -> Option<f64> {
        self.peer_key_to_start_time.get(&key).copied()
    }

    pub fn is_tracking(&self, key: Key) -> bool {
        self.key_to_start_time.contains_key(&key) || self.peer_key_to_start_time.contains_key(&key)
    }

    /// Decode and apply. Undecodable messages are logged and dropped.
    pub fn handle_text(
        &mut self,
        target: &mut impl KeyTarget,
        text: &str,
    ) -> Result<Option<Applied>, VoiceError> {
        match WireMessage::decode(text) {
            Ok(message) => self.handle(target, &message).map(Some),
            Err(e) => {
                warn!("Dropping message {:?}: {}", text, e);
                Ok(None)
            }
        }
    }

    pub fn handle(
        &mut self,
        target: &mut impl KeyTarget,
        message: &WireMessage,
    ) -> Result<Applied, VoiceError> {
        match message.action {
            Action::Press => self.remote_press(target, message.key, message.time),
            Action::Release => self.remote_release(target, message.key, message.time),
        }
    }

    fn remote_press(
        &mut self,
        target: &mut impl KeyTarget,
        key: Key,
        peer_time: f64,
    ) -> Result<Applied, VoiceError> {
        let now = target.now();
        if peer_time.is_finite() {
            self.peer_key_to_start_time.insert(key, peer_time);
            self.key_to_start_time.insert(key, now);
        } else {
            self.forget(key);
        }

        let changed = target.press(key, Some(now))?;
        debug!("Remote press {} at {:.3} (peer {:.3})", key, now, peer_time);
        Ok(Applied {
            action: Action::Press,
            key,
            time: now,
            reconciled: false,
            changed,
        })
    }

    fn remote_release(
        &mut self,
        target: &mut impl KeyTarget,
        key: Key,
        peer_time: f64,
    ) -> Result<Applied, VoiceError> {
        let local_start = self.key_to_start_time.remove(&key);
        let peer_start = self.peer_key_to_start_time.remove(&key);

        match (local_start, peer_start) {
            (Some(local_start), Some(peer_start)) if peer_time.is_finite() => {
                let held = peer_time - peer_start;
                let at = local_start + held;
                let changed = target.release(key, Some(at))?;
                debug!("Remote release {} at {:.3} (held {:.3}s)", key, at, held);
                Ok(Applied {
                    action: Action::Release,
                    key,
                    time: at,
                    reconciled: true,
                    changed,
                })
            }
            _ => {
                let now = target.now();
                let changed = target.release(key, None)?;
                debug!("Remote release {} now, no start record", key);
                Ok(Applied {
                    action: Action::Release,
                    key,
                    time: now,
                    reconciled: false,
                    changed,
                })
            }
        }
    }

    fn forget(&mut self, key: Key) {
        self.key_to_start_time.remove(&key);
        self.peer_key_to_start_time.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        now: f64,
        sounding: BTreeSet<Key>,
        log: Vec<(Action, Key, Option<f64>)>,
    }

    impl KeyTarget for Recorder {
        fn now(&self) -> f64 {
            self.now
        }

        fn press(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError> {
            self.log.push((Action::Press, key, time));
            Ok(self.sounding.insert(key))
        }

        fn release(&mut self, key: Key, time: Option<f64>) -> Result<bool, VoiceError> {
            self.log.push((Action::Release, key, time));
            Ok(self.sounding.remove(&key))
        }
    }

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    #[test]
    fn test_held_duration_is_reproduced() {
        let mut sync = RemoteSync::new();
        let mut target = Recorder {
            now: 5.2,
            ..Default::default()
        };
        let d4 = key("D-4");

        let applied = sync
            .handle_text(&mut target, "press|key=D-4&time=5.0")
            .unwrap()
            .unwrap();
        assert_eq!(applied.time, 5.2);
        assert!(applied.changed);
        assert_eq!(sync.peer_start(d4), Some(5.0));
        assert_eq!(sync.local_start(d4), Some(5.2));

        target.now = 5.9;
        let applied = sync
            .handle_text(&mut target, "release|key=D-4&time=6.5")
            .unwrap()
            .unwrap();
        assert!(applied.reconciled);
        assert!((applied.time - 6.7).abs() < 1e-9);
        assert!(!sync.is_tracking(d4));
        assert_eq!(target.log[1].2.map(|t| (t - 6.7).abs() < 1e-9), Some(true));
    }

    #[test]
    fn test_untracked_release_falls_back_to_now() {
        let mut sync = RemoteSync::new();
        let mut target = Recorder::default();
        let applied = sync
            .handle_text(&mut target, "release|key=G-2&time=3")
            .unwrap()
            .unwrap();
        assert!(!applied.reconciled);
        assert!(!applied.changed);
        assert_eq!(target.log, vec![(Action::Release, key("G-2"), None)]);
    }

    #[test]
    fn test_unparseable_time_falls_back() {
        let mut sync = RemoteSync::new();
        let mut target = Recorder::default();
        sync.handle_text(&mut target, "press|key=A-4&time=1").unwrap();
        let applied = sync
            .handle_text(&mut target, "release|key=A-4&time=later")
            .unwrap()
            .unwrap();
        assert!(!applied.reconciled);
        assert!(!sync.is_tracking(key("A-4")));

        // press without a usable time is not tracked either
        sync.handle_text(&mut target, "press|key=B-4").unwrap();
        assert!(!sync.is_tracking(key("B-4")));
        assert!(target.sounding.contains(&key("B-4")));
    }

    #[test]
    fn test_malformed_message_is_dropped() {
        let mut sync = RemoteSync::new();
        let mut target = Recorder::default();
        assert_eq!(sync.handle_text(&mut target, "press|time=1"), Ok(None));
        assert_eq!(sync.handle_text(&mut target, "garbage"), Ok(None));
        assert!(target.log.is_empty());
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = mpsc::channel();
        let mut sink = ChannelSink::new(tx);
        sink.send(&WireMessage::press(key("C-4"), 1.5));
        assert_eq!(rx.try_recv().unwrap(), "press|key=C-4&time=1.5");

        drop(rx);
        // closed channel is not an error
        sink.send(&WireMessage::release(key("C-4"), 2.0));
    }
}
