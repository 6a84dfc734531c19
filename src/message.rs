// src/message.rs
//
// Text codec for key events exchanged with a peer instrument.
//
//     press|key=C-4&time=12.503
//
// `time` is the sender's clock reading when the key was played.

use std::fmt;
use std::str::FromStr;

use crate::key::{Key, KeyParseError};

/// Separates the action from its arguments.
pub const SEPARATOR: char = '|';

/// Separates arguments from each other.
pub const ARG_SEPARATOR: char = '&';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Press,
    Release,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Press => "press",
            Action::Release => "release",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error decoding a wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageError {
    MissingSeparator,
    UnknownAction(String),
    MissingKey,
    InvalidKey(KeyParseError),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::MissingSeparator => {
                write!(f, "message has no '{}' separator", SEPARATOR)
            }
            MessageError::UnknownAction(action) => write!(f, "unknown action '{}'", action),
            MessageError::MissingKey => write!(f, "message has no key argument"),
            MessageError::InvalidKey(e) => write!(f, "invalid key argument: {}", e),
        }
    }
}

impl std::error::Error for MessageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MessageError::InvalidKey(e) => Some(e),
            _ => None,
        }
    }
}

/// One decoded key event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WireMessage {
    pub action: Action,
    pub key: Key,
    /// Sender's clock. NaN when absent or unparseable.
    pub time: f64,
}

impl WireMessage {
    pub fn press(key: Key, time: f64) -> Self {
        Self {
            action: Action::Press,
            key,
            time,
        }
    }

    pub fn release(key: Key, time: f64) -> Self {
        Self {
            action: Action::Release,
            key,
            time,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn decode(text: &str) -> Result<Self, MessageError> {
        let (action, args) = text
            .split_once(SEPARATOR)
            .ok_or(MessageError::MissingSeparator)?;

        let action = match action.trim() {
            "press" => Action::Press,
            "release" => Action::Release,
            other => return Err(MessageError::UnknownAction(other.to_string())),
        };

        let mut key = None;
        let mut time = f64::NAN;
        for (name, value) in query_pairs(args) {
            match name.as_str() {
                // First occurrence wins.
                "key" if key.is_none() => key = Some(value),
                "time" if time.is_nan() => time = value.trim().parse().unwrap_or(f64::NAN),
                _ => {}
            }
        }

        let key = key
            .ok_or(MessageError::MissingKey)?
            .parse()
            .map_err(MessageError::InvalidKey)?;
        Ok(Self { action, key, time })
    }
}

impl fmt::Display for WireMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}key={}{}time={}",
            self.action, SEPARATOR, self.key, ARG_SEPARATOR, self.time
        )
    }
}

impl FromStr for WireMessage {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// Split `a=1&b=2` into decoded pairs. A pair without `=` has an empty value.
fn query_pairs(args: &str) -> impl Iterator<Item = (String, String)> + '_ {
    args.split(ARG_SEPARATOR)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(name), percent_decode(value))
        })
}

/// Form-urlencoded decoding: `+` is a space, `%XX` a byte. Malformed escapes
/// pass through verbatim.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => match (bytes.get(i + 1).and_then(hex), bytes.get(i + 2).and_then(hex)) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: &u8) -> Option<u8> {
    (*b as char).to_digit(16).map(|d| d as u8)
}
