// src/key.rs
//
// Musical keys and the equal-temperament pitch table.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const A4_PITCH: f32 = 440.0;
pub const A4_POSITION: i32 = 49;

pub const LOWEST_OCTAVE: u8 = 0;
pub const HIGHEST_OCTAVE: u8 = 8;

/// Note letter, anchored so that `A` sits at offset zero within its octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Letter {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Letter {
    pub const ALL: [Letter; 7] = [
        Letter::A,
        Letter::B,
        Letter::C,
        Letter::D,
        Letter::E,
        Letter::F,
        Letter::G,
    ];

    /// Semitone distance from `A` in the same octave number.
    #[inline]
    pub fn offset(self) -> i32 {
        match self {
            Letter::A => 0,
            Letter::B => 2,
            Letter::C => -9,
            Letter::D => -7,
            Letter::E => -5,
            Letter::F => -4,
            Letter::G => -2,
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'A' => Some(Letter::A),
            'B' => Some(Letter::B),
            'C' => Some(Letter::C),
            'D' => Some(Letter::D),
            'E' => Some(Letter::E),
            'F' => Some(Letter::F),
            'G' => Some(Letter::G),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Letter::A => 'A',
            Letter::B => 'B',
            Letter::C => 'C',
            Letter::D => 'D',
            Letter::E => 'E',
            Letter::F => 'F',
            Letter::G => 'G',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Accidental {
    Sharp,
    Flat,
    Natural,
}

impl Accidental {
    pub const ALL: [Accidental; 3] = [Accidental::Sharp, Accidental::Flat, Accidental::Natural];

    #[inline]
    pub fn offset(self) -> i32 {
        match self {
            Accidental::Sharp => 1,
            Accidental::Flat => -1,
            Accidental::Natural => 0,
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            '#' => Some(Accidental::Sharp),
            'b' => Some(Accidental::Flat),
            '-' => Some(Accidental::Natural),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Accidental::Sharp => '#',
            Accidental::Flat => 'b',
            Accidental::Natural => '-',
        }
    }
}

/// A playable key, written `<letter><accidental><octave>` (`C-4`, `F#3`, `Bb5`).
///
/// Enharmonic spellings (`C#4` / `Db4`) are distinct keys that share a pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct Key {
    letter: Letter,
    accidental: Accidental,
    octave: u8,
}

impl Key {
    /// Returns `None` when the octave is outside the keyboard range.
    pub fn new(letter: Letter, accidental: Accidental, octave: u8) -> Option<Self> {
        if octave > HIGHEST_OCTAVE {
            return None;
        }
        Some(Self {
            letter,
            accidental,
            octave,
        })
    }

    #[inline]
    pub fn letter(&self) -> Letter {
        self.letter
    }

    #[inline]
    pub fn accidental(&self) -> Accidental {
        self.accidental
    }

    #[inline]
    pub fn octave(&self) -> u8 {
        self.octave
    }

    /// Scale position, with A4 at 49.
    #[inline]
    pub fn position(&self) -> i32 {
        12 * self.octave as i32 + 1 + self.letter.offset() + self.accidental.offset()
    }

    /// Fundamental frequency in Hz.
    #[inline]
    pub fn frequency(&self) -> f32 {
        frequency_of(*self)
    }

    pub fn is_black(&self) -> bool {
        self.accidental != Accidental::Natural
    }

    /// The same spelling `octaves` octaves away, if it stays on the keyboard.
    pub fn transpose_octaves(&self, octaves: i8) -> Option<Key> {
        let octave = self.octave as i16 + octaves as i16;
        if !(LOWEST_OCTAVE as i16..=HIGHEST_OCTAVE as i16).contains(&octave) {
            return None;
        }
        Key::new(self.letter, self.accidental, octave as u8)
    }

    /// Every spelling on the keyboard, octave by octave.
    pub fn all() -> impl Iterator<Item = Key> {
        (LOWEST_OCTAVE..=HIGHEST_OCTAVE).flat_map(|octave| {
            Letter::ALL.into_iter().flat_map(move |letter| {
                Accidental::ALL.into_iter().map(move |accidental| Key {
                    letter,
                    accidental,
                    octave,
                })
            })
        })
    }
}

/// Equal-temperament pitch table.
pub fn frequency_of(key: Key) -> f32 {
    A4_PITCH * 2.0_f32.powf((key.position() - A4_POSITION) as f32 / 12.0)
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.position()
            .cmp(&other.position())
            .then(self.letter.cmp(&other.letter))
            .then(self.accidental.cmp(&other.accidental))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.letter.as_char(),
            self.accidental.as_char(),
            self.octave
        )
    }
}

/// Error parsing a key literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// Key literals are exactly three characters.
    Length(usize),
    Letter(char),
    Accidental(char),
    Octave(char),
}

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyParseError::Length(len) => write!(f, "key must be 3 characters, got {}", len),
            KeyParseError::Letter(c) => write!(f, "invalid note letter '{}'", c),
            KeyParseError::Accidental(c) => write!(f, "invalid accidental '{}'", c),
            KeyParseError::Octave(c) => write!(f, "invalid octave '{}'", c),
        }
    }
}

impl std::error::Error for KeyParseError {}

impl FromStr for Key {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        let [letter, accidental, octave] = chars[..] else {
            return Err(KeyParseError::Length(chars.len()));
        };

        let letter = Letter::from_char(letter).ok_or(KeyParseError::Letter(letter))?;
        let accidental =
            Accidental::from_char(accidental).ok_or(KeyParseError::Accidental(accidental))?;
        let octave_digit = octave
            .to_digit(10)
            .filter(|d| *d <= HIGHEST_OCTAVE as u32)
            .ok_or(KeyParseError::Octave(octave))?;

        Ok(Key {
            letter,
            accidental,
            octave: octave_digit as u8,
        })
    }
}

impl TryFrom<String> for Key {
    type Error = KeyParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Key> for String {
    fn from(key: Key) -> Self {
        key.to_string()
    }
}
