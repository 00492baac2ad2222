use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the twelve pitch classes on the keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NoteId {
    C,
    Cs,
    D,
    Ds,
    E,
    F,
    Fs,
    G,
    Gs,
    A,
    As,
    B,
}

impl NoteId {
    pub const COUNT: usize = 12;

    pub const ALL: [NoteId; NoteId::COUNT] = [
        NoteId::C,
        NoteId::Cs,
        NoteId::D,
        NoteId::Ds,
        NoteId::E,
        NoteId::F,
        NoteId::Fs,
        NoteId::G,
        NoteId::Gs,
        NoteId::A,
        NoteId::As,
        NoteId::B,
    ];

    /// Slot index in fixed per-note tables (0 = C .. 11 = B).
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<NoteId> {
        Self::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            NoteId::C => "C",
            NoteId::Cs => "C#",
            NoteId::D => "D",
            NoteId::Ds => "D#",
            NoteId::E => "E",
            NoteId::F => "F",
            NoteId::Fs => "F#",
            NoteId::G => "G",
            NoteId::Gs => "G#",
            NoteId::A => "A",
            NoteId::As => "A#",
            NoteId::B => "B",
        }
    }

    /// Default sample asset stem for this note (`C#` -> `"csharp"`).
    pub fn asset_name(self) -> &'static str {
        match self {
            NoteId::C => "c",
            NoteId::Cs => "csharp",
            NoteId::D => "d",
            NoteId::Ds => "dsharp",
            NoteId::E => "e",
            NoteId::F => "f",
            NoteId::Fs => "fsharp",
            NoteId::G => "g",
            NoteId::Gs => "gsharp",
            NoteId::A => "a",
            NoteId::As => "asharp",
            NoteId::B => "b",
        }
    }

    pub fn is_sharp(self) -> bool {
        matches!(
            self,
            NoteId::Cs | NoteId::Ds | NoteId::Fs | NoteId::Gs | NoteId::As
        )
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a string does not name a pitch class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNoteError(pub String);

impl fmt::Display for ParseNoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown note name {:?}", self.0)
    }
}

impl std::error::Error for ParseNoteError {}

impl FromStr for NoteId {
    type Err = ParseNoteError;

    /// Accepts `"C#"`, `"Cs"` and asset-style `"csharp"`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let lower = trimmed.to_ascii_lowercase();
        let note = match lower.as_str() {
            "c" => NoteId::C,
            "c#" | "cs" | "csharp" => NoteId::Cs,
            "d" => NoteId::D,
            "d#" | "ds" | "dsharp" => NoteId::Ds,
            "e" => NoteId::E,
            "f" => NoteId::F,
            "f#" | "fs" | "fsharp" => NoteId::Fs,
            "g" => NoteId::G,
            "g#" | "gs" | "gsharp" => NoteId::Gs,
            "a" => NoteId::A,
            "a#" | "as" | "asharp" => NoteId::As,
            "b" => NoteId::B,
            _ => return Err(ParseNoteError(trimmed.to_string())),
        };
        Ok(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_table_position() {
        for (i, note) in NoteId::ALL.iter().enumerate() {
            assert_eq!(note.index(), i);
            assert_eq!(NoteId::from_index(i), Some(*note));
        }
        assert_eq!(NoteId::from_index(12), None);
    }

    #[test]
    fn parses_all_spellings() {
        assert_eq!("C#".parse::<NoteId>(), Ok(NoteId::Cs));
        assert_eq!("cs".parse::<NoteId>(), Ok(NoteId::Cs));
        assert_eq!("csharp".parse::<NoteId>(), Ok(NoteId::Cs));
        assert_eq!(" a# ".parse::<NoteId>(), Ok(NoteId::As));
        assert_eq!("B".parse::<NoteId>(), Ok(NoteId::B));
        assert!("H".parse::<NoteId>().is_err());
        assert!("".parse::<NoteId>().is_err());
    }

    #[test]
    fn name_and_asset_parse_back() {
        for note in NoteId::ALL {
            assert_eq!(note.name().parse::<NoteId>(), Ok(note));
            assert_eq!(note.asset_name().parse::<NoteId>(), Ok(note));
        }
    }

    #[test]
    fn five_sharps_per_octave() {
        assert_eq!(NoteId::ALL.iter().filter(|n| n.is_sharp()).count(), 5);
        assert_eq!(NoteId::Fs.to_string(), "F#");
    }
}
