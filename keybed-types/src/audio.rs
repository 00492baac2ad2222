//! Audio-related status and event types shared across crates.

use serde::{Deserialize, Serialize};

use crate::NoteId;

/// Processing state of the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineStatus {
    #[default]
    Stopped,
    Running,
}

/// Why a voice left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// The sample played to its end.
    Completed,
    /// `note_off` or `stop_all` removed it.
    Stopped,
}

/// Notifications from the audio core so a front end can resync its key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceEvent {
    Started(NoteId),
    Ended { note: NoteId, reason: EndReason },
}

impl VoiceEvent {
    pub fn note(&self) -> NoteId {
        match *self {
            VoiceEvent::Started(note) => note,
            VoiceEvent::Ended { note, .. } => note,
        }
    }
}
