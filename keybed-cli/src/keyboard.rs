use std::collections::VecDeque;
use std::sync::Arc;

use keybed_audio::{AudioEngine, AudioError, VoiceHandle};
use keybed_types::NoteId;

/// Most notes the keyboard lets sound at once.
pub const MAX_SOUNDING: usize = 3;

/// Outcome of a key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    Started(VoiceHandle),
    /// The note is still sounding; the press was ignored.
    AlreadySounding,
    /// `MAX_SOUNDING` notes are sounding; the press was rejected.
    AtCapacity,
}

/// Front-end policy over the engine: a polyphony cap and no retriggering.
pub struct Keyboard {
    engine: Arc<AudioEngine>,
    /// Pressed notes, oldest first. May hold notes that have since finished.
    pressed: VecDeque<NoteId>,
}

impl Keyboard {
    pub fn new(engine: Arc<AudioEngine>) -> Self {
        Self {
            engine,
            pressed: VecDeque::with_capacity(NoteId::COUNT),
        }
    }

    pub fn press(&mut self, note: NoteId, volume: f32) -> Result<Press, AudioError> {
        self.forget_finished();
        if self.engine.is_active(note) {
            return Ok(Press::AlreadySounding);
        }
        if self.engine.active_count() >= MAX_SOUNDING {
            log::debug!(target: "keyboard", "{} rejected: {} notes sounding", note, MAX_SOUNDING);
            return Ok(Press::AtCapacity);
        }

        let handle = self.engine.note_on(note, volume)?;
        self.pressed.push_back(note);
        Ok(Press::Started(handle))
    }

    pub fn release(&mut self, note: NoteId) {
        self.engine.note_off(note);
        self.pressed.retain(|&n| n != note);
    }

    /// Release the note that has been sounding longest, if any.
    pub fn release_oldest(&mut self) -> Option<NoteId> {
        self.forget_finished();
        let note = self.pressed.pop_front()?;
        self.engine.note_off(note);
        Some(note)
    }

    pub fn release_all(&mut self) {
        self.engine.stop_all();
        self.pressed.clear();
    }

    /// Notes still sounding, oldest first.
    pub fn sounding(&mut self) -> Vec<NoteId> {
        self.forget_finished();
        self.pressed.iter().copied().collect()
    }

    fn forget_finished(&mut self) {
        let engine = &self.engine;
        self.pressed.retain(|&note| engine.is_active(note));
    }
}
