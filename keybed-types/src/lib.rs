//! # keybed-types
//!
//! Shared type definitions for the keybed sampled keyboard.
//! Note identifiers, effect parameters and the status/event types exchanged
//! between the audio core and whatever drives it.

mod audio;
mod effects;
mod note;

pub use audio::{EndReason, EngineStatus, VoiceEvent};
pub use effects::{clamp_volume, EffectsParams};
pub use note::{NoteId, ParseNoteError};
