use keybed_types::{clamp_volume, EndReason, NoteId, VoiceEvent};

use super::backend::{BackendError, VoiceNodeId};
use super::voice_registry::{Voice, VoiceRegistry};
use super::{AudioEngine, VoiceHandle};
use crate::error::AudioError;

fn attach_failed(note: NoteId, e: BackendError) -> AudioError {
    AudioError::GraphAttachFailed {
        note,
        reason: e.to_string(),
    }
}

impl AudioEngine {
    /// Start a voice for `note` at `volume` (clamped to `[0, 1]`).
    ///
    /// If the note already has a voice, nothing changes and that voice's
    /// handle is returned. On error the registry and the graph are exactly
    /// as they were before the call.
    pub fn note_on(&self, note: NoteId, volume: f32) -> Result<VoiceHandle, AudioError> {
        if let Some(existing) = self.admit(&self.lock_voices(), note)? {
            return Ok(existing);
        }

        // Sample loading happens outside the registry lock.
        let sample = self.samples.resolve(note)?;
        self.backend
            .prepare_sample(&sample)
            .map_err(|e| attach_failed(note, e))?;

        let mut voices = self.lock_voices();
        if let Some(existing) = self.admit(&voices, note)? {
            return Ok(existing);
        }

        let gain = clamp_volume(volume);
        let node = self.alloc_node_id();

        self.backend
            .attach_voice(node, &sample, gain)
            .map_err(|e| attach_failed(note, e))?;

        if let Err(e) = self.backend.play_voice(node) {
            if let Err(undo) = self.backend.detach_voice(node) {
                log::warn!(target: "audio::voices", "rollback of node {} failed: {}", node, undo);
            }
            return Err(attach_failed(note, e));
        }

        let inserted = voices.insert(Voice::new(note, node, gain));
        debug_assert!(inserted.is_ok(), "slot for {} filled while the registry was locked", note);
        drop(voices);

        log::debug!(target: "audio::voices", "note_on {} -> node {} gain {:.2}", note, node, gain);
        self.emit(VoiceEvent::Started(note));
        Ok(VoiceHandle { note, node })
    }

    /// Existing voice for `note`, or an error if no new voice may start.
    fn admit(&self, voices: &VoiceRegistry, note: NoteId) -> Result<Option<VoiceHandle>, AudioError> {
        if let Some(existing) = voices.get(note) {
            log::debug!(target: "audio::voices", "note_on {}: already active as node {}", note, existing.node);
            return Ok(Some(VoiceHandle {
                note,
                node: existing.node,
            }));
        }
        if !self.is_running() {
            return Err(AudioError::GraphAttachFailed {
                note,
                reason: "engine is not running".to_string(),
            });
        }
        Ok(None)
    }

    /// Stop and remove the voice for `note`. No-op if there is none.
    pub fn note_off(&self, note: NoteId) {
        let mut voices = self.lock_voices();
        if let Some(voice) = voices.remove(note) {
            self.release(&voice, EndReason::Stopped);
        }
    }

    /// Set the gain stage of `note`'s voice. No-op if there is none.
    pub fn set_volume(&self, note: NoteId, volume: f32) {
        let gain = clamp_volume(volume);
        let mut voices = self.lock_voices();
        let Some(voice) = voices.get_mut(note) else {
            return;
        };

        match self.backend.set_voice_gain(voice.node, gain) {
            Ok(()) => voice.gain = gain,
            Err(e) => {
                log::warn!(target: "audio::voices", "gain for {} not applied: {}", note, e);
            }
        }
    }

    /// Stop and remove every voice.
    pub fn stop_all(&self) {
        let mut voices = self.lock_voices();
        if voices.is_empty() {
            return;
        }
        let drained = voices.drain();
        log::debug!(target: "audio::voices", "stopping {} voices", drained.len());
        for voice in &drained {
            self.release(voice, EndReason::Stopped);
        }
    }

    pub fn is_active(&self, note: NoteId) -> bool {
        self.lock_voices().contains(note)
    }

    /// Active notes in pitch order.
    pub fn active_notes(&self) -> Vec<NoteId> {
        self.lock_voices().notes()
    }

    pub fn active_count(&self) -> usize {
        self.lock_voices().len()
    }

    /// Gain of the live voice for `note`.
    pub fn volume(&self, note: NoteId) -> Option<f32> {
        self.lock_voices().get(note).map(|v| v.gain)
    }

    /// Drain pending completion reports without blocking.
    /// Returns how many voices were cleaned up.
    pub fn process_completions(&self) -> usize {
        self.completion_receiver()
            .try_iter()
            .filter(|&node| self.finish_voice(node))
            .count()
    }

    /// Clean up after a voice whose sample ran out.
    ///
    /// Only acts if `node` is still the node registered for its note, so a
    /// completion that lost the race against `note_off` is a no-op.
    pub(crate) fn finish_voice(&self, node: VoiceNodeId) -> bool {
        let mut voices = self.lock_voices();
        match voices.remove_node(node) {
            Some(voice) => {
                self.release(&voice, EndReason::Completed);
                true
            }
            None => {
                log::debug!(target: "audio::voices", "stale completion for node {}", node);
                false
            }
        }
    }

    /// Detach a voice already removed from the registry. Called with the
    /// registry lock held so removal and detach form one unit.
    fn release(&self, voice: &Voice, reason: EndReason) {
        if let Err(e) = self.backend.detach_voice(voice.node) {
            log::warn!(
                target: "audio::voices",
                "detach of node {} ({}) failed: {}",
                voice.node,
                voice.note,
                e
            );
        }
        log::debug!(
            target: "audio::voices",
            "{} ended ({:?}) after {:?}",
            voice.note,
            reason,
            voice.started_at.elapsed()
        );
        self.emit(VoiceEvent::Ended {
            note: voice.note,
            reason,
        });
    }
}
