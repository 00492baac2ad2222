use std::time::Instant;

use keybed_types::NoteId;

use super::backend::VoiceNodeId;

/// One sounding instance of a note sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub note: NoteId,
    pub node: VoiceNodeId,
    /// Gain stage level, always within `[0, 1]`.
    pub gain: f32,
    pub started_at: Instant,
}

impl Voice {
    pub fn new(note: NoteId, node: VoiceNodeId, gain: f32) -> Self {
        Self {
            note,
            node,
            gain,
            started_at: Instant::now(),
        }
    }
}

/// Live voices, one slot per pitch class.
///
/// The registry only tracks ownership; it never talks to the graph. Callers
/// detach a voice's nodes in the same critical section that removes it.
pub struct VoiceRegistry {
    slots: [Option<Voice>; NoteId::COUNT],
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self {
            slots: [None; NoteId::COUNT],
        }
    }

    pub fn get(&self, note: NoteId) -> Option<&Voice> {
        self.slots[note.index()].as_ref()
    }

    pub fn get_mut(&mut self, note: NoteId) -> Option<&mut Voice> {
        self.slots[note.index()].as_mut()
    }

    pub fn contains(&self, note: NoteId) -> bool {
        self.slots[note.index()].is_some()
    }

    /// Register a voice. An occupied slot is never overwritten: the new
    /// voice is handed back instead.
    pub fn insert(&mut self, voice: Voice) -> Result<(), Voice> {
        let slot = &mut self.slots[voice.note.index()];
        if slot.is_some() {
            return Err(voice);
        }
        *slot = Some(voice);
        Ok(())
    }

    pub fn remove(&mut self, note: NoteId) -> Option<Voice> {
        self.slots[note.index()].take()
    }

    /// Remove the voice owning `node`, if it is still registered.
    pub fn remove_node(&mut self, node: VoiceNodeId) -> Option<Voice> {
        self.slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(v) if v.node == node))
            .and_then(Option::take)
    }

    /// Remove every voice, in pitch order.
    pub fn drain(&mut self) -> Vec<Voice> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Active notes in pitch order.
    pub fn notes(&self) -> Vec<NoteId> {
        self.slots.iter().flatten().map(|v| v.note).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for VoiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(note: NoteId, id: u64) -> Voice {
        Voice::new(note, VoiceNodeId::new(id), 1.0)
    }

    #[test]
    fn insert_and_remove() {
        let mut reg = VoiceRegistry::new();
        assert!(reg.insert(voice(NoteId::C, 1)).is_ok());
        assert!(reg.contains(NoteId::C));
        assert_eq!(reg.len(), 1);

        let removed = reg.remove(NoteId::C).unwrap();
        assert_eq!(removed.node, VoiceNodeId::new(1));
        assert!(!reg.contains(NoteId::C));
        assert!(reg.is_empty());
        assert!(reg.remove(NoteId::C).is_none());
    }

    #[test]
    fn occupied_slot_is_not_replaced() {
        let mut reg = VoiceRegistry::new();
        reg.insert(voice(NoteId::E, 1)).unwrap();

        let rejected = reg.insert(voice(NoteId::E, 2)).unwrap_err();
        assert_eq!(rejected.node, VoiceNodeId::new(2));
        assert_eq!(reg.get(NoteId::E).unwrap().node, VoiceNodeId::new(1));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_node_ignores_stale_ids() {
        let mut reg = VoiceRegistry::new();
        reg.insert(voice(NoteId::G, 5)).unwrap();

        assert!(reg.remove_node(VoiceNodeId::new(4)).is_none());
        assert!(reg.contains(NoteId::G));

        let removed = reg.remove_node(VoiceNodeId::new(5)).unwrap();
        assert_eq!(removed.note, NoteId::G);
        assert!(reg.remove_node(VoiceNodeId::new(5)).is_none());
    }

    #[test]
    fn drain_returns_pitch_order() {
        let mut reg = VoiceRegistry::new();
        reg.insert(voice(NoteId::B, 1)).unwrap();
        reg.insert(voice(NoteId::D, 2)).unwrap();
        reg.insert(voice(NoteId::Fs, 3)).unwrap();

        assert_eq!(reg.notes(), vec![NoteId::D, NoteId::Fs, NoteId::B]);
        let drained: Vec<_> = reg.drain().into_iter().map(|v| v.note).collect();
        assert_eq!(drained, vec![NoteId::D, NoteId::Fs, NoteId::B]);
        assert!(reg.is_empty());
    }
}
