pub mod backend;
mod effects;
mod lifecycle;
pub mod samples;
pub(crate) mod voice_registry;
mod voices;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use backend::{AudioBackend, ChainSettings, VoiceNodeId};
use effects::EffectsController;
use keybed_types::{EffectsParams, EngineStatus, NoteId, VoiceEvent};
use samples::SampleLibrary;
use voice_registry::VoiceRegistry;

use crate::config::Config;

/// Capacity of the voice event stream; events beyond it are dropped.
pub const VOICE_EVENT_CAPACITY: usize = 256;

/// Handle to a voice returned by `note_on`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceHandle {
    pub note: NoteId,
    pub node: VoiceNodeId,
}

struct Lifecycle {
    graph_built: bool,
}

/// The audio core: voice registry, shared effects and the engine lifecycle
/// over one processing graph.
///
/// Construct one per process and share it by `Arc`; every operation takes
/// `&self`. The registry and the effects state are guarded independently
/// and are never locked together.
pub struct AudioEngine {
    backend: Box<dyn AudioBackend>,
    samples: SampleLibrary,
    chain: ChainSettings,
    voices: Mutex<VoiceRegistry>,
    effects: EffectsController,
    lifecycle: Mutex<Lifecycle>,
    /// Mirrors the lifecycle state for lock-free reads; written only while
    /// `lifecycle` is held.
    running: AtomicBool,
    next_node_id: AtomicU64,
    completion_rx: Receiver<VoiceNodeId>,
    event_tx: Sender<VoiceEvent>,
    event_rx: Receiver<VoiceEvent>,
}

impl AudioEngine {
    pub fn new(
        mut backend: Box<dyn AudioBackend>,
        samples: SampleLibrary,
        chain: ChainSettings,
        effects: EffectsParams,
        master_volume: f32,
    ) -> Self {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        backend.connect_completions(completion_tx);
        let (event_tx, event_rx) = crossbeam_channel::bounded(VOICE_EVENT_CAPACITY);

        Self {
            backend,
            samples,
            chain,
            voices: Mutex::new(VoiceRegistry::new()),
            effects: EffectsController::new(effects, master_volume),
            lifecycle: Mutex::new(Lifecycle { graph_built: false }),
            running: AtomicBool::new(false),
            next_node_id: AtomicU64::new(1),
            completion_rx,
            event_tx,
            event_rx,
        }
    }

    /// Engine wired from configuration: sample table, chain settings,
    /// initial effects and master volume.
    pub fn from_config(backend: Box<dyn AudioBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.sample_library(),
            config.chain(),
            config.effects(),
            config.master_volume(),
        )
    }

    pub fn status(&self) -> EngineStatus {
        if self.is_running() {
            EngineStatus::Running
        } else {
            EngineStatus::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn samples(&self) -> &SampleLibrary {
        &self.samples
    }

    /// Replace all four effect values. Out-of-range values are clamped.
    pub fn set_parameters(&self, bass_db: f32, treble_db: f32, reverb_mix: f32, echo_mix: f32) {
        self.set_effects(EffectsParams::new(bass_db, treble_db, reverb_mix, echo_mix));
    }

    /// Replace the effect settings; returns the values actually applied.
    pub fn set_effects(&self, params: EffectsParams) -> EffectsParams {
        self.effects.set(self.backend.as_ref(), params)
    }

    pub fn effects(&self) -> EffectsParams {
        self.effects.current()
    }

    /// Set the summing node's output level, clamped to `[0, 1]`.
    pub fn set_master_volume(&self, volume: f32) -> f32 {
        self.effects.set_master_volume(self.backend.as_ref(), volume)
    }

    pub fn master_volume(&self) -> f32 {
        self.effects.master_volume()
    }

    /// Stream of voice start/end notifications for front-end resync.
    ///
    /// Receivers share one queue: each event goes to exactly one of them.
    pub fn events(&self) -> Receiver<VoiceEvent> {
        self.event_rx.clone()
    }

    pub(crate) fn completion_receiver(&self) -> &Receiver<VoiceNodeId> {
        &self.completion_rx
    }

    fn alloc_node_id(&self) -> VoiceNodeId {
        VoiceNodeId::new(self.next_node_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: VoiceEvent) {
        if self.event_tx.try_send(event).is_err() {
            log::debug!(target: "audio::engine", "voice event queue full, dropped {:?}", event);
        }
    }

    fn lock_voices(&self) -> MutexGuard<'_, VoiceRegistry> {
        self.voices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop_all();
        self.stop();
    }
}
