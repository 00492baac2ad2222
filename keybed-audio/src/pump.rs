//! Background delivery of voice completions.
//!
//! The render side only posts finished node ids to a queue; the cleanup they
//! trigger takes the registry lock and detaches the voice, which must never
//! happen on the audio thread. `CompletionPump` does that work on its own
//! thread as reports arrive.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Sender};

use crate::engine::AudioEngine;

pub struct CompletionPump {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CompletionPump {
    pub fn spawn(engine: Arc<AudioEngine>) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("keybed-completions".to_string())
            .spawn(move || {
                let completions = engine.completion_receiver().clone();
                loop {
                    select! {
                        recv(completions) -> msg => match msg {
                            Ok(node) => {
                                engine.finish_voice(node);
                            }
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!(target: "audio::engine", "completion pump exiting");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the pump and wait for its thread. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!(target: "audio::engine", "completion pump panicked");
            }
        }
    }
}

impl Drop for CompletionPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, Instant};

    use keybed_types::{EffectsParams, NoteId};

    use super::*;
    use crate::engine::backend::{ChainSettings, SharedTestBackend, TestBackend};
    use crate::engine::samples::SampleLibrary;

    fn engine_with_samples(dir: &Path) -> (Arc<AudioEngine>, Arc<TestBackend>) {
        for note in NoteId::ALL {
            std::fs::write(dir.join(format!("{}.wav", note.asset_name())), b"").unwrap();
        }
        let backend = Arc::new(TestBackend::new());
        let engine = AudioEngine::new(
            Box::new(SharedTestBackend(backend.clone())),
            SampleLibrary::new(dir, "wav"),
            ChainSettings::default(),
            EffectsParams::default(),
            1.0,
        );
        (Arc::new(engine), backend)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn pump_cleans_up_completed_voices() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, backend) = engine_with_samples(dir.path());
        engine.start().unwrap();
        let mut pump = CompletionPump::spawn(engine.clone()).unwrap();

        let handle = engine.note_on(NoteId::A, 0.8).unwrap();
        assert!(backend.complete(handle.node));

        assert!(wait_until(|| !engine.is_active(NoteId::A)));
        assert!(!backend.is_attached(handle.node));
        pump.shutdown();
    }

    #[test]
    fn pump_ignores_completion_after_note_off() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, backend) = engine_with_samples(dir.path());
        engine.start().unwrap();
        let _pump = CompletionPump::spawn(engine.clone()).unwrap();

        let first = engine.note_on(NoteId::D, 1.0).unwrap();
        engine.note_off(NoteId::D);
        let second = engine.note_on(NoteId::D, 1.0).unwrap();
        backend.complete(first.node);

        // Give the pump time to see the stale report.
        thread::sleep(Duration::from_millis(50));
        assert!(engine.is_active(NoteId::D));
        assert!(backend.is_attached(second.node));
        assert_eq!(backend.nodes_detached(), vec![first.node]);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _backend) = engine_with_samples(dir.path());
        let mut pump = CompletionPump::spawn(engine).unwrap();
        pump.shutdown();
        pump.shutdown();
    }
}
