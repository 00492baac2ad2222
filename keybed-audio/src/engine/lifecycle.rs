use std::sync::atomic::Ordering;

use super::AudioEngine;
use crate::error::AudioError;

impl AudioEngine {
    /// Build the effect chain on first use and start processing.
    ///
    /// Calling `start` while running is a no-op. The graph is built once per
    /// engine; a restart after `stop` reuses it.
    pub fn start(&self) -> Result<(), AudioError> {
        let mut lifecycle = self.lock_lifecycle();
        if self.running.load(Ordering::Acquire) {
            log::debug!(target: "audio::engine", "start ignored: already running");
            return Ok(());
        }

        if !lifecycle.graph_built {
            self.backend
                .build_graph(&self.chain)
                .map_err(|e| AudioError::EngineStartFailed(format!("graph build: {}", e)))?;
            lifecycle.graph_built = true;
            self.effects.apply_current(self.backend.as_ref());
            log::debug!(target: "audio::engine", "effect chain built: {:?}", self.chain);
        }

        self.backend
            .start()
            .map_err(|e| AudioError::EngineStartFailed(e.to_string()))?;
        self.running.store(true, Ordering::Release);
        log::info!(target: "audio::engine", "audio engine running");
        Ok(())
    }

    /// Halt processing. Registered voices are left alone; call `stop_all`
    /// first for a clean teardown.
    pub fn stop(&self) {
        let _lifecycle = self.lock_lifecycle();
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        if let Err(e) = self.backend.stop() {
            log::warn!(target: "audio::engine", "backend stop failed: {}", e);
        }
        self.running.store(false, Ordering::Release);
        log::info!(target: "audio::engine", "audio engine stopped");
    }
}
