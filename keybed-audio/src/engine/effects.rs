use std::sync::{Mutex, PoisonError};

use keybed_types::{clamp_volume, EffectsParams};

use super::backend::AudioBackend;

/// Holds the shared effect settings and pushes them into the graph.
///
/// Each value lives behind its own lock, held across the store and the
/// backend call that realizes it so concurrent updates reach the graph in
/// the order they were stored.
pub struct EffectsController {
    params: Mutex<EffectsParams>,
    master: Mutex<f32>,
}

impl EffectsController {
    pub fn new(initial: EffectsParams, master_volume: f32) -> Self {
        Self {
            params: Mutex::new(initial.clamped()),
            master: Mutex::new(clamp_volume(master_volume)),
        }
    }

    pub fn current(&self) -> EffectsParams {
        *self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn master_volume(&self) -> f32 {
        *self.master.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `params` (clamped) and apply all four values as one update.
    pub fn set(&self, backend: &dyn AudioBackend, params: EffectsParams) -> EffectsParams {
        let params = params.clamped();
        let mut current = self.params.lock().unwrap_or_else(PoisonError::into_inner);
        *current = params;
        apply(backend, &params);
        log::debug!(target: "audio::effects", "effects set to {:?}", params);
        params
    }

    pub fn set_master_volume(&self, backend: &dyn AudioBackend, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        let mut master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        *master = volume;
        if let Err(e) = backend.set_master_gain(volume) {
            log::warn!(target: "audio::effects", "master gain not applied: {}", e);
        }
        volume
    }

    /// Push the stored values again, e.g. into a freshly built graph.
    pub fn apply_current(&self, backend: &dyn AudioBackend) {
        {
            let params = self.params.lock().unwrap_or_else(PoisonError::into_inner);
            apply(backend, &params);
        }
        let master = self.master.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = backend.set_master_gain(*master) {
            log::warn!(target: "audio::effects", "master gain not applied: {}", e);
        }
    }
}

fn apply(backend: &dyn AudioBackend, params: &EffectsParams) {
    if let Err(e) = backend.set_effects(params) {
        log::warn!(target: "audio::effects", "effects update failed: {}", e);
    }
}
