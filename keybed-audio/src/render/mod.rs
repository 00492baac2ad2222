//! cpal output backend.
//!
//! The control side (this module) validates every request against its own
//! mirror of the graph, decodes samples, computes filter coefficients and
//! forwards ready-to-apply `GraphCommand`s. The render side (`graph`) runs in
//! the cpal callback on a dedicated output thread that owns the stream.
//!
//! Commands go through a bounded queue only while the stream runs. With no
//! stream, or with the queue full, the control side locks the graph and
//! applies them itself, so a forwarded command never fails.

mod dsp;
mod graph;
mod loader;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, TrySendError};

use keybed_types::EffectsParams;

use crate::engine::backend::{AudioBackend, BackendError, BackendResult, ChainSettings, VoiceNodeId};
use dsp::{shelf_coefficients, Shelf};
use graph::{silence, GraphCommand, RenderGraph, MAX_PLAYERS};
pub use loader::{decode_wav, DecodedSample};

/// Depth of the control -> render command queue.
const COMMAND_CAPACITY: usize = 1024;

/// How long `start` waits for the output thread to open its stream.
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Names of the output devices the default host offers.
pub fn output_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.output_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            log::warn!(target: "audio::render", "cannot enumerate output devices: {}", e);
            Vec::new()
        }
    }
}

fn find_output_device(name: Option<&str>) -> BackendResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| BackendError(format!("cannot enumerate output devices: {}", e)))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| BackendError(format!("output device '{}' not found", name))),
        None => host
            .default_output_device()
            .ok_or_else(|| BackendError("no default output device".to_string())),
    }
}

/// Format the graph was built for, reused every time the stream reopens.
#[derive(Debug, Clone)]
struct OutputFormat {
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

impl OutputFormat {
    fn sample_rate(&self) -> f32 {
        self.config.sample_rate.0 as f32
    }
}

type SharedGraph = Arc<Mutex<RenderGraph>>;

/// Thread that owns the (non-`Send`) cpal stream while the engine runs.
struct OutputThread {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl OutputThread {
    fn spawn(device_name: Option<String>, format: OutputFormat, graph: SharedGraph) -> BackendResult<Self> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<BackendResult>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("keybed-output".to_string())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), &format, graph) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(BackendError(format!("stream play: {}", e))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Returns on shutdown or when the backend is dropped.
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    log::debug!(target: "audio::render", "stream pause: {}", e);
                }
            })?;

        match ready_rx.recv_timeout(STREAM_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(Self {
                shutdown: shutdown_tx,
                handle,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(BackendError("output stream did not open in time".to_string())),
        }
    }

    fn shutdown(self) {
        let _ = self.shutdown.send(());
        if self.handle.join().is_err() {
            log::error!(target: "audio::render", "output thread panicked");
        }
    }
}

fn open_stream(device_name: Option<&str>, format: &OutputFormat, graph: SharedGraph) -> BackendResult<cpal::Stream> {
    let device = find_output_device(device_name)?;
    match format.sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &format.config, graph),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &format.config, graph),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &format.config, graph),
        other => Err(BackendError(format!("unsupported sample format {:?}", other))),
    }
}

fn build_stream<T>(device: &cpal::Device, config: &cpal::StreamConfig, graph: SharedGraph) -> BackendResult<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| match graph.try_lock() {
                Ok(mut graph) => graph.render(data, channels),
                Err(_) => silence(data),
            },
            |err| log::error!(target: "audio::render", "output stream error: {}", err),
            None,
        )
        .map_err(|e| BackendError(format!("build output stream: {}", e)))
}

/// Control-side mirror of the graph.
struct ControlState {
    format: Option<OutputFormat>,
    chain: ChainSettings,
    graph: Option<SharedGraph>,
    output: Option<OutputThread>,
    attached: HashSet<VoiceNodeId>,
    master: f32,
    effects: EffectsParams,
}

/// `AudioBackend` that renders through the system's audio output.
pub struct CpalBackend {
    device_name: Option<String>,
    commands_tx: Sender<GraphCommand>,
    commands_rx: Receiver<GraphCommand>,
    completions: Option<Sender<VoiceNodeId>>,
    state: Mutex<ControlState>,
    /// Decoded samples by path. Holding them here keeps the render thread
    /// from ever releasing the last reference.
    cache: Mutex<HashMap<PathBuf, DecodedSample>>,
}

impl CpalBackend {
    /// Backend for the named output device, or the host default.
    pub fn new(device_name: Option<String>) -> Self {
        let (commands_tx, commands_rx) = crossbeam_channel::bounded(COMMAND_CAPACITY);
        Self {
            device_name,
            commands_tx,
            commands_rx,
            completions: None,
            state: Mutex::new(ControlState {
                format: None,
                chain: ChainSettings::default(),
                graph: None,
                output: None,
                attached: HashSet::new(),
                master: 1.0,
                effects: EffectsParams::default(),
            }),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward `command` to the graph. Callers hold the state lock, which
    /// keeps queued and directly applied commands in call order.
    fn send(&self, state: &ControlState, command: GraphCommand) -> BackendResult {
        let Some(graph) = &state.graph else {
            return Err(BackendError("graph not built".to_string()));
        };
        let command = if state.output.is_some() {
            match self.commands_tx.try_send(command) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(command)) => {
                    log::debug!(target: "audio::render", "command queue full, applying directly");
                    command
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(BackendError("graph is gone".to_string()))
                }
            }
        } else {
            command
        };
        graph
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_now(command);
        Ok(())
    }

    fn load_sample(&self, path: &Path) -> BackendResult<DecodedSample> {
        if let Some(sample) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(sample.clone());
        }

        let sample = decode_wav(path)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), sample.clone());
        Ok(sample)
    }

    fn require_attached(state: &ControlState, node: VoiceNodeId) -> BackendResult {
        if state.attached.contains(&node) {
            Ok(())
        } else {
            Err(BackendError(format!("voice node {} is not attached", node)))
        }
    }

    fn eq_coefficients(
        format: &OutputFormat,
        chain: &ChainSettings,
        effects: &EffectsParams,
    ) -> BackendResult<(biquad::Coefficients<f32>, biquad::Coefficients<f32>)> {
        let rate = format.sample_rate();
        let low = shelf_coefficients(Shelf::Low, rate, chain.bass_freq_hz, effects.bass_db)?;
        let high = shelf_coefficients(Shelf::High, rate, chain.treble_freq_hz, effects.treble_db)?;
        Ok((low, high))
    }
}

fn mix_fraction(percent: f32) -> f32 {
    (percent / 100.0).clamp(0.0, 1.0)
}

impl AudioBackend for CpalBackend {
    fn connect_completions(&mut self, tx: Sender<VoiceNodeId>) {
        self.completions = Some(tx);
    }

    fn build_graph(&self, chain: &ChainSettings) -> BackendResult {
        let mut state = self.lock_state();
        if state.graph.is_some() {
            return Ok(());
        }

        let device = find_output_device(self.device_name.as_deref())?;
        let supported = device
            .default_output_config()
            .map_err(|e| BackendError(format!("output config: {}", e)))?;
        let format = OutputFormat {
            sample_format: supported.sample_format(),
            config: supported.into(),
        };

        let (low, high) = Self::eq_coefficients(&format, chain, &state.effects)?;
        let mut graph = RenderGraph::new(
            format.sample_rate(),
            chain,
            self.commands_rx.clone(),
            self.completions.clone(),
            low,
            high,
            state.master,
        );
        graph.set_delay_mix(mix_fraction(state.effects.echo_mix));
        graph.set_reverb_mix(mix_fraction(state.effects.reverb_mix));

        log::info!(
            target: "audio::render",
            "graph built for {} at {} Hz, {} ch, {:?}",
            device.name().unwrap_or_else(|_| "unknown device".to_string()),
            format.config.sample_rate.0,
            format.config.channels,
            format.sample_format
        );

        state.chain = chain.clone();
        state.format = Some(format);
        state.graph = Some(Arc::new(Mutex::new(graph)));
        Ok(())
    }

    fn start(&self) -> BackendResult {
        let mut state = self.lock_state();
        if state.output.is_some() {
            return Ok(());
        }
        let (Some(graph), Some(format)) = (state.graph.clone(), state.format.clone()) else {
            return Err(BackendError("graph not built".to_string()));
        };
        state.output = Some(OutputThread::spawn(self.device_name.clone(), format, graph)?);
        Ok(())
    }

    fn stop(&self) -> BackendResult {
        let output = self.lock_state().output.take();
        if let Some(output) = output {
            output.shutdown();
        }
        Ok(())
    }

    fn prepare_sample(&self, sample: &Path) -> BackendResult {
        self.load_sample(sample).map(|_| ())
    }

    fn attach_voice(&self, node: VoiceNodeId, sample: &Path, gain: f32) -> BackendResult {
        let decoded = self.load_sample(sample)?;

        let mut state = self.lock_state();
        let Some(rate) = state.format.as_ref().map(OutputFormat::sample_rate) else {
            return Err(BackendError("graph not built".to_string()));
        };
        if state.attached.len() >= MAX_PLAYERS {
            return Err(BackendError(format!("all {} players in use", MAX_PLAYERS)));
        }
        if state.attached.contains(&node) {
            return Err(BackendError(format!("voice node {} already attached", node)));
        }

        self.send(
            &state,
            GraphCommand::Attach {
                node,
                frames: decoded.frames,
                step: decoded.sample_rate as f32 / rate,
                gain,
            },
        )?;
        state.attached.insert(node);
        Ok(())
    }

    fn play_voice(&self, node: VoiceNodeId) -> BackendResult {
        let state = self.lock_state();
        Self::require_attached(&state, node)?;
        self.send(&state, GraphCommand::Play(node))
    }

    fn set_voice_gain(&self, node: VoiceNodeId, gain: f32) -> BackendResult {
        let state = self.lock_state();
        Self::require_attached(&state, node)?;
        self.send(&state, GraphCommand::SetGain { node, gain })
    }

    fn detach_voice(&self, node: VoiceNodeId) -> BackendResult {
        let mut state = self.lock_state();
        Self::require_attached(&state, node)?;
        state.attached.remove(&node);
        self.send(&state, GraphCommand::Detach(node))
    }

    fn set_master_gain(&self, gain: f32) -> BackendResult {
        let mut state = self.lock_state();
        state.master = gain;
        if state.graph.is_some() {
            self.send(&state, GraphCommand::SetMaster(gain))?;
        }
        Ok(())
    }

    fn set_effects(&self, params: &EffectsParams) -> BackendResult {
        let mut state = self.lock_state();
        state.effects = *params;
        if let Some(format) = &state.format {
            let (low, high) = Self::eq_coefficients(format, &state.chain, params)?;
            let command = GraphCommand::SetEffects {
                low,
                high,
                delay_mix: mix_fraction(params.echo_mix),
                reverb_mix: mix_fraction(params.reverb_mix),
            };
            self.send(&state, command)?;
        }
        Ok(())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Some(output) = self.lock_state().output.take() {
            output.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing here opens an output stream. `built` installs a graph the way
    // `build_graph` does, minus the device.

    fn built() -> (CpalBackend, SharedGraph) {
        let backend = CpalBackend::new(None);
        let format = OutputFormat {
            config: cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(48_000),
                buffer_size: cpal::BufferSize::Default,
            },
            sample_format: cpal::SampleFormat::F32,
        };
        let chain = ChainSettings::default();
        let (low, high) = CpalBackend::eq_coefficients(&format, &chain, &EffectsParams::default()).unwrap();
        let graph = Arc::new(Mutex::new(RenderGraph::new(
            format.sample_rate(),
            &chain,
            backend.commands_rx.clone(),
            None,
            low,
            high,
            1.0,
        )));
        {
            let mut state = backend.lock_state();
            state.format = Some(format);
            state.graph = Some(Arc::clone(&graph));
        }
        (backend, graph)
    }

    fn write_wav(path: &Path, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &frame in frames {
            writer.write_sample(frame).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn voice_calls_before_build_are_refused() {
        let backend = CpalBackend::new(None);
        let node = VoiceNodeId::new(1);
        assert!(backend.play_voice(node).is_err());
        assert!(backend.set_voice_gain(node, 0.5).is_err());
        assert!(backend.detach_voice(node).is_err());
    }

    #[test]
    fn start_without_graph_fails() {
        let backend = CpalBackend::new(None);
        assert!(backend.start().is_err());
        assert!(backend.stop().is_ok());
    }

    #[test]
    fn effect_setters_before_build_are_remembered() {
        let backend = CpalBackend::new(None);
        let params = EffectsParams::new(4.0, -6.0, 60.0, 25.0);
        backend.set_master_gain(0.3).unwrap();
        backend.set_effects(&params).unwrap();

        let state = backend.lock_state();
        assert_eq!(state.master, 0.3);
        assert_eq!(state.effects, params);
        assert!(backend.commands_rx.is_empty());
    }

    #[test]
    fn missing_sample_file_fails_attach() {
        let backend = CpalBackend::new(None);
        let err = backend
            .attach_voice(VoiceNodeId::new(1), Path::new("/nonexistent/c.wav"), 1.0)
            .unwrap_err();
        assert!(err.0.contains("c.wav"));
    }

    #[test]
    fn decoded_samples_are_cached_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_wav(&path, &[100]);

        let backend = CpalBackend::new(None);
        let first = backend.load_sample(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let second = backend.load_sample(&path).unwrap();
        assert!(Arc::ptr_eq(&first.frames, &second.frames));
    }

    #[test]
    fn detach_after_many_updates_while_stopped_still_removes_player() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        write_wav(&path, &[1000; 64]);

        let (backend, graph) = built();
        let node = VoiceNodeId::new(1);
        backend.attach_voice(node, &path, 1.0).unwrap();
        backend.play_voice(node).unwrap();

        // More updates than the command queue holds, with no stream draining it.
        for i in 0..(COMMAND_CAPACITY * 2) {
            let mix = (i % 100) as f32;
            backend.set_effects(&EffectsParams::new(0.0, 0.0, mix, mix)).unwrap();
            backend.set_master_gain(0.5).unwrap();
        }

        backend.detach_voice(node).unwrap();
        assert!(!backend.lock_state().attached.contains(&node));
        assert_eq!(graph.lock().unwrap().player_count(), 0);
        assert!(backend.commands_rx.is_empty());
    }

    #[test]
    fn rollback_detach_while_stopped_leaves_no_player() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.wav");
        write_wav(&path, &[500; 16]);

        let (backend, graph) = built();
        let node = VoiceNodeId::new(9);
        backend.attach_voice(node, &path, 0.8).unwrap();
        assert_eq!(graph.lock().unwrap().player_count(), 1);

        backend.detach_voice(node).unwrap();
        assert_eq!(graph.lock().unwrap().player_count(), 0);
        assert!(backend.play_voice(node).is_err());
    }

    #[test]
    fn prepared_sample_is_reused_by_attach() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.wav");
        write_wav(&path, &[200; 8]);

        let (backend, _graph) = built();
        backend.prepare_sample(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        backend.attach_voice(VoiceNodeId::new(2), &path, 1.0).unwrap();

        assert!(backend.prepare_sample(Path::new("/nonexistent/e.wav")).is_err());
    }

    #[test]
    fn mix_percent_maps_to_fraction() {
        assert_eq!(mix_fraction(0.0), 0.0);
        assert_eq!(mix_fraction(50.0), 0.5);
        assert_eq!(mix_fraction(150.0), 1.0);
    }
}
