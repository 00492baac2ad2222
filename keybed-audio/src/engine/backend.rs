//! Audio backend trait: a semantic-level abstraction over the processing graph.
//!
//! `AudioBackend` captures what the engine *means* to do (attach a voice, set a
//! gain, change an effect) independently of how the graph realizes it (a cpal
//! render thread, or a recorder in tests). This enables unit testing of the
//! registry and effects logic without an output device.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use keybed_types::EffectsParams;

/// Result type for backend operations.
pub type BackendResult<T = ()> = Result<T, BackendError>;

/// Error from a backend operation.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendError(pub String);

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError(e.to_string())
    }
}

/// Identity of one voice's source + gain stage inside the graph.
///
/// Ids are handed out by the engine and never reused within an engine
/// instance, so a stale completion can never match a newer voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoiceNodeId(u64);

impl VoiceNodeId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for VoiceNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed settings of the shared effect chain, applied once when the graph is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSettings {
    pub bass_freq_hz: f32,
    pub treble_freq_hz: f32,
    pub delay_time_secs: f32,
    pub delay_feedback: f32,
    pub reverb_room_size: f32,
    pub reverb_damping: f32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            bass_freq_hz: 200.0,
            treble_freq_hz: 6000.0,
            delay_time_secs: 0.35,
            delay_feedback: 0.45,
            reverb_room_size: 0.6,
            reverb_damping: 0.5,
        }
    }
}

/// Semantic-level audio backend trait.
///
/// Each method represents a meaningful graph operation. Voice attach and
/// detach are single calls: implementations connect after attaching and
/// disconnect before detaching so the change is atomic from the caller's side.
/// Master and effect setters may be called before `build_graph`; the last
/// values set are the ones a graph built later starts with.
pub trait AudioBackend: Send + Sync {
    /// Install the queue on which the graph reports voices whose sample ran out.
    fn connect_completions(&mut self, tx: Sender<VoiceNodeId>);

    /// Build the summing node and the equalizer -> delay -> reverb -> output chain.
    fn build_graph(&self, chain: &ChainSettings) -> BackendResult;

    /// Start real-time processing.
    fn start(&self) -> BackendResult;

    /// Halt real-time processing. Attached voices stay attached.
    fn stop(&self) -> BackendResult;

    /// Load `sample` ahead of `attach_voice`, so the attach itself does no
    /// file I/O. Preparing an already loaded sample is cheap.
    fn prepare_sample(&self, sample: &Path) -> BackendResult;

    /// Attach a player for `sample` plus a dedicated gain stage feeding the summing node.
    fn attach_voice(&self, node: VoiceNodeId, sample: &Path, gain: f32) -> BackendResult;

    /// Begin playback of an attached voice from the start of its sample.
    fn play_voice(&self, node: VoiceNodeId) -> BackendResult;

    /// Set the gain stage of an attached voice.
    fn set_voice_gain(&self, node: VoiceNodeId, gain: f32) -> BackendResult;

    /// Stop, disconnect and detach a voice.
    fn detach_voice(&self, node: VoiceNodeId) -> BackendResult;

    /// Set the summing node's output gain.
    fn set_master_gain(&self, gain: f32) -> BackendResult;

    /// Apply shelf gains (dB) and delay/reverb mixes (percent) together.
    /// The graph never processes a block with only part of `params` in effect.
    fn set_effects(&self, params: &EffectsParams) -> BackendResult;
}

// ─── Test Backend ───────────────────────────────────────────────────

/// An operation recorded by `TestBackend` for assertion in tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOp {
    BuildGraph(ChainSettings),
    Start,
    Stop,
    PrepareSample(PathBuf),
    AttachVoice {
        node: VoiceNodeId,
        sample: PathBuf,
        gain: f32,
    },
    PlayVoice(VoiceNodeId),
    SetVoiceGain {
        node: VoiceNodeId,
        gain: f32,
    },
    DetachVoice(VoiceNodeId),
    SetMasterGain(f32),
    SetEffects(EffectsParams),
}

/// Operation selector for `TestBackend::fail_next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestOpKind {
    BuildGraph,
    Start,
    Stop,
    PrepareSample,
    AttachVoice,
    PlayVoice,
    SetVoiceGain,
    DetachVoice,
    SetMasterGain,
    SetEffects,
}

/// A test backend that records successful operations for assertions.
///
/// It tracks which voice nodes are attached and refuses to play, re-gain or
/// detach a node that is not, so double releases and leaks show up in tests.
/// Uses `Mutex` for interior mutability so the backend is `Send + Sync`.
pub struct TestBackend {
    ops: Mutex<Vec<TestOp>>,
    attached: Mutex<HashSet<VoiceNodeId>>,
    failures: Mutex<HashSet<TestOpKind>>,
    completions: Mutex<Option<Sender<VoiceNodeId>>>,
    prepare_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl TestBackend {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            attached: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashSet::new()),
            completions: Mutex::new(None),
            prepare_gate: Mutex::new(None),
        }
    }

    /// Return all recorded operations.
    pub fn operations(&self) -> Vec<TestOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Clear recorded operations.
    pub fn clear(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Count operations matching a predicate.
    pub fn count<F: Fn(&TestOp) -> bool>(&self, f: F) -> usize {
        self.ops.lock().unwrap().iter().filter(|op| f(op)).count()
    }

    /// Find the last operation matching a predicate.
    pub fn find_last<F: Fn(&TestOp) -> bool>(&self, f: F) -> Option<TestOp> {
        self.ops.lock().unwrap().iter().rev().find(|op| f(op)).cloned()
    }

    /// Make the next call of the given kind fail with a `BackendError`.
    pub fn fail_next(&self, kind: TestOpKind) {
        self.failures.lock().unwrap().insert(kind);
    }

    /// Voice nodes currently attached, in id order.
    pub fn attached_nodes(&self) -> Vec<VoiceNodeId> {
        let mut nodes: Vec<_> = self.attached.lock().unwrap().iter().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn is_attached(&self, node: VoiceNodeId) -> bool {
        self.attached.lock().unwrap().contains(&node)
    }

    /// Return every detached node id, in call order.
    pub fn nodes_detached(&self) -> Vec<VoiceNodeId> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                TestOp::DetachVoice(node) => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// Simulate the render thread reporting that `node`'s sample ran out.
    /// Returns `false` when no completion queue is connected.
    pub fn complete(&self, node: VoiceNodeId) -> bool {
        match self.completions.lock().unwrap().as_ref() {
            Some(tx) => tx.send(node).is_ok(),
            None => false,
        }
    }

    /// Hold the next `prepare_sample` call: it signals on the returned
    /// receiver once entered, then waits for a message on the returned sender.
    pub fn hold_next_prepare(&self) -> (Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (resume_tx, resume_rx) = crossbeam_channel::bounded(1);
        *self.prepare_gate.lock().unwrap() = Some((entered_tx, resume_rx));
        (entered_rx, resume_tx)
    }

    fn set_completion_sender(&self, tx: Sender<VoiceNodeId>) {
        *self.completions.lock().unwrap() = Some(tx);
    }

    fn check(&self, kind: TestOpKind) -> BackendResult {
        if self.failures.lock().unwrap().remove(&kind) {
            return Err(BackendError(format!("injected {:?} failure", kind)));
        }
        Ok(())
    }

    fn require_attached(&self, node: VoiceNodeId) -> BackendResult {
        if self.attached.lock().unwrap().contains(&node) {
            Ok(())
        } else {
            Err(BackendError(format!("voice node {} is not attached", node)))
        }
    }

    fn record(&self, op: TestOp) -> BackendResult {
        self.ops.lock().unwrap().push(op);
        Ok(())
    }
}

impl AudioBackend for TestBackend {
    fn connect_completions(&mut self, tx: Sender<VoiceNodeId>) {
        self.set_completion_sender(tx);
    }

    fn build_graph(&self, chain: &ChainSettings) -> BackendResult {
        self.check(TestOpKind::BuildGraph)?;
        self.record(TestOp::BuildGraph(chain.clone()))
    }

    fn start(&self) -> BackendResult {
        self.check(TestOpKind::Start)?;
        self.record(TestOp::Start)
    }

    fn stop(&self) -> BackendResult {
        self.check(TestOpKind::Stop)?;
        self.record(TestOp::Stop)
    }

    fn prepare_sample(&self, sample: &Path) -> BackendResult {
        self.check(TestOpKind::PrepareSample)?;
        let gate = self.prepare_gate.lock().unwrap().take();
        if let Some((entered, resume)) = gate {
            let _ = entered.send(());
            let _ = resume.recv();
        }
        self.record(TestOp::PrepareSample(sample.to_path_buf()))
    }

    fn attach_voice(&self, node: VoiceNodeId, sample: &Path, gain: f32) -> BackendResult {
        self.check(TestOpKind::AttachVoice)?;
        if !self.attached.lock().unwrap().insert(node) {
            return Err(BackendError(format!("voice node {} already attached", node)));
        }
        self.record(TestOp::AttachVoice {
            node,
            sample: sample.to_path_buf(),
            gain,
        })
    }

    fn play_voice(&self, node: VoiceNodeId) -> BackendResult {
        self.check(TestOpKind::PlayVoice)?;
        self.require_attached(node)?;
        self.record(TestOp::PlayVoice(node))
    }

    fn set_voice_gain(&self, node: VoiceNodeId, gain: f32) -> BackendResult {
        self.check(TestOpKind::SetVoiceGain)?;
        self.require_attached(node)?;
        self.record(TestOp::SetVoiceGain { node, gain })
    }

    fn detach_voice(&self, node: VoiceNodeId) -> BackendResult {
        self.check(TestOpKind::DetachVoice)?;
        if !self.attached.lock().unwrap().remove(&node) {
            return Err(BackendError(format!("voice node {} is not attached", node)));
        }
        self.record(TestOp::DetachVoice(node))
    }

    fn set_master_gain(&self, gain: f32) -> BackendResult {
        self.check(TestOpKind::SetMasterGain)?;
        self.record(TestOp::SetMasterGain(gain))
    }

    fn set_effects(&self, params: &EffectsParams) -> BackendResult {
        self.check(TestOpKind::SetEffects)?;
        self.record(TestOp::SetEffects(*params))
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps `Arc<TestBackend>` to implement `AudioBackend` so the engine can
/// own a `Box<dyn AudioBackend>` while tests retain an `Arc` for assertions.
pub struct SharedTestBackend(pub Arc<TestBackend>);

impl AudioBackend for SharedTestBackend {
    fn connect_completions(&mut self, tx: Sender<VoiceNodeId>) {
        self.0.set_completion_sender(tx);
    }
    fn build_graph(&self, chain: &ChainSettings) -> BackendResult {
        self.0.build_graph(chain)
    }
    fn start(&self) -> BackendResult {
        self.0.start()
    }
    fn stop(&self) -> BackendResult {
        self.0.stop()
    }
    fn prepare_sample(&self, sample: &Path) -> BackendResult {
        self.0.prepare_sample(sample)
    }
    fn attach_voice(&self, node: VoiceNodeId, sample: &Path, gain: f32) -> BackendResult {
        self.0.attach_voice(node, sample, gain)
    }
    fn play_voice(&self, node: VoiceNodeId) -> BackendResult {
        self.0.play_voice(node)
    }
    fn set_voice_gain(&self, node: VoiceNodeId, gain: f32) -> BackendResult {
        self.0.set_voice_gain(node, gain)
    }
    fn detach_voice(&self, node: VoiceNodeId) -> BackendResult {
        self.0.detach_voice(node)
    }
    fn set_master_gain(&self, gain: f32) -> BackendResult {
        self.0.set_master_gain(gain)
    }
    fn set_effects(&self, params: &EffectsParams) -> BackendResult {
        self.0.set_effects(params)
    }
}

// ─── NullBackend ────────────────────────────────────────────────────

/// A no-op backend that silently succeeds. Useful when no output device
/// is wanted. Voices attached to it never complete on their own.
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn connect_completions(&mut self, _: Sender<VoiceNodeId>) {}
    fn build_graph(&self, _: &ChainSettings) -> BackendResult { Ok(()) }
    fn start(&self) -> BackendResult { Ok(()) }
    fn stop(&self) -> BackendResult { Ok(()) }
    fn prepare_sample(&self, _: &Path) -> BackendResult { Ok(()) }
    fn attach_voice(&self, _: VoiceNodeId, _: &Path, _: f32) -> BackendResult { Ok(()) }
    fn play_voice(&self, _: VoiceNodeId) -> BackendResult { Ok(()) }
    fn set_voice_gain(&self, _: VoiceNodeId, _: f32) -> BackendResult { Ok(()) }
    fn detach_voice(&self, _: VoiceNodeId) -> BackendResult { Ok(()) }
    fn set_master_gain(&self, _: f32) -> BackendResult { Ok(()) }
    fn set_effects(&self, _: &EffectsParams) -> BackendResult { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> VoiceNodeId {
        VoiceNodeId::new(id)
    }

    #[test]
    fn detach_of_unattached_node_is_refused() {
        let backend = TestBackend::new();
        assert!(backend.detach_voice(node(1)).is_err());

        backend.attach_voice(node(1), Path::new("c.wav"), 1.0).unwrap();
        assert!(backend.detach_voice(node(1)).is_ok());
        assert!(backend.detach_voice(node(1)).is_err());
        assert_eq!(backend.nodes_detached(), vec![node(1)]);
    }

    #[test]
    fn injected_failure_fires_once_and_is_not_recorded() {
        let backend = TestBackend::new();
        backend.fail_next(TestOpKind::AttachVoice);

        assert!(backend.attach_voice(node(7), Path::new("g.wav"), 0.5).is_err());
        assert!(backend.attached_nodes().is_empty());
        assert!(backend.operations().is_empty());

        assert!(backend.attach_voice(node(7), Path::new("g.wav"), 0.5).is_ok());
        assert_eq!(backend.attached_nodes(), vec![node(7)]);
    }

    #[test]
    fn complete_requires_connected_queue() {
        let mut backend = TestBackend::new();
        assert!(!backend.complete(node(3)));

        let (tx, rx) = crossbeam_channel::unbounded();
        backend.connect_completions(tx);
        assert!(backend.complete(node(3)));
        assert_eq!(rx.try_recv(), Ok(node(3)));
    }

    #[test]
    fn effects_update_is_one_operation() {
        let backend = TestBackend::new();
        let params = EffectsParams::new(3.0, -3.0, 40.0, 10.0);
        backend.prepare_sample(Path::new("a.wav")).unwrap();
        backend.set_effects(&params).unwrap();

        assert_eq!(
            backend.operations(),
            vec![TestOp::PrepareSample(PathBuf::from("a.wav")), TestOp::SetEffects(params)]
        );
    }
}
