// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Audio framework abstraction.
//!
//! The native audio framework (node allocation, mixing, device I/O) is an
//! external collaborator. The control plane drives it exclusively through
//! [`AudioBackend`]; embedders supply the real implementation, tests use
//! [`NullBackend`].
//!
//! All methods are called from the dispatcher thread or the real-time
//! parameter path. Implementations must be `Send + Sync`; single-parameter
//! set/get atomicity is the backend's responsibility.

use crate::plugins::PluginBlueprint;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

/// Well-known parameter addresses every backend node understands. Plugin
/// parameters use host-assigned addresses outside these ranges.
pub mod params {
    /// Channel fader, linear 0-1.
    pub const VOLUME: u64 = 0x0100_0000;
    /// Stereo position, -1..1.
    pub const PAN: u64 = 0x0100_0001;
    /// Playback rate, 0.25..2.0.
    pub const PLAYBACK_RATE: u64 = 0x0100_0002;
    /// Pitch shift in semitones, -12..12.
    pub const PITCH_SHIFT: u64 = 0x0100_0003;
    /// Per-input-bus gain on a mix/bus node: `BUS_GAIN_BASE + bus`. Used for
    /// channel faders on the main mix node and send levels on aux busses.
    pub const BUS_GAIN_BASE: u64 = 0x0200_0000;
    /// Per-input-bus stereo position on a mix node: `BUS_PAN_BASE + bus`.
    pub const BUS_PAN_BASE: u64 = 0x0300_0000;
}

/// Opaque handle to a node in the backend's audio graph.
///
/// Handles are minted by the backend and never persisted; snapshots carry
/// only the information needed to re-acquire them (device uids, file paths,
/// plugin blueprints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub u64);

/// Stream format for a graph edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    pub sample_rate: f64,
    pub channel_count: u32,
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("engine start failed: {0}")]
    StartFailed(String),
    #[error("node allocation failed: {0}")]
    AllocationFailed(String),
    #[error("node {0:?} is not attached")]
    NotAttached(NodeRef),
    #[error("connect {src:?} -> {dst:?} failed: {reason}")]
    ConnectFailed {
        src: NodeRef,
        dst: NodeRef,
        reason: String,
    },
    #[error("output device rebind failed: {0}")]
    OutputRebindFailed(String),
    #[error("tap error: {0}")]
    Tap(String),
}

/// Contract with the native audio framework.
///
/// Method granularity mirrors the underlying engine: nodes are allocated,
/// attached to the running graph, wired with `connect`, and torn down in
/// reverse. `start`/`stop` gate the whole engine; everything else may be
/// called while it runs.
pub trait AudioBackend: Send + Sync {
    /// Prepare internal resources. Called once before the first start.
    fn prepare(&self) -> Result<(), BackendError>;

    /// Start the engine. The graph must already be wired.
    fn start(&self) -> Result<(), BackendError>;

    /// Stop the engine, preserving the graph.
    fn stop(&self);

    /// Release the engine and every node it owns. Terminal.
    fn destroy(&self);

    fn attach(&self, node: NodeRef) -> Result<(), BackendError>;
    fn detach(&self, node: NodeRef);

    /// Wire `src` output bus to `dst` input bus.
    fn connect(
        &self,
        src: NodeRef,
        dst: NodeRef,
        src_bus: u32,
        dst_bus: u32,
        format: &StreamFormat,
    ) -> Result<(), BackendError>;

    /// Remove whatever feeds `node` on `bus`.
    fn disconnect_input(&self, node: NodeRef, bus: u32);

    /// The engine's main mix bus node. Always attached.
    fn main_mixer_node(&self) -> NodeRef;

    /// The engine's hardware output node. Always attached.
    fn output_node(&self) -> NodeRef;

    /// Acquire the hardware input node for a capture device bus.
    fn input_node(&self, device_uid: &str, input_bus: u32) -> Result<NodeRef, BackendError>;

    fn new_player_node(&self, file_path: &str) -> Result<NodeRef, BackendError>;
    fn new_time_pitch_node(&self) -> Result<NodeRef, BackendError>;
    fn new_mixer_node(&self) -> Result<NodeRef, BackendError>;
    fn new_midi_synth_node(&self, soundbank_path: &str) -> Result<NodeRef, BackendError>;

    /// Instantiate a third-party effect unit from its blueprint.
    fn new_audio_unit(&self, blueprint: &PluginBlueprint) -> Result<NodeRef, BackendError>;

    /// Free a node previously created by one of the `new_*` methods or
    /// `input_node`. The node must already be detached.
    fn release_node(&self, node: NodeRef);

    /// Rebind the hardware output to a different device without restarting
    /// the engine. The mixer -> output edge is preserved.
    fn set_output_device(&self, device_uid: &str) -> Result<(), BackendError>;

    /// Real-time safe single-parameter write.
    fn set_parameter(&self, node: NodeRef, address: u64, value: f32);

    /// Real-time safe single-parameter read.
    fn get_parameter(&self, node: NodeRef, address: u64) -> f32;

    fn install_tap(&self, node: NodeRef, bus: u32, key: &str) -> Result<(), BackendError>;
    fn remove_tap(&self, key: &str);
    fn tap_rms(&self, key: &str) -> f32;
}

/// In-memory backend double.
///
/// Mints node handles from a counter and keeps a ledger of attachments and
/// edges so tests can assert graph shape. Failure injection covers the start
/// path and unit instantiation.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_node: AtomicU64,
    running: AtomicBool,
    fail_start: AtomicBool,
    state: Mutex<NullState>,
}

#[derive(Debug, Default)]
struct NullState {
    attached: HashSet<NodeRef>,
    /// (src, dst, src_bus, dst_bus)
    edges: HashSet<(NodeRef, NodeRef, u32, u32)>,
    released: HashSet<NodeRef>,
    parameters: HashMap<(NodeRef, u64), f32>,
    taps: HashMap<String, (NodeRef, u32)>,
    output_device: Option<String>,
    /// Blueprints whose instantiation should fail.
    broken_units: HashSet<String>,
}

impl NullBackend {
    pub fn new() -> Self {
        let backend = Self {
            // 0 and 1 are reserved for the fixed mixer/output nodes.
            next_node: AtomicU64::new(2),
            ..Self::default()
        };
        {
            let mut state = backend.state.lock();
            state.attached.insert(NodeRef(0));
            state.attached.insert(NodeRef(1));
        }
        backend
    }

    fn mint(&self) -> NodeRef {
        NodeRef(self.next_node.fetch_add(1, Ordering::Relaxed))
    }

    /// Make the next `start` call fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Relaxed);
    }

    /// Mark a unit key (quadruplet) as failing instantiation.
    pub fn break_unit(&self, quadruplet: &str) {
        self.state.lock().broken_units.insert(quadruplet.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn attached_count(&self) -> usize {
        self.state.lock().attached.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.lock().edges.len()
    }

    pub fn has_edge(&self, src: NodeRef, dst: NodeRef) -> bool {
        self.state
            .lock()
            .edges
            .iter()
            .any(|&(s, d, _, _)| s == src && d == dst)
    }

    pub fn is_attached(&self, node: NodeRef) -> bool {
        self.state.lock().attached.contains(&node)
    }

    pub fn was_released(&self, node: NodeRef) -> bool {
        self.state.lock().released.contains(&node)
    }

    pub fn current_output_device(&self) -> Option<String> {
        self.state.lock().output_device.clone()
    }
}

impl AudioBackend for NullBackend {
    fn prepare(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn start(&self) -> Result<(), BackendError> {
        if self.fail_start.load(Ordering::Relaxed) {
            return Err(BackendError::StartFailed("injected failure".into()));
        }
        self.running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    fn destroy(&self) {
        self.running.store(false, Ordering::Relaxed);
        let mut state = self.state.lock();
        state.attached.clear();
        state.edges.clear();
        state.taps.clear();
    }

    fn attach(&self, node: NodeRef) -> Result<(), BackendError> {
        self.state.lock().attached.insert(node);
        Ok(())
    }

    fn detach(&self, node: NodeRef) {
        let mut state = self.state.lock();
        state.attached.remove(&node);
        state
            .edges
            .retain(|&(src, dst, _, _)| src != node && dst != node);
    }

    fn connect(
        &self,
        src: NodeRef,
        dst: NodeRef,
        src_bus: u32,
        dst_bus: u32,
        _format: &StreamFormat,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        if !state.attached.contains(&src) {
            return Err(BackendError::NotAttached(src));
        }
        if !state.attached.contains(&dst) {
            return Err(BackendError::NotAttached(dst));
        }
        state.edges.insert((src, dst, src_bus, dst_bus));
        Ok(())
    }

    fn disconnect_input(&self, node: NodeRef, bus: u32) {
        self.state
            .lock()
            .edges
            .retain(|&(_, dst, _, dst_bus)| !(dst == node && dst_bus == bus));
    }

    fn main_mixer_node(&self) -> NodeRef {
        NodeRef(0)
    }

    fn output_node(&self) -> NodeRef {
        NodeRef(1)
    }

    fn input_node(&self, _device_uid: &str, _input_bus: u32) -> Result<NodeRef, BackendError> {
        Ok(self.mint())
    }

    fn new_player_node(&self, _file_path: &str) -> Result<NodeRef, BackendError> {
        Ok(self.mint())
    }

    fn new_time_pitch_node(&self) -> Result<NodeRef, BackendError> {
        Ok(self.mint())
    }

    fn new_mixer_node(&self) -> Result<NodeRef, BackendError> {
        Ok(self.mint())
    }

    fn new_midi_synth_node(&self, _soundbank_path: &str) -> Result<NodeRef, BackendError> {
        Ok(self.mint())
    }

    fn new_audio_unit(&self, blueprint: &PluginBlueprint) -> Result<NodeRef, BackendError> {
        if self.state.lock().broken_units.contains(&blueprint.quadruplet()) {
            return Err(BackendError::AllocationFailed(format!(
                "unit {} unavailable",
                blueprint.quadruplet()
            )));
        }
        Ok(self.mint())
    }

    fn release_node(&self, node: NodeRef) {
        let mut state = self.state.lock();
        state.attached.remove(&node);
        state.released.insert(node);
    }

    fn set_output_device(&self, device_uid: &str) -> Result<(), BackendError> {
        self.state.lock().output_device = Some(device_uid.to_string());
        Ok(())
    }

    fn set_parameter(&self, node: NodeRef, address: u64, value: f32) {
        self.state.lock().parameters.insert((node, address), value);
    }

    fn get_parameter(&self, node: NodeRef, address: u64) -> f32 {
        self.state
            .lock()
            .parameters
            .get(&(node, address))
            .copied()
            .unwrap_or(0.0)
    }

    fn install_tap(&self, node: NodeRef, bus: u32, key: &str) -> Result<(), BackendError> {
        self.state.lock().taps.insert(key.to_string(), (node, bus));
        Ok(())
    }

    fn remove_tap(&self, key: &str) {
        self.state.lock().taps.remove(key);
    }

    fn tap_rms(&self, _key: &str) -> f32 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 48_000.0,
            channel_count: 2,
        }
    }

    #[test]
    fn test_connect_requires_attachment() {
        let backend = NullBackend::new();
        let node = backend.new_mixer_node().unwrap();
        let err = backend
            .connect(node, backend.main_mixer_node(), 0, 0, &format())
            .unwrap_err();
        assert!(matches!(err, BackendError::NotAttached(_)));

        backend.attach(node).unwrap();
        backend
            .connect(node, backend.main_mixer_node(), 0, 0, &format())
            .unwrap();
        assert!(backend.has_edge(node, backend.main_mixer_node()));
    }

    #[test]
    fn test_detach_drops_edges() {
        let backend = NullBackend::new();
        let node = backend.new_mixer_node().unwrap();
        backend.attach(node).unwrap();
        backend
            .connect(node, backend.main_mixer_node(), 0, 0, &format())
            .unwrap();
        backend.detach(node);
        assert_eq!(backend.edge_count(), 0);
        assert!(!backend.is_attached(node));
    }

    #[test]
    fn test_start_failure_injection() {
        let backend = NullBackend::new();
        backend.set_fail_start(true);
        assert!(backend.start().is_err());
        assert!(!backend.is_running());
        backend.set_fail_start(false);
        backend.start().unwrap();
        assert!(backend.is_running());
    }
}
