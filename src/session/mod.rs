// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The session facade.
//!
//! A session owns the audio spec, the graph model, the dispatcher, the
//! device monitor, and the plugin cache. Every mutating call either goes
//! straight to the backend (real-time parameter writes) or is submitted to
//! the dispatcher and returns a completion handle. Reads take the model's
//! read side and return cloned snapshots.

pub mod snapshot;

pub use snapshot::{SavedConnection, SessionSnapshot, SessionState, SNAPSHOT_VERSION};

use crate::backend::{params, AudioBackend, StreamFormat};
use crate::devices::{
    AudioDevice, DeviceChange, DeviceChangeCallback, DeviceDirectory, DeviceEnumerator,
    DeviceMonitor, MidiDevice, MonitorConfig, MonitorTelemetry,
};
use crate::dispatcher::{ChannelSpec, Dispatcher, ExecContext, OpHandle, Operation, MASTER_TAP_KEY};
use crate::error::{
    ConfigurationError, Diagnostic, DiagnosticKind, EngineError, EngineResult,
};
use crate::graph::channel::{validate_send_level, validate_volume};
use crate::graph::{
    Channel, ChannelHeader, GraphModel, InputNodeTable, MasterChannel, MetronomeConfig,
    PluginChain, PluginInstance,
};
use crate::ids::{ChannelId, PluginInstanceId};
use crate::plugins::{
    CacheMetrics, IndexEntry, ParameterValue, PluginBlueprint, PluginCache, PluginHost,
    PluginRecord, RefreshSummary,
};
use crate::spec::AudioSpec;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};

/// How long `destroy` waits for in-flight pool work before forcing shutdown.
const DESTROY_DEADLINE: Duration = Duration::from_secs(5);

/// External collaborators and tuning for a session.
pub struct SessionConfig {
    pub backend: Arc<dyn AudioBackend>,
    pub enumerator: Arc<dyn DeviceEnumerator>,
    pub plugin_host: Arc<dyn PluginHost>,
    /// Plugin cache location; defaults to `MACAUDIO_CACHE_DIR` or the
    /// platform user cache directory.
    pub cache_dir: Option<PathBuf>,
    pub monitor: MonitorConfig,
    /// Install an RMS tap on the master output while running.
    pub master_metering: bool,
    pub cache_metrics: Option<Arc<dyn CacheMetrics>>,
    pub monitor_telemetry: Option<Arc<dyn MonitorTelemetry>>,
}

impl SessionConfig {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        enumerator: Arc<dyn DeviceEnumerator>,
        plugin_host: Arc<dyn PluginHost>,
    ) -> Self {
        Self {
            backend,
            enumerator,
            plugin_host,
            cache_dir: None,
            monitor: MonitorConfig::default(),
            master_metering: false,
            cache_metrics: None,
            monitor_telemetry: None,
        }
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn monitor(mut self, config: MonitorConfig) -> Self {
        self.monitor = config;
        self
    }

    pub fn master_metering(mut self, enabled: bool) -> Self {
        self.master_metering = enabled;
        self
    }

    pub fn cache_metrics(mut self, metrics: Arc<dyn CacheMetrics>) -> Self {
        self.cache_metrics = Some(metrics);
        self
    }

    pub fn monitor_telemetry(mut self, telemetry: Arc<dyn MonitorTelemetry>) -> Self {
        self.monitor_telemetry = Some(telemetry);
        self
    }
}

/// A live audio session.
pub struct Session {
    spec: AudioSpec,
    model: Arc<RwLock<GraphModel>>,
    inputs: Arc<RwLock<InputNodeTable>>,
    backend: Arc<dyn AudioBackend>,
    devices: Arc<DeviceDirectory>,
    cache: Arc<PluginCache>,
    dispatcher: Dispatcher,
    monitor: Mutex<DeviceMonitor>,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    handle: tokio::runtime::Handle,
    running: Arc<AtomicBool>,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Construct a session with a fresh master channel bound to
    /// `master_output_device`. The device must be known and online.
    pub fn new(
        spec: AudioSpec,
        master_output_device: &str,
        config: SessionConfig,
    ) -> EngineResult<Self> {
        let master = MasterChannel {
            header: ChannelHeader::new(ChannelId::new(), "master", 1.0),
            plugin_chain: PluginChain::new(),
            output_device_uid: master_output_device.to_string(),
            metering_enabled: config.master_metering,
        };
        Self::build(spec, master, config, None)
    }

    fn build(
        spec: AudioSpec,
        master: MasterChannel,
        config: SessionConfig,
        mut diagnostics: Option<&mut Vec<Diagnostic>>,
    ) -> EngineResult<Self> {
        spec.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("macaudio-pool")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let devices = Arc::new(DeviceDirectory::new());
        let monitor = DeviceMonitor::start(
            config.monitor,
            Arc::clone(&config.enumerator),
            Arc::clone(&devices),
            handle.clone(),
            config.monitor_telemetry,
        );

        // Master output device check. During restore an unknown/offline
        // device is a diagnostic, not a failure.
        let output_uid = master.output_device_uid.clone();
        let output_ok = match devices.audio_device(&output_uid) {
            Some(device) if device.is_online && device.has_outputs() => true,
            Some(_) => match diagnostics.as_mut() {
                Some(list) => {
                    list.push(
                        Diagnostic::new(
                            DiagnosticKind::DeviceOffline,
                            "master output device offline",
                        )
                        .with_device(output_uid.clone()),
                    );
                    false
                }
                None => {
                    return Err(EngineError::DeviceOffline { uid: output_uid });
                }
            },
            None => match diagnostics.as_mut() {
                Some(list) => {
                    list.push(
                        Diagnostic::new(
                            DiagnosticKind::DeviceOffline,
                            "master output device unknown",
                        )
                        .with_device(output_uid.clone()),
                    );
                    false
                }
                None => return Err(ConfigurationError::UnknownDevice(output_uid).into()),
            },
        };

        let backend = config.backend;
        backend
            .prepare()
            .map_err(|e| EngineError::framework("prepare", e.to_string()))?;
        if output_ok {
            backend
                .set_output_device(&output_uid)
                .map_err(|e| EngineError::framework("output bind", e.to_string()))?;
        }

        // Default master edge: main mix straight into the output.
        let format = StreamFormat {
            sample_rate: spec.sample_rate,
            channel_count: spec.channel_count,
        };
        backend
            .connect(
                backend.main_mixer_node(),
                backend.output_node(),
                0,
                0,
                &format,
            )
            .map_err(|e| EngineError::framework("wire master", e.to_string()))?;

        let cache = Arc::new(PluginCache::open(
            config.cache_dir,
            config.plugin_host,
            config.cache_metrics,
        )?);

        let model = Arc::new(RwLock::new(GraphModel::new(master)));
        model.write().refresh_readiness(&devices);

        let inputs = Arc::new(RwLock::new(InputNodeTable::new()));
        let running = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::spawn(ExecContext {
            spec,
            model: Arc::clone(&model),
            inputs: Arc::clone(&inputs),
            backend: Arc::clone(&backend),
            devices: Arc::clone(&devices),
            running: Arc::clone(&running),
        })?;

        info!(
            sample_rate = spec.sample_rate,
            buffer_size = spec.buffer_size,
            "session created"
        );
        Ok(Self {
            spec,
            model,
            inputs,
            backend,
            devices,
            cache,
            dispatcher,
            monitor: Mutex::new(monitor),
            runtime: Mutex::new(Some(runtime)),
            handle,
            running,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn audio_spec(&self) -> AudioSpec {
        self.spec
    }

    /// Current lifecycle state, derived from the model.
    pub fn state(&self) -> SessionState {
        if self.running.load(Ordering::Acquire) {
            return SessionState::Running;
        }
        let model = self.model.read();
        if model.any_ready_non_master() {
            SessionState::AudioGraphReady
        } else if model.non_master_count() > 0 {
            SessionState::ChannelsReady
        } else {
            SessionState::MasterReady
        }
    }

    pub fn master_id(&self) -> ChannelId {
        self.model.read().master_id()
    }

    // ---- dispatched control ----------------------------------------------

    /// Validate the graph and start the engine.
    pub fn start(&self) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::StartEngine)?)
    }

    /// Stop the engine, preserving the graph.
    pub fn stop(&self) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::StopEngine)?)
    }

    pub fn set_channel_mute(&self, channel_id: ChannelId, muted: bool) -> EngineResult<OpHandle> {
        Ok(self
            .dispatcher
            .submit(Operation::SetMute { channel_id, muted })?)
    }

    pub fn create_audio_input_channel(
        &self,
        name: &str,
        device_uid: &str,
        input_bus: u32,
        volume: f32,
        pan: f32,
    ) -> EngineResult<(ChannelId, OpHandle)> {
        let id = ChannelId::new();
        let handle = self
            .dispatcher
            .submit(Operation::CreateChannel(Box::new(ChannelSpec::AudioInput {
                id,
                name: name.to_string(),
                device_uid: device_uid.to_string(),
                input_bus,
                volume,
                pan,
                allow_offline: false,
            })))?;
        Ok((id, handle))
    }

    pub fn create_midi_input_channel(
        &self,
        name: &str,
        midi_device_uid: &str,
        midi_channel: u8,
        soundbank_path: Option<&str>,
        volume: f32,
        pan: f32,
    ) -> EngineResult<(ChannelId, OpHandle)> {
        let id = ChannelId::new();
        let handle = self
            .dispatcher
            .submit(Operation::CreateChannel(Box::new(ChannelSpec::MidiInput {
                id,
                name: name.to_string(),
                midi_device_uid: midi_device_uid.to_string(),
                midi_channel,
                soundbank_path: soundbank_path.map(str::to_string),
                volume,
                pan,
                allow_offline: false,
            })))?;
        Ok((id, handle))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_playback_channel(
        &self,
        name: &str,
        file_path: &str,
        can_loop: bool,
        playback_rate: f32,
        pitch_shift_semitones: f32,
        metronome: Option<MetronomeConfig>,
        volume: f32,
    ) -> EngineResult<(ChannelId, OpHandle)> {
        let id = ChannelId::new();
        let handle = self
            .dispatcher
            .submit(Operation::CreateChannel(Box::new(ChannelSpec::Playback {
                id,
                name: name.to_string(),
                file_path: file_path.to_string(),
                can_loop,
                playback_rate,
                pitch_shift_semitones,
                metronome,
                volume,
                allow_missing: false,
            })))?;
        Ok((id, handle))
    }

    pub fn create_aux_channel(&self, name: &str, volume: f32) -> EngineResult<(ChannelId, OpHandle)> {
        let id = ChannelId::new();
        let handle = self
            .dispatcher
            .submit(Operation::CreateChannel(Box::new(ChannelSpec::Aux {
                id,
                name: name.to_string(),
                volume,
            })))?;
        Ok((id, handle))
    }

    pub fn delete_channel(&self, channel_id: ChannelId) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::DeleteChannel { channel_id })?)
    }

    /// Introspect (via the cache) and insert a plugin. The introspection
    /// runs on the task pool from the calling thread; the dispatcher
    /// operation receives the resolved record and only does graph work.
    pub fn add_plugin(
        &self,
        channel_id: ChannelId,
        blueprint: PluginBlueprint,
        position: usize,
    ) -> EngineResult<(PluginInstanceId, OpHandle)> {
        let instance_id = PluginInstanceId::new();
        let record = match self.handle.block_on(self.cache.get_details(&blueprint)) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %blueprint.quadruplet(), error = %e, "introspection failed");
                None
            }
        };
        let handle = self.dispatcher.submit(Operation::AddPlugin {
            channel_id,
            instance_id,
            blueprint,
            position,
            bypassed: false,
            record,
            parameters: None,
        })?;
        Ok((instance_id, handle))
    }

    pub fn remove_plugin(
        &self,
        channel_id: ChannelId,
        plugin_id: PluginInstanceId,
    ) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::RemovePlugin {
            channel_id,
            plugin_id,
        })?)
    }

    pub fn reorder_plugin(
        &self,
        channel_id: ChannelId,
        from: usize,
        to: usize,
    ) -> EngineResult<OpHandle> {
        Ok(self
            .dispatcher
            .submit(Operation::ReorderPlugin { channel_id, from, to })?)
    }

    pub fn set_plugin_bypass(
        &self,
        channel_id: ChannelId,
        plugin_id: PluginInstanceId,
        bypassed: bool,
    ) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::PluginBypass {
            channel_id,
            plugin_id,
            bypassed,
        })?)
    }

    pub fn change_channel_device(
        &self,
        channel_id: ChannelId,
        new_device_uid: &str,
    ) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::DeviceChange {
            channel_id,
            new_device_uid: new_device_uid.to_string(),
        })?)
    }

    pub fn change_output_device(&self, new_device_uid: &str) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::OutputDeviceChange {
            new_device_uid: new_device_uid.to_string(),
        })?)
    }

    pub fn add_aux_send(
        &self,
        channel_id: ChannelId,
        target_aux: ChannelId,
        level: f32,
        pre_fader: bool,
    ) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::AddAuxSend {
            channel_id,
            target_aux,
            level,
            pre_fader,
        })?)
    }

    pub fn remove_aux_send(
        &self,
        channel_id: ChannelId,
        target_aux: ChannelId,
    ) -> EngineResult<OpHandle> {
        Ok(self.dispatcher.submit(Operation::RemoveAuxSend {
            channel_id,
            target_aux,
        })?)
    }

    // ---- direct (real-time) parameter path --------------------------------

    /// Real-time fader write. Not ordered with respect to concurrent
    /// dispatcher operations on the same channel.
    pub fn set_channel_volume(&self, channel_id: ChannelId, volume: f32) -> EngineResult<()> {
        validate_volume(volume)?;
        let mut model = self.model.write();
        let channel = model.require_mut(channel_id)?;
        channel.header_mut().volume = volume;
        if channel.is_master() {
            self.backend
                .set_parameter(self.backend.main_mixer_node(), params::VOLUME, volume);
        } else if let Some(bus) = channel.header().mixer_bus {
            self.backend.set_parameter(
                self.backend.main_mixer_node(),
                params::BUS_GAIN_BASE + bus as u64,
                volume,
            );
        }
        Ok(())
    }

    /// Real-time pan write; input channels only.
    pub fn set_channel_pan(&self, channel_id: ChannelId, pan: f32) -> EngineResult<()> {
        crate::graph::channel::validate_pan(pan)?;
        let mut model = self.model.write();
        let channel = model.require_mut(channel_id)?;
        channel.set_pan(pan)?;
        if let Some(bus) = channel.header().mixer_bus {
            self.backend.set_parameter(
                self.backend.main_mixer_node(),
                params::BUS_PAN_BASE + bus as u64,
                pan,
            );
        }
        Ok(())
    }

    /// Real-time send level write.
    pub fn set_aux_send_level(
        &self,
        channel_id: ChannelId,
        target_aux: ChannelId,
        level: f32,
    ) -> EngineResult<()> {
        validate_send_level(level)?;
        let mut model = self.model.write();
        let bus = {
            let channel = model.require_mut(channel_id)?;
            let sends = channel
                .aux_sends_mut()
                .ok_or(ConfigurationError::UnsupportedForChannelKind {
                    kind: "playback",
                })?;
            let send = sends
                .iter_mut()
                .find(|s| s.target_aux == target_aux)
                .ok_or(ConfigurationError::SendNotFound(target_aux))?;
            send.level = level;
            send.bus
        };
        if let (Some(bus), Some(Channel::Aux(aux))) = (bus, model.channel(target_aux)) {
            if let Some(node) = aux.bus_node {
                self.backend
                    .set_parameter(node, params::BUS_GAIN_BASE + bus as u64, level);
            }
        }
        Ok(())
    }

    /// Real-time plugin parameter write.
    pub fn set_plugin_parameter(
        &self,
        channel_id: ChannelId,
        plugin_id: PluginInstanceId,
        address: u64,
        value: f32,
    ) -> EngineResult<()> {
        let mut model = self.model.write();
        let channel = model.require_mut(channel_id)?;
        let chain = channel
            .plugin_chain_mut()
            .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
        let instance = chain
            .get_mut(plugin_id)
            .ok_or(ConfigurationError::PluginNotFound)?;
        instance.set_parameter_value(address, value);
        if let Some(node) = instance.node {
            self.backend.set_parameter(node, address, value);
        }
        Ok(())
    }

    /// Real-time plugin parameter read. Falls back to the stored value when
    /// the unit is not instantiated.
    pub fn get_plugin_parameter(
        &self,
        channel_id: ChannelId,
        plugin_id: PluginInstanceId,
        address: u64,
    ) -> EngineResult<f32> {
        let model = self.model.read();
        let channel = model.require(channel_id)?;
        let chain = channel
            .plugin_chain()
            .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
        let instance = chain.get(plugin_id).ok_or(ConfigurationError::PluginNotFound)?;
        match instance.node {
            Some(node) => Ok(self.backend.get_parameter(node, address)),
            None => Ok(instance.parameter_value(address).unwrap_or(0.0)),
        }
    }

    /// RMS level at the master tap; 0.0 unless metering is enabled and the
    /// engine is running.
    pub fn master_rms(&self) -> f32 {
        if self.running.load(Ordering::Acquire) && self.model.read().master().metering_enabled {
            self.backend.tap_rms(MASTER_TAP_KEY)
        } else {
            0.0
        }
    }

    // ---- read path ---------------------------------------------------------

    /// Cloned snapshot of every channel, master first.
    pub fn get_channels(&self) -> Vec<Channel> {
        self.model.read().channels_snapshot()
    }

    pub fn get_channel(&self, channel_id: ChannelId) -> Option<Channel> {
        self.model.read().channel(channel_id).cloned()
    }

    pub fn get_device_lists(&self) -> (Vec<AudioDevice>, Vec<MidiDevice>) {
        (self.devices.audio_list(), self.devices.midi_list())
    }

    pub fn subscribe_device_changes(&self) -> tokio_mpsc::Receiver<DeviceChange> {
        self.monitor.lock().subscribe()
    }

    pub fn register_device_callback(&self, callback: DeviceChangeCallback) {
        self.monitor.lock().register_callback(callback);
    }

    /// Quick plugin index snapshot (no host round-trip).
    pub fn get_plugins(&self) -> Vec<IndexEntry> {
        self.cache.index_snapshot()
    }

    /// Re-scan the host and reconcile the quick index. Blocks for the
    /// duration of the host scan.
    pub fn refresh_plugins(&self) -> EngineResult<RefreshSummary> {
        Ok(self.cache.refresh_quick()?)
    }

    /// Fetch (or introspect) full details for one unit.
    pub fn get_plugin_details(&self, blueprint: &PluginBlueprint) -> EngineResult<PluginRecord> {
        self.handle
            .block_on(self.cache.get_details(blueprint))
            .map_err(|e| EngineError::PluginLoad {
                key: blueprint.quadruplet(),
                reason: e.to_string(),
            })
    }

    /// Pre-introspect a set of units, e.g. ahead of a restore.
    pub fn warm_plugin_cache(&self, blueprints: &[PluginBlueprint]) {
        let _ = self.handle.block_on(self.cache.warm(blueprints));
    }

    // ---- persistence -------------------------------------------------------

    /// Serialize the session to a versioned JSON snapshot. Valid at any
    /// lifecycle stage.
    pub fn serialize(&self) -> EngineResult<String> {
        let model = self.model.read();
        SessionSnapshot::capture(&self.spec, self.state(), &model).to_json()
    }

    /// Restore a session from a snapshot produced by [`Session::serialize`].
    ///
    /// Missing devices, files, and plugins are reported as diagnostics and
    /// the affected channels restore non-ready. Returns an error only when
    /// the snapshot is unusable (version mismatch, parse failure) or nothing
    /// beyond the master could be restored.
    pub fn restore(json: &str, config: SessionConfig) -> EngineResult<(Self, Vec<Diagnostic>)> {
        let snapshot = SessionSnapshot::from_json(json)?;
        let mut diagnostics = Vec::new();

        // The master restores under its saved identifier; its chain is
        // re-instantiated through regular operations below.
        let mut master = snapshot.master.clone();
        let master_chain = std::mem::take(&mut master.plugin_chain.entries);
        master.header.ready = false;
        master.header.mixer_bus = None;
        let master_id = master.header.id;

        let session = Self::build(snapshot.audio_spec, master, config, Some(&mut diagnostics))?;

        let mut restored = 0usize;
        for channel in snapshot.channels_in_restore_order() {
            if session.restore_channel(channel, &mut diagnostics) {
                restored += 1;
            }
        }

        session.restore_chain(master_id, &master_chain, &mut diagnostics);

        for connection in &snapshot.connections {
            session.restore_connection(connection, &mut diagnostics);
        }

        if !snapshot.channels.is_empty() && restored == 0 {
            session.destroy();
            return Err(EngineError::GraphIncomplete(
                "no channel could be restored from the snapshot".into(),
            ));
        }

        if snapshot.state == SessionState::Running {
            match session
                .start()
                .and_then(OpHandle::wait)
            {
                Ok(()) => {}
                Err(e) => diagnostics.push(Diagnostic::new(
                    DiagnosticKind::StateDowngraded,
                    format!("snapshot was running, engine start failed: {e}"),
                )),
            }
        }

        let state = session.state();
        if state != snapshot.state {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::StateDowngraded,
                format!(
                    "restored to {state}, snapshot was taken in {}",
                    snapshot.state
                ),
            ));
        }

        info!(
            channels = restored,
            diagnostics = diagnostics.len(),
            "session restored"
        );
        Ok((session, diagnostics))
    }

    /// Recreate one saved channel. Returns whether the channel now exists.
    fn restore_channel(&self, channel: &Channel, diagnostics: &mut Vec<Diagnostic>) -> bool {
        let id = channel.id();
        let header = channel.header().clone();

        let spec = match channel {
            Channel::AudioInput(c) => {
                if !self.devices.is_audio_online(&c.device_uid) {
                    diagnostics.push(
                        Diagnostic::new(DiagnosticKind::DeviceOffline, "input device offline")
                            .with_channel(id)
                            .with_device(c.device_uid.clone()),
                    );
                }
                ChannelSpec::AudioInput {
                    id,
                    name: header.name.clone(),
                    device_uid: c.device_uid.clone(),
                    input_bus: c.input_bus,
                    volume: header.volume,
                    pan: c.pan,
                    allow_offline: true,
                }
            }
            Channel::MidiInput(c) => {
                if !self.devices.is_midi_online(&c.midi_device_uid) {
                    diagnostics.push(
                        Diagnostic::new(DiagnosticKind::DeviceOffline, "midi device offline")
                            .with_channel(id)
                            .with_device(c.midi_device_uid.clone()),
                    );
                }
                if let Some(path) = &c.soundbank_path {
                    if !std::path::Path::new(path).exists() {
                        diagnostics.push(
                            Diagnostic::new(DiagnosticKind::MissingFile, "soundbank missing")
                                .with_channel(id),
                        );
                    }
                }
                ChannelSpec::MidiInput {
                    id,
                    name: header.name.clone(),
                    midi_device_uid: c.midi_device_uid.clone(),
                    midi_channel: c.midi_channel,
                    soundbank_path: c.soundbank_path.clone(),
                    volume: header.volume,
                    pan: c.pan,
                    allow_offline: true,
                }
            }
            Channel::Playback(c) => {
                if !std::path::Path::new(&c.file_path).exists() {
                    diagnostics.push(
                        Diagnostic::new(DiagnosticKind::MissingFile, "playback file missing")
                            .with_channel(id),
                    );
                }
                ChannelSpec::Playback {
                    id,
                    name: header.name.clone(),
                    file_path: c.file_path.clone(),
                    can_loop: c.can_loop,
                    playback_rate: c.playback_rate,
                    pitch_shift_semitones: c.pitch_shift_semitones,
                    metronome: c.metronome,
                    volume: header.volume,
                    allow_missing: true,
                }
            }
            Channel::Aux(_) => ChannelSpec::Aux {
                id,
                name: header.name.clone(),
                volume: header.volume,
            },
            Channel::Master(_) => return false,
        };

        if let Err(e) = self
            .dispatcher
            .submit_and_wait(Operation::CreateChannel(Box::new(spec)))
        {
            warn!(channel = %id, error = %e, "channel restore failed");
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::DeviceOffline,
                    format!("channel could not be restored: {e}"),
                )
                .with_channel(id),
            );
            return false;
        }

        if header.muted {
            let _ = self
                .dispatcher
                .submit_and_wait(Operation::SetMute {
                    channel_id: id,
                    muted: true,
                });
        }

        if let Some(chain) = channel.plugin_chain() {
            self.restore_chain(id, &chain.entries, diagnostics);
        }
        true
    }

    /// Re-instantiate saved chain entries in order, mapping saved parameter
    /// values against the freshly introspected schema. Each entry is
    /// introspected once, here on the task pool; the operation receives the
    /// resolved record.
    fn restore_chain(
        &self,
        channel_id: ChannelId,
        entries: &[PluginInstance],
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        for (position, saved) in entries.iter().enumerate() {
            let key = saved.blueprint.quadruplet();
            let (record, parameters) =
                match self.handle.block_on(self.cache.get_details(&saved.blueprint)) {
                    Ok(record) => {
                        let (matched, dropped): (Vec<ParameterValue>, Vec<ParameterValue>) = saved
                            .parameters
                            .iter()
                            .copied()
                            .partition(|p| record.parameter(p.address).is_some());
                        for value in dropped {
                            debug!(key = %key, address = value.address, "saved parameter dropped");
                            diagnostics.push(
                                Diagnostic::new(
                                    DiagnosticKind::ParameterDropped,
                                    format!("parameter address {} no longer exists", value.address),
                                )
                                .with_channel(channel_id)
                                .with_plugin(key.clone()),
                            );
                        }
                        (Some(record), Some(matched))
                    }
                    Err(e) => {
                        diagnostics.push(
                            Diagnostic::new(
                                DiagnosticKind::PluginUnavailable,
                                format!("introspection failed: {e}"),
                            )
                            .with_channel(channel_id)
                            .with_plugin(key.clone()),
                        );
                        (None, Some(saved.parameters.clone()))
                    }
                };

            if let Err(e) = self.dispatcher.submit_and_wait(Operation::AddPlugin {
                channel_id,
                instance_id: saved.id,
                blueprint: saved.blueprint.clone(),
                position,
                bypassed: saved.bypassed,
                record,
                parameters,
            }) {
                warn!(key = %key, error = %e, "plugin restore failed");
                diagnostics.push(
                    Diagnostic::new(
                        DiagnosticKind::PluginUnavailable,
                        format!("plugin could not be restored: {e}"),
                    )
                    .with_channel(channel_id)
                    .with_plugin(key),
                );
            }
        }
    }

    fn restore_connection(&self, connection: &SavedConnection, diagnostics: &mut Vec<Diagnostic>) {
        let parsed = connection
            .from
            .parse::<ChannelId>()
            .and_then(|from| Ok((from, connection.to.parse::<ChannelId>()?)));
        let (from, to) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::StateDowngraded,
                    format!("unparseable connection ids: {e}"),
                ));
                return;
            }
        };
        if let Err(e) = self.dispatcher.submit_and_wait(Operation::AddAuxSend {
            channel_id: from,
            target_aux: to,
            level: connection.level,
            pre_fader: connection.pre_fader,
        }) {
            diagnostics.push(
                Diagnostic::new(
                    DiagnosticKind::StateDowngraded,
                    format!("aux send could not be restored: {e}"),
                )
                .with_channel(from),
            );
        }
    }

    // ---- teardown ----------------------------------------------------------

    /// Drain the dispatcher, stop the monitor, release the engine, and shut
    /// the task pool down. Idempotent; runs automatically on drop.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("destroying session");
        self.dispatcher.shutdown();
        self.monitor.lock().close();
        if self.running.swap(false, Ordering::AcqRel) {
            self.backend.stop();
        }
        self.backend.destroy();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(DESTROY_DEADLINE);
        }
    }

    /// Shared input-node table stats for a capture key: `(table_len, refs)`.
    pub fn input_sharing_stats(&self, device_uid: &str, input_bus: u32) -> (usize, u32) {
        let table = self.inputs.read();
        let key = (device_uid.to_string(), input_bus);
        (table.len(), table.refs_for(&key))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}
