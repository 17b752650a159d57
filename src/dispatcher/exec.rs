// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Operation execution against the live graph.
//!
//! Everything in this file runs on the dispatcher thread: it is the only
//! writer of the graph model and the input-node table. Each operation
//! executes to completion (including all backend edits) before the next is
//! dequeued; failures undo the resources the operation acquired and leave
//! the model as it was.

use super::{ChannelSpec, Operation};
use crate::backend::{params, AudioBackend, NodeRef, StreamFormat};
use crate::devices::DeviceDirectory;
use crate::error::{ConfigurationError, EngineError, EngineResult};
use crate::graph::channel::{
    validate_pan, validate_pitch_shift, validate_playback_rate, validate_send_level,
    validate_volume,
};
use crate::graph::{
    AudioInputChannel, AuxChannel, AuxSend, Channel, ChannelHeader, GraphModel, InputNodeTable,
    MidiInputChannel, PlaybackChannel, PluginChain, PluginInstance, ReleaseOutcome,
};
use crate::ids::ChannelId;
use crate::plugins::{ParameterValue, PluginRecord};
use crate::spec::AudioSpec;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tap key used for master metering.
pub(crate) const MASTER_TAP_KEY: &str = "master-meter";

/// Shared state the executor operates on. Constructed by the session,
/// handed to the dispatcher thread.
///
/// Deliberately excludes the plugin cache and the task pool: operations
/// must stay short, so anything introspection-bound is resolved by the
/// submitter before the operation is enqueued.
pub(crate) struct ExecContext {
    pub spec: AudioSpec,
    pub model: Arc<RwLock<GraphModel>>,
    pub inputs: Arc<RwLock<InputNodeTable>>,
    pub backend: Arc<dyn AudioBackend>,
    pub devices: Arc<DeviceDirectory>,
    pub running: Arc<AtomicBool>,
}

impl ExecContext {
    fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.spec.sample_rate,
            channel_count: self.spec.channel_count,
        }
    }

    pub(crate) fn execute(&self, op: Operation) -> EngineResult<()> {
        debug!(op = op.name(), "executing operation");
        let result = match op {
            Operation::StartEngine => self.exec_start(),
            Operation::StopEngine => self.exec_stop(),
            Operation::SetMute { channel_id, muted } => self.exec_set_mute(channel_id, muted),
            Operation::PluginBypass {
                channel_id,
                plugin_id,
                bypassed,
            } => self.exec_plugin_bypass(channel_id, plugin_id, bypassed),
            Operation::AddPlugin {
                channel_id,
                instance_id,
                blueprint,
                position,
                bypassed,
                record,
                parameters,
            } => self.exec_add_plugin(
                channel_id,
                instance_id,
                blueprint,
                position,
                bypassed,
                record,
                parameters,
            ),
            Operation::RemovePlugin {
                channel_id,
                plugin_id,
            } => self.exec_remove_plugin(channel_id, plugin_id),
            Operation::ReorderPlugin {
                channel_id,
                from,
                to,
            } => self.exec_reorder_plugin(channel_id, from, to),
            Operation::DeviceChange {
                channel_id,
                new_device_uid,
            } => self.exec_device_change(channel_id, new_device_uid),
            Operation::OutputDeviceChange { new_device_uid } => {
                self.exec_output_device_change(new_device_uid)
            }
            Operation::CreateChannel(spec) => self.exec_create_channel(*spec),
            Operation::DeleteChannel { channel_id } => self.exec_delete_channel(channel_id),
            Operation::AddAuxSend {
                channel_id,
                target_aux,
                level,
                pre_fader,
            } => self.exec_add_aux_send(channel_id, target_aux, level, pre_fader),
            Operation::RemoveAuxSend {
                channel_id,
                target_aux,
            } => self.exec_remove_aux_send(channel_id, target_aux),
        };

        // Readiness is derived state; keep it current after every edit so
        // readers never observe a stale flag.
        self.model.write().refresh_readiness(&self.devices);
        result
    }

    // ---- engine lifecycle ------------------------------------------------

    fn exec_start(&self) -> EngineResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(ConfigurationError::AlreadyRunning.into());
        }
        {
            let mut model = self.model.write();
            model.refresh_readiness(&self.devices);
            if !model.any_ready_non_master() {
                return Err(EngineError::GraphIncomplete(
                    "no ready channel reaches the master output".into(),
                ));
            }
        }
        self.backend
            .prepare()
            .map_err(|e| EngineError::framework("prepare", e.to_string()))?;
        self.backend
            .start()
            .map_err(|e| EngineError::framework("start", e.to_string()))?;

        let metering = self.model.read().master().metering_enabled;
        if metering {
            if let Err(e) =
                self.backend
                    .install_tap(self.backend.output_node(), 0, MASTER_TAP_KEY)
            {
                warn!(error = %e, "master meter tap install failed");
            }
        }
        self.running.store(true, Ordering::Release);
        debug!("engine started");
        Ok(())
    }

    fn exec_stop(&self) -> EngineResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ConfigurationError::NotRunning.into());
        }
        self.backend.remove_tap(MASTER_TAP_KEY);
        self.backend.stop();
        self.running.store(false, Ordering::Release);
        debug!("engine stopped");
        Ok(())
    }

    // ---- header / routing edits ------------------------------------------

    fn exec_set_mute(&self, channel_id: ChannelId, muted: bool) -> EngineResult<()> {
        let mut model = self.model.write();
        {
            let channel = model.require_mut(channel_id)?;
            channel.header_mut().muted = muted;
        }
        self.rewire_channel(&mut model, channel_id)
    }

    fn exec_plugin_bypass(
        &self,
        channel_id: ChannelId,
        plugin_id: crate::ids::PluginInstanceId,
        bypassed: bool,
    ) -> EngineResult<()> {
        let mut model = self.model.write();
        {
            let channel = model.require_mut(channel_id)?;
            let chain = channel
                .plugin_chain_mut()
                .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
            let instance = chain
                .get_mut(plugin_id)
                .ok_or(ConfigurationError::PluginNotFound)?;
            instance.bypassed = bypassed;
        }
        self.rewire_channel(&mut model, channel_id)
    }

    fn exec_add_plugin(
        &self,
        channel_id: ChannelId,
        instance_id: crate::ids::PluginInstanceId,
        blueprint: crate::plugins::PluginBlueprint,
        position: usize,
        bypassed: bool,
        record: Option<PluginRecord>,
        parameters: Option<Vec<ParameterValue>>,
    ) -> EngineResult<()> {
        {
            let model = self.model.read();
            let channel = model.require(channel_id)?;
            let chain = channel
                .plugin_chain()
                .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
            if position > chain.len() {
                return Err(ConfigurationError::PositionOutOfBounds {
                    position,
                    len: chain.len(),
                }
                .into());
            }
        }

        let mut instance = PluginInstance::new(instance_id, blueprint.clone());
        instance.bypassed = bypassed;

        // The introspection already ran on the task pool; this path only
        // does graph work. A missing record retains the slot with
        // is_installed = false, and the operation itself still succeeds.
        match record {
            Some(record) => match self.backend.new_audio_unit(&blueprint) {
                Ok(node) => {
                    if let Err(e) = self.backend.attach(node) {
                        self.backend.release_node(node);
                        return Err(EngineError::framework("attach unit", e.to_string()));
                    }
                    instance.node = Some(node);
                    instance.is_installed = true;

                    let values: Vec<ParameterValue> = match parameters {
                        Some(saved) => saved,
                        None => record
                            .parameters
                            .iter()
                            .map(|p| ParameterValue {
                                address: p.address,
                                current_value: p.default_value,
                            })
                            .collect(),
                    };
                    for value in &values {
                        self.backend
                            .set_parameter(node, value.address, value.current_value);
                    }
                    instance.parameters = values;
                }
                Err(e) => {
                    warn!(key = %blueprint.quadruplet(), error = %e, "unit instantiation failed");
                    instance.parameters = parameters.unwrap_or_default();
                }
            },
            None => {
                instance.parameters = parameters.unwrap_or_default();
            }
        }

        let mut model = self.model.write();
        {
            let channel = model.require_mut(channel_id)?;
            let chain = channel
                .plugin_chain_mut()
                .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
            chain.insert(position, instance);
        }
        self.rewire_channel(&mut model, channel_id)
    }

    fn exec_remove_plugin(
        &self,
        channel_id: ChannelId,
        plugin_id: crate::ids::PluginInstanceId,
    ) -> EngineResult<()> {
        let mut model = self.model.write();
        let removed = {
            let channel = model.require_mut(channel_id)?;
            let chain = channel
                .plugin_chain_mut()
                .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
            chain
                .remove(plugin_id)
                .ok_or(ConfigurationError::PluginNotFound)?
        };
        if let Some(node) = removed.node {
            self.backend.detach(node);
            self.backend.release_node(node);
        }
        self.rewire_channel(&mut model, channel_id)
    }

    fn exec_reorder_plugin(
        &self,
        channel_id: ChannelId,
        from: usize,
        to: usize,
    ) -> EngineResult<()> {
        let mut model = self.model.write();
        {
            let channel = model.require_mut(channel_id)?;
            let chain = channel
                .plugin_chain_mut()
                .ok_or(ConfigurationError::NoPluginChain(channel_id))?;
            let len = chain.len();
            if !chain.reorder(from, to) {
                return Err(ConfigurationError::PositionOutOfBounds {
                    position: from.max(to),
                    len,
                }
                .into());
            }
        }
        self.rewire_channel(&mut model, channel_id)
    }

    fn exec_device_change(
        &self,
        channel_id: ChannelId,
        new_device_uid: String,
    ) -> EngineResult<()> {
        let mut model = self.model.write();
        let (old_key, input_bus) = {
            let channel = model.require(channel_id)?;
            match channel {
                Channel::AudioInput(c) => ((c.device_uid.clone(), c.input_bus), c.input_bus),
                other => {
                    return Err(ConfigurationError::UnsupportedForChannelKind {
                        kind: other.kind_name(),
                    }
                    .into())
                }
            }
        };

        if !self.devices.is_audio_online(&new_device_uid) {
            return Err(EngineError::DeviceOffline {
                uid: new_device_uid,
            });
        }

        // Acquire the new node before touching the old one so a failure
        // leaves the channel untouched.
        let new_key = (new_device_uid.clone(), input_bus);
        let new_node = self.acquire_input_node(&new_key)?;

        {
            let channel = model.require_mut(channel_id)?;
            if let Channel::AudioInput(c) = channel {
                c.device_uid = new_device_uid;
                c.input_node = Some(new_node);
            }
        }
        self.release_input_node(&old_key);
        self.rewire_channel(&mut model, channel_id)
    }

    fn exec_output_device_change(&self, new_device_uid: String) -> EngineResult<()> {
        let device = self
            .devices
            .audio_device(&new_device_uid)
            .ok_or_else(|| ConfigurationError::UnknownDevice(new_device_uid.clone()))?;
        if !device.is_online {
            return Err(EngineError::DeviceOffline {
                uid: new_device_uid,
            });
        }
        // No engine restart: the mixer -> output edge is preserved by the
        // backend across the rebind.
        self.backend
            .set_output_device(&new_device_uid)
            .map_err(|e| EngineError::framework("output rebind", e.to_string()))?;
        self.model.write().master_mut().output_device_uid = new_device_uid;
        Ok(())
    }

    // ---- channel creation -------------------------------------------------

    fn exec_create_channel(&self, spec: ChannelSpec) -> EngineResult<()> {
        match spec {
            ChannelSpec::AudioInput {
                id,
                name,
                device_uid,
                input_bus,
                volume,
                pan,
                allow_offline,
            } => self.create_audio_input(id, name, device_uid, input_bus, volume, pan, allow_offline),
            ChannelSpec::MidiInput {
                id,
                name,
                midi_device_uid,
                midi_channel,
                soundbank_path,
                volume,
                pan,
                allow_offline,
            } => self.create_midi_input(
                id,
                name,
                midi_device_uid,
                midi_channel,
                soundbank_path,
                volume,
                pan,
                allow_offline,
            ),
            ChannelSpec::Playback {
                id,
                name,
                file_path,
                can_loop,
                playback_rate,
                pitch_shift_semitones,
                metronome,
                volume,
                allow_missing,
            } => self.create_playback(
                id,
                name,
                file_path,
                can_loop,
                playback_rate,
                pitch_shift_semitones,
                metronome,
                volume,
                allow_missing,
            ),
            ChannelSpec::Aux { id, name, volume } => self.create_aux(id, name, volume),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn create_audio_input(
        &self,
        id: ChannelId,
        name: String,
        device_uid: String,
        input_bus: u32,
        volume: f32,
        pan: f32,
        allow_offline: bool,
    ) -> EngineResult<()> {
        validate_volume(volume)?;
        validate_pan(pan)?;

        let online = self.devices.is_audio_online(&device_uid);
        if !online && !allow_offline {
            return Err(EngineError::DeviceOffline { uid: device_uid });
        }

        let key = (device_uid.clone(), input_bus);
        let input_node = if online {
            Some(self.acquire_input_node(&key)?)
        } else {
            None
        };

        let mut channel = AudioInputChannel {
            header: ChannelHeader::new(id, name, volume),
            device_uid,
            input_bus,
            pan,
            plugin_chain: PluginChain::new(),
            aux_sends: Vec::new(),
            input_node,
        };

        let mut model = self.model.write();
        let mixer_bus = model.allocate_mixer_bus();
        channel.header.mixer_bus = Some(mixer_bus);
        self.apply_fader(mixer_bus, volume, pan);

        model.insert(Channel::AudioInput(channel));
        if let Err(e) = self.rewire_channel(&mut model, id) {
            // Undo: drop the record and the input ref we acquired.
            let _ = model.remove(id);
            self.release_input_node(&key);
            return Err(e);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_midi_input(
        &self,
        id: ChannelId,
        name: String,
        midi_device_uid: String,
        midi_channel: u8,
        soundbank_path: Option<String>,
        volume: f32,
        pan: f32,
        allow_offline: bool,
    ) -> EngineResult<()> {
        validate_volume(volume)?;
        validate_pan(pan)?;
        if midi_channel > 15 {
            return Err(ConfigurationError::ValueOutOfRange {
                field: "midi channel",
                value: midi_channel as f64,
                min: 0.0,
                max: 15.0,
            }
            .into());
        }

        if !self.devices.is_midi_online(&midi_device_uid) && !allow_offline {
            return Err(EngineError::DeviceOffline {
                uid: midi_device_uid,
            });
        }

        // The synth node exists only once a soundbank is loaded; without one
        // the channel is recorded but not ready.
        let synth_node = match &soundbank_path {
            Some(path) if std::path::Path::new(path).exists() => {
                let node = self
                    .backend
                    .new_midi_synth_node(path)
                    .map_err(|e| EngineError::framework("synth node", e.to_string()))?;
                if let Err(e) = self.backend.attach(node) {
                    self.backend.release_node(node);
                    return Err(EngineError::framework("attach synth", e.to_string()));
                }
                Some(node)
            }
            Some(path) => {
                if !allow_offline {
                    return Err(ConfigurationError::FileNotFound(path.clone()).into());
                }
                None
            }
            None => None,
        };

        let mut channel = MidiInputChannel {
            header: ChannelHeader::new(id, name, volume),
            midi_device_uid,
            midi_channel,
            soundbank_path,
            pan,
            plugin_chain: PluginChain::new(),
            aux_sends: Vec::new(),
            synth_node,
        };

        let mut model = self.model.write();
        let mixer_bus = model.allocate_mixer_bus();
        channel.header.mixer_bus = Some(mixer_bus);
        self.apply_fader(mixer_bus, volume, pan);
        model.insert(Channel::MidiInput(channel));
        if let Err(e) = self.rewire_channel(&mut model, id) {
            let _ = model.remove(id);
            if let Some(node) = synth_node {
                self.backend.detach(node);
                self.backend.release_node(node);
            }
            return Err(e);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_playback(
        &self,
        id: ChannelId,
        name: String,
        file_path: String,
        can_loop: bool,
        playback_rate: f32,
        pitch_shift_semitones: f32,
        metronome: Option<crate::graph::MetronomeConfig>,
        volume: f32,
        allow_missing: bool,
    ) -> EngineResult<()> {
        validate_volume(volume)?;
        validate_playback_rate(playback_rate)?;
        validate_pitch_shift(pitch_shift_semitones)?;
        if let Some(config) = &metronome {
            config.validate()?;
        }

        let file_exists = std::path::Path::new(&file_path).exists();
        if !file_exists && !allow_missing {
            return Err(ConfigurationError::FileNotFound(file_path).into());
        }

        let (player_node, pitch_node) = if file_exists {
            let player = self
                .backend
                .new_player_node(&file_path)
                .map_err(|e| EngineError::framework("player node", e.to_string()))?;
            let pitch = match self.backend.new_time_pitch_node() {
                Ok(node) => node,
                Err(e) => {
                    self.backend.release_node(player);
                    return Err(EngineError::framework("time-pitch node", e.to_string()));
                }
            };
            for node in [player, pitch] {
                if let Err(e) = self.backend.attach(node) {
                    self.backend.detach(player);
                    self.backend.release_node(player);
                    self.backend.release_node(pitch);
                    return Err(EngineError::framework("attach playback", e.to_string()));
                }
            }
            if let Err(e) = self
                .backend
                .connect(player, pitch, 0, 0, &self.format())
            {
                self.backend.detach(player);
                self.backend.detach(pitch);
                self.backend.release_node(player);
                self.backend.release_node(pitch);
                return Err(EngineError::framework("wire playback", e.to_string()));
            }
            self.backend
                .set_parameter(pitch, params::PLAYBACK_RATE, playback_rate);
            self.backend
                .set_parameter(pitch, params::PITCH_SHIFT, pitch_shift_semitones);
            (Some(player), Some(pitch))
        } else {
            (None, None)
        };

        let mut channel = PlaybackChannel {
            header: ChannelHeader::new(id, name, volume),
            file_path,
            can_loop,
            playback_rate,
            pitch_shift_semitones,
            metronome,
            player_node,
            pitch_node,
        };

        let mut model = self.model.write();
        let mixer_bus = model.allocate_mixer_bus();
        channel.header.mixer_bus = Some(mixer_bus);
        // Playback keeps its stereo image: gain only, no pan.
        self.backend.set_parameter(
            self.backend.main_mixer_node(),
            params::BUS_GAIN_BASE + mixer_bus as u64,
            volume,
        );
        model.insert(Channel::Playback(channel));
        if let Err(e) = self.rewire_channel(&mut model, id) {
            let _ = model.remove(id);
            for node in [player_node, pitch_node].into_iter().flatten() {
                self.backend.detach(node);
                self.backend.release_node(node);
            }
            return Err(e);
        }
        Ok(())
    }

    fn create_aux(&self, id: ChannelId, name: String, volume: f32) -> EngineResult<()> {
        validate_volume(volume)?;

        let bus_node = self
            .backend
            .new_mixer_node()
            .map_err(|e| EngineError::framework("aux bus node", e.to_string()))?;
        if let Err(e) = self.backend.attach(bus_node) {
            self.backend.release_node(bus_node);
            return Err(EngineError::framework("attach aux bus", e.to_string()));
        }

        let mut channel = AuxChannel {
            header: ChannelHeader::new(id, name, volume),
            plugin_chain: PluginChain::new(),
            bus_node: Some(bus_node),
            next_input_bus: 0,
        };

        let mut model = self.model.write();
        let mixer_bus = model.allocate_mixer_bus();
        channel.header.mixer_bus = Some(mixer_bus);
        self.backend.set_parameter(
            self.backend.main_mixer_node(),
            params::BUS_GAIN_BASE + mixer_bus as u64,
            volume,
        );
        model.insert(Channel::Aux(channel));
        if let Err(e) = self.rewire_channel(&mut model, id) {
            let _ = model.remove(id);
            self.backend.detach(bus_node);
            self.backend.release_node(bus_node);
            return Err(e);
        }
        Ok(())
    }

    // ---- deletion ---------------------------------------------------------

    fn exec_delete_channel(&self, channel_id: ChannelId) -> EngineResult<()> {
        let mut model = self.model.write();
        if channel_id == model.master_id() {
            return Err(ConfigurationError::CannotDeleteMaster.into());
        }

        // Aux teardown removes every inbound send first, within the same
        // operation, so no dangling send ever survives the delete.
        if model.is_aux(channel_id) {
            let senders = model.senders_to(channel_id);
            for sender in senders {
                self.remove_send(&mut model, sender, channel_id)?;
            }
        }

        let removed = model.remove(channel_id)?;

        // Drop outbound sends' edges on their target aux busses.
        if let Some(sends) = removed.aux_sends() {
            for send in sends {
                if let (Some(bus), Some(Channel::Aux(aux))) =
                    (send.bus, model.channel(send.target_aux))
                {
                    if let Some(bus_node) = aux.bus_node {
                        self.backend.disconnect_input(bus_node, bus);
                    }
                }
            }
        }

        // Detach the channel's own edge into the mix.
        if let Some(bus) = removed.header().mixer_bus {
            self.backend
                .disconnect_input(self.backend.main_mixer_node(), bus);
        }

        // Free chain unit nodes.
        if let Some(chain) = removed.plugin_chain() {
            for instance in &chain.entries {
                if let Some(node) = instance.node {
                    self.backend.detach(node);
                    self.backend.release_node(node);
                }
            }
        }

        // Variant-specific node teardown.
        match &removed {
            Channel::AudioInput(c) => {
                if c.input_node.is_some() {
                    self.release_input_node(&(c.device_uid.clone(), c.input_bus));
                }
            }
            Channel::MidiInput(c) => {
                if let Some(node) = c.synth_node {
                    self.backend.detach(node);
                    self.backend.release_node(node);
                }
            }
            Channel::Playback(c) => {
                for node in [c.player_node, c.pitch_node].into_iter().flatten() {
                    self.backend.detach(node);
                    self.backend.release_node(node);
                }
            }
            Channel::Aux(c) => {
                if let Some(node) = c.bus_node {
                    self.backend.detach(node);
                    self.backend.release_node(node);
                }
            }
            Channel::Master(_) => unreachable!("master delete rejected above"),
        }

        debug!(id = %channel_id, "channel deleted");
        Ok(())
    }

    // ---- aux sends --------------------------------------------------------

    fn exec_add_aux_send(
        &self,
        channel_id: ChannelId,
        target_aux: ChannelId,
        level: f32,
        pre_fader: bool,
    ) -> EngineResult<()> {
        validate_send_level(level)?;

        let mut model = self.model.write();
        if !model.require(target_aux)?.is_aux() {
            return Err(ConfigurationError::NotAnAux(target_aux).into());
        }
        {
            let channel = model.require(channel_id)?;
            if channel.is_aux() {
                return Err(ConfigurationError::NestedAuxSend.into());
            }
            let sends = channel.aux_sends().ok_or(
                ConfigurationError::UnsupportedForChannelKind {
                    kind: channel.kind_name(),
                },
            )?;
            if sends.iter().any(|s| s.target_aux == target_aux) {
                return Err(ConfigurationError::DuplicateAuxSend(target_aux).into());
            }
        }

        // Allocate an input bus on the aux and wire the tap.
        let (bus_node, bus) = {
            let aux = match model.require_mut(target_aux)? {
                Channel::Aux(aux) => aux,
                _ => unreachable!("checked above"),
            };
            let bus = aux.next_input_bus;
            aux.next_input_bus += 1;
            (aux.bus_node, bus)
        };

        let channel = model.require(channel_id)?;
        let tap = if pre_fader {
            channel.source_node()
        } else {
            channel.output_node()
        };
        let gated = channel.header().muted && !pre_fader;

        if let (Some(tap), Some(bus_node)) = (tap, bus_node) {
            if !gated {
                self.backend
                    .connect(tap, bus_node, 0, bus, &self.format())
                    .map_err(|e| EngineError::framework("wire send", e.to_string()))?;
            }
            self.backend
                .set_parameter(bus_node, params::BUS_GAIN_BASE + bus as u64, level);
        }

        let channel = model.require_mut(channel_id)?;
        if let Some(sends) = channel.aux_sends_mut() {
            sends.push(AuxSend {
                target_aux,
                level,
                pre_fader,
                bus: Some(bus),
            });
        }
        Ok(())
    }

    fn exec_remove_aux_send(
        &self,
        channel_id: ChannelId,
        target_aux: ChannelId,
    ) -> EngineResult<()> {
        let mut model = self.model.write();
        self.remove_send(&mut model, channel_id, target_aux)
    }

    fn remove_send(
        &self,
        model: &mut GraphModel,
        channel_id: ChannelId,
        target_aux: ChannelId,
    ) -> EngineResult<()> {
        let send = {
            let kind = model.require(channel_id)?.kind_name();
            let channel = model.require_mut(channel_id)?;
            let sends = channel
                .aux_sends_mut()
                .ok_or(ConfigurationError::UnsupportedForChannelKind { kind })?;
            let position = sends
                .iter()
                .position(|s| s.target_aux == target_aux)
                .ok_or(ConfigurationError::SendNotFound(target_aux))?;
            sends.remove(position)
        };

        if let (Some(bus), Some(Channel::Aux(aux))) = (send.bus, model.channel(target_aux)) {
            if let Some(bus_node) = aux.bus_node {
                self.backend.disconnect_input(bus_node, bus);
            }
        }
        Ok(())
    }

    // ---- wiring helpers ---------------------------------------------------

    /// Set the channel fader and pan on its main-mix input bus.
    fn apply_fader(&self, mixer_bus: u32, volume: f32, pan: f32) {
        let mixer = self.backend.main_mixer_node();
        self.backend
            .set_parameter(mixer, params::BUS_GAIN_BASE + mixer_bus as u64, volume);
        self.backend
            .set_parameter(mixer, params::BUS_PAN_BASE + mixer_bus as u64, pan);
    }

    /// Look up or allocate the shared input node for a capture key.
    fn acquire_input_node(&self, key: &(String, u32)) -> EngineResult<NodeRef> {
        let mut inputs = self.inputs.write();
        if let Some(node) = inputs.acquire_existing(key) {
            return Ok(node);
        }
        let node = self
            .backend
            .input_node(&key.0, key.1)
            .map_err(|e| EngineError::framework("input node", e.to_string()))?;
        if let Err(e) = self.backend.attach(node) {
            self.backend.release_node(node);
            return Err(EngineError::framework("attach input", e.to_string()));
        }
        inputs.insert_new(key.clone(), node);
        Ok(node)
    }

    /// Drop one reference; detach and free the node when it was the last.
    fn release_input_node(&self, key: &(String, u32)) {
        let outcome = self.inputs.write().release(key);
        if let ReleaseOutcome::Freed(node) = outcome {
            self.backend.detach(node);
            self.backend.release_node(node);
        }
    }

    /// Rebuild the edge run for one channel: source through active chain
    /// units into its mix bus, honoring mute, then refresh its send taps.
    ///
    /// Master channels rewire mixer -> chain -> output instead.
    fn rewire_channel(&self, model: &mut GraphModel, channel_id: ChannelId) -> EngineResult<()> {
        let channel = model.require(channel_id)?.clone();
        let format = self.format();

        if let Channel::Master(master) = &channel {
            let output = self.backend.output_node();
            let mixer = self.backend.main_mixer_node();
            self.backend.disconnect_input(output, 0);
            let mut upstream = mixer;
            for node in master.plugin_chain.active_nodes() {
                self.backend.disconnect_input(node, 0);
                self.backend
                    .connect(upstream, node, 0, 0, &format)
                    .map_err(|e| EngineError::framework("wire master chain", e.to_string()))?;
                upstream = node;
            }
            self.backend
                .connect(upstream, output, 0, 0, &format)
                .map_err(|e| EngineError::framework("wire master output", e.to_string()))?;
            return Ok(());
        }

        let mixer = self.backend.main_mixer_node();
        let Some(mixer_bus) = channel.header().mixer_bus else {
            return Ok(());
        };
        self.backend.disconnect_input(mixer, mixer_bus);

        let Some(source) = channel.source_node() else {
            // Channel has no live source (offline device, missing file):
            // nothing to wire, sends stay silent.
            return Ok(());
        };

        // Chain-internal edges.
        let active = channel
            .plugin_chain()
            .map(|c| c.active_nodes())
            .unwrap_or_default();
        let mut upstream = source;
        for node in &active {
            self.backend.disconnect_input(*node, 0);
            self.backend
                .connect(upstream, *node, 0, 0, &format)
                .map_err(|e| EngineError::framework("wire chain", e.to_string()))?;
            upstream = *node;
        }

        // Mute gates the node: no edge into the mix while muted.
        if !channel.header().muted {
            self.backend
                .connect(upstream, mixer, 0, mixer_bus, &format)
                .map_err(|e| EngineError::framework("wire mix", e.to_string()))?;
        }

        // Send taps follow the (possibly changed) output node.
        if let Some(sends) = channel.aux_sends() {
            for send in sends {
                let Some(bus) = send.bus else { continue };
                let Some(Channel::Aux(aux)) = model.channel(send.target_aux) else {
                    continue;
                };
                let Some(bus_node) = aux.bus_node else { continue };
                self.backend.disconnect_input(bus_node, bus);
                let tap = if send.pre_fader { source } else { upstream };
                let gated = channel.header().muted && !send.pre_fader;
                if !gated {
                    self.backend
                        .connect(tap, bus_node, 0, bus, &format)
                        .map_err(|e| EngineError::framework("wire send", e.to_string()))?;
                }
            }
        }
        Ok(())
    }
}
