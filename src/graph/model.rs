// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The channel table and graph-level invariants.
//!
//! `GraphModel` is mutated exclusively from the dispatcher thread; readers
//! take the read side of the session's lock and receive cloned snapshots.

use super::channel::{Channel, MasterChannel};
use crate::devices::DeviceDirectory;
use crate::error::ConfigurationError;
use crate::ids::ChannelId;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug)]
pub struct GraphModel {
    channels: HashMap<ChannelId, Channel>,
    master_id: ChannelId,
    /// Next free input bus on the main mix node. Runtime-only; rebuilt as
    /// channels re-attach on restore.
    next_mixer_bus: u32,
}

impl GraphModel {
    pub fn new(master: MasterChannel) -> Self {
        let master_id = master.header.id;
        let mut channels = HashMap::new();
        channels.insert(master_id, Channel::Master(master));
        Self {
            channels,
            master_id,
            next_mixer_bus: 0,
        }
    }

    pub fn master_id(&self) -> ChannelId {
        self.master_id
    }

    pub fn master(&self) -> &MasterChannel {
        match self.channels.get(&self.master_id) {
            Some(Channel::Master(m)) => m,
            // The master is inserted at construction and never removed.
            _ => unreachable!("master channel missing from model"),
        }
    }

    pub fn master_mut(&mut self) -> &mut MasterChannel {
        match self.channels.get_mut(&self.master_id) {
            Some(Channel::Master(m)) => m,
            _ => unreachable!("master channel missing from model"),
        }
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn require(&self, id: ChannelId) -> Result<&Channel, ConfigurationError> {
        self.channels
            .get(&id)
            .ok_or(ConfigurationError::ChannelNotFound(id))
    }

    pub fn require_mut(&mut self, id: ChannelId) -> Result<&mut Channel, ConfigurationError> {
        self.channels
            .get_mut(&id)
            .ok_or(ConfigurationError::ChannelNotFound(id))
    }

    pub fn insert(&mut self, channel: Channel) {
        trace!(id = %channel.id(), kind = channel.kind_name(), "channel registered");
        self.channels.insert(channel.id(), channel);
    }

    /// Remove a non-master channel record.
    pub fn remove(&mut self, id: ChannelId) -> Result<Channel, ConfigurationError> {
        if id == self.master_id {
            return Err(ConfigurationError::CannotDeleteMaster);
        }
        self.channels
            .remove(&id)
            .ok_or(ConfigurationError::ChannelNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }

    pub fn non_master_count(&self) -> usize {
        self.channels.len() - 1
    }

    /// Cloned snapshot of every channel, master first, then by name for a
    /// stable presentation order.
    pub fn channels_snapshot(&self) -> Vec<Channel> {
        let mut list: Vec<Channel> = self.channels.values().cloned().collect();
        let master_id = self.master_id;
        list.sort_by(|a, b| {
            (a.id() != master_id, a.name().to_string()).cmp(&(b.id() != master_id, b.name().to_string()))
        });
        list
    }

    pub fn is_aux(&self, id: ChannelId) -> bool {
        self.channels.get(&id).map(|c| c.is_aux()).unwrap_or(false)
    }

    /// All channels currently holding a send to `aux`.
    pub fn senders_to(&self, aux: ChannelId) -> Vec<ChannelId> {
        self.channels
            .values()
            .filter(|c| {
                c.aux_sends()
                    .map(|sends| sends.iter().any(|s| s.target_aux == aux))
                    .unwrap_or(false)
            })
            .map(|c| c.id())
            .collect()
    }

    pub fn allocate_mixer_bus(&mut self) -> u32 {
        let bus = self.next_mixer_bus;
        self.next_mixer_bus += 1;
        bus
    }

    /// Recompute the derived `ready` flag for every channel.
    ///
    /// Ready means: referenced device exists and is online, MIDI channels
    /// have a soundbank, playback channels a readable file, and every chain
    /// entry is installed or bypassed.
    pub fn refresh_readiness(&mut self, devices: &DeviceDirectory) {
        for channel in self.channels.values_mut() {
            let ready = channel_ready(channel, devices);
            channel.header_mut().ready = ready;
        }
    }

    /// At least one non-master channel is ready and wired into the mix.
    pub fn any_ready_non_master(&self) -> bool {
        self.channels
            .values()
            .any(|c| !c.is_master() && c.header().ready)
    }
}

fn channel_ready(channel: &Channel, devices: &DeviceDirectory) -> bool {
    let chain_ok = channel
        .plugin_chain()
        .map(|chain| chain.all_installed_or_bypassed())
        .unwrap_or(true);
    if !chain_ok {
        return false;
    }
    match channel {
        Channel::AudioInput(c) => devices.is_audio_online(&c.device_uid) && c.input_node.is_some(),
        Channel::MidiInput(c) => {
            devices.is_midi_online(&c.midi_device_uid)
                && c.soundbank_path.is_some()
                && c.synth_node.is_some()
        }
        Channel::Playback(c) => {
            std::path::Path::new(&c.file_path).exists() && c.player_node.is_some()
        }
        Channel::Aux(c) => c.bus_node.is_some(),
        Channel::Master(c) => devices.is_audio_online(&c.output_device_uid),
    }
}
