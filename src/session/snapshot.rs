// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Versioned session snapshots.
//!
//! A snapshot is a single JSON document capturing the audio spec, the
//! master, every channel, and the aux-send edges as explicit connections.
//! Live engine handles are never serialized; restore re-acquires every
//! resource, which is why a snapshot can be taken at any lifecycle stage.

use crate::error::{EngineError, EngineResult};
use crate::graph::{Channel, GraphModel, MasterChannel};
use crate::spec::AudioSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshot format version. Restore requires an exact match; there is no
/// automatic migration.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

/// Session lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    MasterReady,
    ChannelsReady,
    AudioGraphReady,
    Running,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::MasterReady => "master_ready",
            Self::ChannelsReady => "channels_ready",
            Self::AudioGraphReady => "audio_graph_ready",
            Self::Running => "running",
        };
        f.write_str(s)
    }
}

/// One aux-send edge, stored explicitly rather than inside the channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedConnection {
    /// Source channel id (string key form).
    pub from: String,
    /// Target aux channel id (string key form).
    pub to: String,
    pub level: f32,
    pub pre_fader: bool,
}

/// The versioned snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: String,
    pub audio_spec: AudioSpec,
    pub state: SessionState,
    pub master: MasterChannel,
    /// Non-master channels keyed by id string.
    pub channels: BTreeMap<String, Channel>,
    pub connections: Vec<SavedConnection>,
    pub timestamp: i64,
}

impl SessionSnapshot {
    /// Capture the current model. Aux sends are lifted out of the channels
    /// into the explicit connection list.
    pub(crate) fn capture(spec: &AudioSpec, state: SessionState, model: &GraphModel) -> Self {
        let master = model.master().clone();

        let mut channels = BTreeMap::new();
        let mut connections = Vec::new();
        for channel in model.iter() {
            if channel.is_master() {
                continue;
            }
            if let Some(sends) = channel.aux_sends() {
                for send in sends {
                    connections.push(SavedConnection {
                        from: channel.id().as_key(),
                        to: send.target_aux.as_key(),
                        level: send.level,
                        pre_fader: send.pre_fader,
                    });
                }
            }
            let mut saved = channel.clone();
            if let Some(sends) = saved.aux_sends_mut() {
                sends.clear();
            }
            channels.insert(saved.id().as_key(), saved);
        }
        connections.sort_by(|a, b| (a.from.clone(), a.to.clone()).cmp(&(b.from.clone(), b.to.clone())));

        Self {
            version: SNAPSHOT_VERSION.to_string(),
            audio_spec: *spec,
            state,
            master,
            channels,
            connections,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and verify the version stamp.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        // Peek the version before a full parse so a future format yields a
        // version error rather than a confusing field mismatch.
        #[derive(Deserialize)]
        struct VersionProbe {
            version: String,
        }
        let probe: VersionProbe = serde_json::from_str(json)?;
        if probe.version != SNAPSHOT_VERSION {
            return Err(EngineError::VersionMismatch {
                found: probe.version,
                expected: SNAPSHOT_VERSION.to_string(),
            });
        }
        let snapshot: Self = serde_json::from_str(json)?;
        snapshot.audio_spec.validate()?;
        Ok(snapshot)
    }

    /// Channels in restore order: non-aux first, then auxes, so every send
    /// target exists before the connection pass.
    pub(crate) fn channels_in_restore_order(&self) -> Vec<&Channel> {
        let mut ordered: Vec<&Channel> = Vec::with_capacity(self.channels.len());
        ordered.extend(self.channels.values().filter(|c| !c.is_aux()));
        ordered.extend(self.channels.values().filter(|c| c.is_aux()));
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::graph::channel::{AudioInputChannel, AuxChannel, AuxSend, ChannelHeader};
    use crate::graph::{Channel, GraphModel, MasterChannel, PluginChain};
    use crate::ids::ChannelId;
    use crate::spec::AudioSpec;

    fn model_with_send() -> (GraphModel, ChannelId, ChannelId) {
        let master = MasterChannel {
            header: ChannelHeader::new(ChannelId::new(), "master", 1.0),
            plugin_chain: PluginChain::new(),
            output_device_uid: "BuiltInSpeakerDevice".to_string(),
            metering_enabled: true,
        };
        let mut model = GraphModel::new(master);

        let aux_id = ChannelId::new();
        model.insert(Channel::Aux(AuxChannel {
            header: ChannelHeader::new(aux_id, "reverb", 1.0),
            plugin_chain: PluginChain::new(),
            bus_node: None,
            next_input_bus: 0,
        }));

        let mic_id = ChannelId::new();
        model.insert(Channel::AudioInput(AudioInputChannel {
            header: ChannelHeader::new(mic_id, "vocals", 0.8),
            device_uid: "BuiltInMicrophone".to_string(),
            input_bus: 0,
            pan: 0.0,
            plugin_chain: PluginChain::new(),
            aux_sends: vec![AuxSend {
                target_aux: aux_id,
                level: 0.3,
                pre_fader: false,
                bus: Some(0),
            }],
            input_node: None,
        }));
        (model, mic_id, aux_id)
    }

    #[test]
    fn test_capture_lifts_sends_into_connections() {
        let (model, mic_id, aux_id) = model_with_send();
        let snapshot =
            SessionSnapshot::capture(&AudioSpec::default(), SessionState::ChannelsReady, &model);

        assert_eq!(snapshot.connections.len(), 1);
        let edge = &snapshot.connections[0];
        assert_eq!(edge.from, mic_id.as_key());
        assert_eq!(edge.to, aux_id.as_key());
        assert_eq!(edge.level, 0.3);

        // Serialized channel carries no inline sends.
        let saved = &snapshot.channels[&mic_id.as_key()];
        assert!(saved.aux_sends().unwrap().is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let (model, mic_id, _) = model_with_send();
        let snapshot =
            SessionSnapshot::capture(&AudioSpec::default(), SessionState::ChannelsReady, &model);
        let json = snapshot.to_json().unwrap();
        let back = SessionSnapshot::from_json(&json).unwrap();

        assert_eq!(back.version, SNAPSHOT_VERSION);
        assert_eq!(back.state, SessionState::ChannelsReady);
        assert_eq!(back.channels.len(), 2);
        assert!(back.channels.contains_key(&mic_id.as_key()));
        assert_eq!(back.master.header.name, "master");
        assert!(back.master.metering_enabled);
    }

    #[test]
    fn test_version_mismatch_is_hard_failure() {
        let (model, _, _) = model_with_send();
        let snapshot =
            SessionSnapshot::capture(&AudioSpec::default(), SessionState::MasterReady, &model);
        let json = snapshot.to_json().unwrap().replace("1.0.0", "2.0.0");
        let err = SessionSnapshot::from_json(&json).unwrap_err();
        assert!(matches!(err, EngineError::VersionMismatch { .. }));
    }

    #[test]
    fn test_restore_order_puts_auxes_last() {
        let (model, _, aux_id) = model_with_send();
        let snapshot =
            SessionSnapshot::capture(&AudioSpec::default(), SessionState::ChannelsReady, &model);
        let ordered = snapshot.channels_in_restore_order();
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered.last().unwrap().id(), aux_id);
    }
}
