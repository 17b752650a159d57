// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Channel variants and their common header.
//!
//! The five variants share a header (volume, mute, derived readiness) and a
//! small capability set: pan exists on input channels only, plugin chains on
//! everything except playback, aux sends on input channels. Header-only
//! operations work uniformly across variants.

use super::chain::PluginChain;
use crate::backend::NodeRef;
use crate::error::ConfigurationError;
use crate::ids::ChannelId;
use serde::{Deserialize, Serialize};

/// State shared by every channel variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelHeader {
    pub id: ChannelId,
    pub name: String,
    /// Linear volume in `[0, 1]`.
    pub volume: f32,
    pub muted: bool,
    /// Derived: all device/soundbank/file prerequisites met and the graph
    /// edges this channel requires exist.
    pub ready: bool,
    /// Input bus assigned on the main mix node. Runtime-only.
    #[serde(skip)]
    pub mixer_bus: Option<u32>,
}

impl ChannelHeader {
    pub fn new(id: ChannelId, name: impl Into<String>, volume: f32) -> Self {
        Self {
            id,
            name: name.into(),
            volume,
            muted: false,
            ready: false,
            mixer_bus: None,
        }
    }
}

/// A parallel routing of a channel's signal into an aux bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxSend {
    pub target_aux: ChannelId,
    /// Send level in `[0, 1]`.
    pub level: f32,
    /// Tap before the channel fader instead of after.
    pub pre_fader: bool,
    /// Input bus assigned on the aux bus node. Runtime-only.
    #[serde(skip)]
    pub bus: Option<u32>,
}

/// Tempo ramp between two bpm values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoRamp {
    pub from: u32,
    pub to: u32,
    pub bars_per_step: u32,
    pub return_to_start: bool,
}

/// Metronome configuration for playback channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetronomeConfig {
    pub bpm: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ramp: Option<TempoRamp>,
}

impl MetronomeConfig {
    pub const MIN_BPM: u32 = 30;
    pub const MAX_BPM: u32 = 300;

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(Self::MIN_BPM..=Self::MAX_BPM).contains(&self.bpm) {
            return Err(ConfigurationError::InvalidBpm(self.bpm));
        }
        if let Some(ramp) = &self.ramp {
            for bpm in [ramp.from, ramp.to] {
                if !(Self::MIN_BPM..=Self::MAX_BPM).contains(&bpm) {
                    return Err(ConfigurationError::InvalidBpm(bpm));
                }
            }
        }
        Ok(())
    }
}

/// Microphone / instrument capture channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInputChannel {
    #[serde(flatten)]
    pub header: ChannelHeader,
    pub device_uid: String,
    pub input_bus: u32,
    /// Stereo position in `[-1, 1]`.
    pub pan: f32,
    pub plugin_chain: PluginChain,
    pub aux_sends: Vec<AuxSend>,
    /// Shared capture node from the input-node table. Runtime-only; the
    /// table owns the node, the channel references it by `(uid, bus)` key.
    #[serde(skip)]
    pub input_node: Option<NodeRef>,
}

/// MIDI-driven virtual instrument channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MidiInputChannel {
    #[serde(flatten)]
    pub header: ChannelHeader,
    pub midi_device_uid: String,
    /// MIDI channel 0-15.
    pub midi_channel: u8,
    pub soundbank_path: Option<String>,
    pub pan: f32,
    pub plugin_chain: PluginChain,
    pub aux_sends: Vec<AuxSend>,
    #[serde(skip)]
    pub synth_node: Option<NodeRef>,
}

/// File playback channel. No pan (stereo imaging preserved), no chain,
/// no sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackChannel {
    #[serde(flatten)]
    pub header: ChannelHeader,
    pub file_path: String,
    pub can_loop: bool,
    /// Playback rate in `[0.25, 2.0]`.
    pub playback_rate: f32,
    /// Pitch shift in `[-12, 12]` semitones.
    pub pitch_shift_semitones: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metronome: Option<MetronomeConfig>,
    #[serde(skip)]
    pub player_node: Option<NodeRef>,
    #[serde(skip)]
    pub pitch_node: Option<NodeRef>,
}

/// Auxiliary bus: receives sends, runs a chain, feeds the master mix.
/// Volume and mute only; auxes cannot send to other auxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuxChannel {
    #[serde(flatten)]
    pub header: ChannelHeader,
    pub plugin_chain: PluginChain,
    #[serde(skip)]
    pub bus_node: Option<NodeRef>,
    /// Next free input bus on the bus node. Runtime-only.
    #[serde(skip)]
    pub next_input_bus: u32,
}

/// The single master output channel. Cannot be deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterChannel {
    #[serde(flatten)]
    pub header: ChannelHeader,
    pub plugin_chain: PluginChain,
    pub output_device_uid: String,
    pub metering_enabled: bool,
}

/// Tagged channel union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Channel {
    AudioInput(AudioInputChannel),
    MidiInput(MidiInputChannel),
    Playback(PlaybackChannel),
    Aux(AuxChannel),
    Master(MasterChannel),
}

impl Channel {
    pub fn id(&self) -> ChannelId {
        self.header().id
    }

    pub fn name(&self) -> &str {
        &self.header().name
    }

    pub fn header(&self) -> &ChannelHeader {
        match self {
            Self::AudioInput(c) => &c.header,
            Self::MidiInput(c) => &c.header,
            Self::Playback(c) => &c.header,
            Self::Aux(c) => &c.header,
            Self::Master(c) => &c.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut ChannelHeader {
        match self {
            Self::AudioInput(c) => &mut c.header,
            Self::MidiInput(c) => &mut c.header,
            Self::Playback(c) => &mut c.header,
            Self::Aux(c) => &mut c.header,
            Self::Master(c) => &mut c.header,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::AudioInput(_) => "audio_input",
            Self::MidiInput(_) => "midi_input",
            Self::Playback(_) => "playback",
            Self::Aux(_) => "aux",
            Self::Master(_) => "master",
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master(_))
    }

    pub fn is_aux(&self) -> bool {
        matches!(self, Self::Aux(_))
    }

    /// Pan exists on input channels only.
    pub fn supports_pan(&self) -> bool {
        matches!(self, Self::AudioInput(_) | Self::MidiInput(_))
    }

    pub fn pan(&self) -> Option<f32> {
        match self {
            Self::AudioInput(c) => Some(c.pan),
            Self::MidiInput(c) => Some(c.pan),
            _ => None,
        }
    }

    pub fn set_pan(&mut self, pan: f32) -> Result<(), ConfigurationError> {
        match self {
            Self::AudioInput(c) => c.pan = pan,
            Self::MidiInput(c) => c.pan = pan,
            Self::Playback(_) => return Err(ConfigurationError::PanUnsupported),
            _ => return Err(ConfigurationError::PanUnsupported),
        }
        Ok(())
    }

    /// Every variant except playback carries a chain.
    pub fn plugin_chain(&self) -> Option<&PluginChain> {
        match self {
            Self::AudioInput(c) => Some(&c.plugin_chain),
            Self::MidiInput(c) => Some(&c.plugin_chain),
            Self::Aux(c) => Some(&c.plugin_chain),
            Self::Master(c) => Some(&c.plugin_chain),
            Self::Playback(_) => None,
        }
    }

    pub fn plugin_chain_mut(&mut self) -> Option<&mut PluginChain> {
        match self {
            Self::AudioInput(c) => Some(&mut c.plugin_chain),
            Self::MidiInput(c) => Some(&mut c.plugin_chain),
            Self::Aux(c) => Some(&mut c.plugin_chain),
            Self::Master(c) => Some(&mut c.plugin_chain),
            Self::Playback(_) => None,
        }
    }

    pub fn aux_sends(&self) -> Option<&[AuxSend]> {
        match self {
            Self::AudioInput(c) => Some(&c.aux_sends),
            Self::MidiInput(c) => Some(&c.aux_sends),
            _ => None,
        }
    }

    pub fn aux_sends_mut(&mut self) -> Option<&mut Vec<AuxSend>> {
        match self {
            Self::AudioInput(c) => Some(&mut c.aux_sends),
            Self::MidiInput(c) => Some(&mut c.aux_sends),
            _ => None,
        }
    }

    /// The node whose output is this channel's signal before the chain.
    pub fn source_node(&self) -> Option<NodeRef> {
        match self {
            Self::AudioInput(c) => c.input_node,
            Self::MidiInput(c) => c.synth_node,
            // Playback signal leaves through the time-pitch stage.
            Self::Playback(c) => c.pitch_node.or(c.player_node),
            Self::Aux(c) => c.bus_node,
            Self::Master(_) => None,
        }
    }

    /// The node whose output feeds the mix: the last active chain unit, or
    /// the source itself for an empty/bypassed chain.
    pub fn output_node(&self) -> Option<NodeRef> {
        let source = self.source_node()?;
        let last_active = self
            .plugin_chain()
            .map(|chain| chain.active_nodes().last().copied())
            .unwrap_or(None);
        Some(last_active.unwrap_or(source))
    }
}

/// Range check for linear volume.
pub fn validate_volume(volume: f32) -> Result<(), ConfigurationError> {
    if !(0.0..=1.0).contains(&volume) {
        return Err(ConfigurationError::ValueOutOfRange {
            field: "volume",
            value: volume as f64,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

/// Range check for stereo pan.
pub fn validate_pan(pan: f32) -> Result<(), ConfigurationError> {
    if !(-1.0..=1.0).contains(&pan) {
        return Err(ConfigurationError::ValueOutOfRange {
            field: "pan",
            value: pan as f64,
            min: -1.0,
            max: 1.0,
        });
    }
    Ok(())
}

/// Range check for aux send level.
pub fn validate_send_level(level: f32) -> Result<(), ConfigurationError> {
    if !(0.0..=1.0).contains(&level) {
        return Err(ConfigurationError::ValueOutOfRange {
            field: "send level",
            value: level as f64,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

/// Range check for playback rate.
pub fn validate_playback_rate(rate: f32) -> Result<(), ConfigurationError> {
    if !(0.25..=2.0).contains(&rate) {
        return Err(ConfigurationError::ValueOutOfRange {
            field: "playback rate",
            value: rate as f64,
            min: 0.25,
            max: 2.0,
        });
    }
    Ok(())
}

/// Range check for pitch shift.
pub fn validate_pitch_shift(semitones: f32) -> Result<(), ConfigurationError> {
    if !(-12.0..=12.0).contains(&semitones) {
        return Err(ConfigurationError::ValueOutOfRange {
            field: "pitch shift",
            value: semitones as f64,
            min: -12.0,
            max: 12.0,
        });
    }
    Ok(())
}
