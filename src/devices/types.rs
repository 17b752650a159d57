// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device descriptors and hot-plug change events.

use serde::{Deserialize, Serialize};

/// Physical transport of an audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    BuiltIn,
    Usb,
    Bluetooth,
    Thunderbolt,
    Aggregate,
    Virtual,
    Unknown(String),
}

impl TransportType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "built-in" => Self::BuiltIn,
            "usb" => Self::Usb,
            "bluetooth" => Self::Bluetooth,
            "thunderbolt" => Self::Thunderbolt,
            "aggregate" => Self::Aggregate,
            "virtual" => Self::Virtual,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::BuiltIn => "built-in",
            Self::Usb => "usb",
            Self::Bluetooth => "bluetooth",
            Self::Thunderbolt => "thunderbolt",
            Self::Aggregate => "aggregate",
            Self::Virtual => "virtual",
            Self::Unknown(s) => s,
        }
    }
}

/// One audio endpoint as reported by the enumeration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub name: String,
    /// Stable identifier; only meaningful on the machine that produced it.
    pub uid: String,
    pub is_online: bool,
    pub input_channel_count: u32,
    pub output_channel_count: u32,
    pub supported_sample_rates: Vec<f64>,
    pub supported_bit_depths: Vec<u32>,
    pub device_type: String,
    pub transport_type: TransportType,
}

impl AudioDevice {
    pub fn has_inputs(&self) -> bool {
        self.input_channel_count > 0
    }

    pub fn has_outputs(&self) -> bool {
        self.output_channel_count > 0
    }
}

/// One MIDI endpoint as reported by the enumeration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiDevice {
    pub name: String,
    pub uid: String,
    pub is_online: bool,
    pub is_input: bool,
    pub is_output: bool,
    pub manufacturer: String,
    pub model: String,
    /// Sysex transfer speed in bytes per second.
    pub sysex_speed: u32,
}

/// Which endpoint population changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceChangeKind {
    Audio,
    Midi,
    Both,
}

impl DeviceChangeKind {
    pub fn includes_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::Both)
    }

    pub fn includes_midi(&self) -> bool {
        matches!(self, Self::Midi | Self::Both)
    }
}

/// Hot-plug change notification.
///
/// Every population change produces two events per changed kind: first the
/// count change with the scanning flag raised, then the scan completion with
/// the flag lowered and the fresh device list attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceChange {
    pub kind: DeviceChangeKind,
    pub audio_count: usize,
    pub midi_count: usize,
    /// A full audio enumeration is still in flight.
    pub audio_scanning: bool,
    /// A full MIDI enumeration is still in flight.
    pub midi_scanning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_devices: Option<Vec<AudioDevice>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_devices: Option<Vec<MidiDevice>>,
}
