// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Channel and graph data model.

pub mod chain;
pub mod channel;
pub mod model;
pub mod sharing;

pub use chain::{PluginChain, PluginInstance};
pub use channel::{
    AudioInputChannel, AuxChannel, AuxSend, Channel, ChannelHeader, MasterChannel,
    MetronomeConfig, MidiInputChannel, PlaybackChannel, TempoRamp,
};
pub use model::GraphModel;
pub use sharing::{InputKey, InputNodeTable, ReleaseOutcome};
