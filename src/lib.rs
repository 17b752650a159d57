// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Embeddable control plane for multi-channel audio sessions.
//!
//! `macaudio` manages the coordination layer of a real-time mixing engine:
//! a topology dispatcher serializing all structural edits of a live audio
//! graph, an adaptive hot-plug device monitor, a two-tier plugin
//! introspection cache, and versioned snapshot/restore of the whole session.
//! The native audio framework, device enumeration service, and plugin host
//! are consumed through traits ([`AudioBackend`], [`DeviceEnumerator`],
//! [`PluginHost`]); the crate never touches the audio callback itself.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                   Session                     │  ← control-plane facade
//! └──────┬───────────┬──────────┬─────────────────┘
//!        │           │          │
//!        ▼           ▼          ▼
//! ┌────────────┐ ┌─────────┐ ┌─────────────┐
//! │ Dispatcher │ │ Device  │ │ PluginCache │
//! │ (1 thread) │ │ Monitor │ │ (2-tier)    │
//! └──────┬─────┘ └────┬────┘ └──────┬──────┘
//!        ▼            ▼             ▼
//! ┌────────────┐ ┌──────────┐ ┌───────────┐
//! │ GraphModel │ │ Device   │ │ Plugin    │
//! │ + sharing  │ │ Directory│ │ Host      │
//! └────────────┘ └──────────┘ └───────────┘
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use macaudio::{AudioSpec, Session, SessionConfig};
//! use macaudio::backend::NullBackend;
//! use macaudio::devices::StaticDeviceEnumerator;
//! use macaudio::plugins::StaticPluginHost;
//!
//! # fn main() -> Result<(), macaudio::EngineError> {
//! let config = SessionConfig::new(
//!     Arc::new(NullBackend::new()),
//!     Arc::new(StaticDeviceEnumerator::with_builtin_devices()),
//!     Arc::new(StaticPluginHost::new()),
//! );
//! let session = Session::new(AudioSpec::default(), "BuiltInSpeakerDevice", config)?;
//! let (mic, handle) =
//!     session.create_audio_input_channel("mic", "BuiltInMicrophone", 0, 0.8, 0.0)?;
//! handle.wait()?;
//! session.start()?.wait()?;
//! session.set_channel_volume(mic, 0.5)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod graph;
pub mod ids;
pub mod plugins;
pub mod session;
pub mod spec;

pub use backend::{AudioBackend, BackendError, NodeRef, StreamFormat};
pub use devices::{
    AudioDevice, DeviceChange, DeviceChangeKind, DeviceEnumerator, DeviceMonitor, MidiDevice,
    MonitorConfig,
};
pub use dispatcher::{ChannelSpec, OpHandle, Operation};
pub use error::{
    ConfigurationError, Diagnostic, DiagnosticKind, DispatcherError, EngineError, EngineResult,
};
pub use graph::{
    AuxSend, Channel, ChannelHeader, MetronomeConfig, PluginChain, PluginInstance, TempoRamp,
};
pub use ids::{ChainId, ChannelId, PluginInstanceId};
pub use plugins::{
    ParameterInfo, ParameterValue, PluginBlueprint, PluginCache, PluginHost, PluginRecord,
    PluginSummary, RefreshSummary,
};
pub use session::{Session, SessionConfig, SessionSnapshot, SessionState, SNAPSHOT_VERSION};
pub use spec::AudioSpec;
