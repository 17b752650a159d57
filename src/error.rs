// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error taxonomy and structured diagnostics.
//!
//! Every fallible path in the crate surfaces an [`EngineError`]. Subsystems
//! keep their own narrow error enums (backend, cache, host) and convert at
//! the boundary, so callers match on one taxonomy regardless of which layer
//! failed.

use crate::ids::ChannelId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by the dispatcher submission path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatcherError {
    /// The dispatcher thread has been stopped; no further operations accepted.
    #[error("dispatcher is stopped")]
    Stopped,
    /// An operation attempted to submit to the dispatcher from within the
    /// dispatcher thread itself. Executing it synchronously would deadlock.
    #[error("reentrant submit from dispatcher thread")]
    ReentrantSubmit,
    /// The operation's completion channel was dropped without a result.
    /// Only happens if the dispatcher thread panicked mid-operation.
    #[error("operation abandoned: dispatcher thread died")]
    Abandoned,
    #[error("failed to spawn dispatcher thread: {0}")]
    SpawnFailed(String),
}

/// Configuration and validation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("sample rate {0} outside supported range 8000-384000")]
    InvalidSampleRate(f64),
    #[error("buffer size {0} outside supported range 64-4096")]
    InvalidBufferSize(u32),
    #[error("bit depth {0} unsupported: audio path is fixed at 32")]
    InvalidBitDepth(u32),
    #[error("channel count {0} outside supported range 1-64")]
    InvalidChannelCount(u32),
    #[error("{field} value {value} outside range {min}..={max}")]
    ValueOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("unknown device uid: {0}")]
    UnknownDevice(String),
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("operation not supported for {kind} channel")]
    UnsupportedForChannelKind { kind: &'static str },
    #[error("plugin instance not found in chain")]
    PluginNotFound,
    #[error("aux send target {0} is not an aux channel")]
    NotAnAux(ChannelId),
    #[error("aux channels cannot send to other aux channels")]
    NestedAuxSend,
    #[error("duplicate aux send to {0}")]
    DuplicateAuxSend(ChannelId),
    #[error("no aux send targeting {0}")]
    SendNotFound(ChannelId),
    #[error("the master channel cannot be deleted")]
    CannotDeleteMaster,
    #[error("playback channels do not support pan")]
    PanUnsupported,
    #[error("channel {0} does not carry a plugin chain")]
    NoPluginChain(ChannelId),
    #[error("plugin position {position} out of bounds for chain of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
    #[error("engine already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("metronome bpm {0} outside supported range 30-300")]
    InvalidBpm(u32),
}

/// Top-level error type for all control-plane operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The referenced device exists but is currently offline.
    #[error("device offline: {uid}")]
    DeviceOffline { uid: String },

    /// Plugin introspection or instantiation failed. The owning plugin
    /// instance is retained with `is_installed = false`.
    #[error("plugin load failed for {key}: {reason}")]
    PluginLoad { key: String, reason: String },

    /// Start was attempted with no ready input-capable channel reaching
    /// the master output.
    #[error("audio graph incomplete: {0}")]
    GraphIncomplete(String),

    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    /// Cache or snapshot I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot parse error: {0}")]
    SnapshotParse(#[from] serde_json::Error),

    #[error("snapshot version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: String, expected: String },

    /// Failure reported by the external audio framework, wrapped with the
    /// operation that triggered it.
    #[error("audio framework error during {context}: {message}")]
    Framework { context: &'static str, message: String },
}

impl EngineError {
    /// Wrap a backend failure with the operation it occurred in.
    pub(crate) fn framework(context: &'static str, message: impl Into<String>) -> Self {
        Self::Framework {
            context,
            message: message.into(),
        }
    }
}

/// Severity of a restore/operation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Referenced device is offline or missing; the channel was restored
    /// non-ready.
    DeviceOffline,
    /// Referenced soundbank or playback file is missing.
    MissingFile,
    /// Plugin introspection failed; instance kept with `is_installed = false`.
    PluginUnavailable,
    /// A saved parameter address no longer exists in the plugin's schema.
    ParameterDropped,
    /// The restored session could not reach the snapshot's lifecycle state.
    StateDowngraded,
}

/// One structured diagnostic, collected during restore or surfaced through
/// the diagnostics subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// One-line human message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin_key: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            channel_id: None,
            device_uid: None,
            plugin_key: None,
        }
    }

    pub fn with_channel(mut self, id: ChannelId) -> Self {
        self.channel_id = Some(id);
        self
    }

    pub fn with_device(mut self, uid: impl Into<String>) -> Self {
        self.device_uid = Some(uid.into());
        self
    }

    pub fn with_plugin(mut self, key: impl Into<String>) -> Self {
        self.plugin_key = Some(key.into());
        self
    }
}

/// Result alias used across the crate.
pub type EngineResult<T> = Result<T, EngineError>;
