// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device population tracking.
//!
//! The enumeration service is polled through its count-only fast path by
//! [`DeviceMonitor`]; full enumerations run asynchronously and land in the
//! shared [`DeviceDirectory`], which the graph model consults for channel
//! readiness.

pub mod directory;
pub mod enumerator;
pub mod monitor;
pub mod types;

pub use directory::DeviceDirectory;
pub use enumerator::{DeviceEnumerator, StaticDeviceEnumerator};
pub use monitor::{DeviceChangeCallback, DeviceMonitor, MonitorConfig, MonitorTelemetry};
pub use types::{AudioDevice, DeviceChange, DeviceChangeKind, MidiDevice, TransportType};
