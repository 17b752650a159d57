// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin host service contract.
//!
//! Discovery and introspection of installed effect units is provided by an
//! external host process. `quick_scan` is cheap (identity + category only);
//! `introspect` loads the unit and can take seconds, so callers go through
//! the cache rather than hitting the host directly.

use super::types::{PluginBlueprint, PluginRecord, PluginSummary};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("plugin scan failed: {0}")]
    ScanFailed(String),
    #[error("introspection failed for {key}: {reason}")]
    IntrospectionFailed { key: String, reason: String },
    #[error("plugin not installed: {0}")]
    NotInstalled(String),
}

/// External plugin host contract. Both calls block; they are always invoked
/// from the task pool, never from the dispatcher thread.
pub trait PluginHost: Send + Sync {
    /// Enumerate installed units without loading them.
    fn quick_scan(&self) -> Result<Vec<PluginSummary>, HostError>;

    /// Load one unit and extract its full parameter schema.
    fn introspect(&self, blueprint: &PluginBlueprint) -> Result<PluginRecord, HostError>;
}

/// Scripted host double with call counters.
#[derive(Debug, Default)]
pub struct StaticPluginHost {
    records: Mutex<HashMap<String, PluginRecord>>,
    scan_calls: AtomicUsize,
    introspect_calls: AtomicUsize,
}

impl StaticPluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an installed unit.
    pub fn install(&self, record: PluginRecord) {
        let key = record.blueprint.quadruplet();
        self.records.lock().insert(key, record);
    }

    /// Remove a unit, simulating an uninstall.
    pub fn uninstall(&self, quadruplet: &str) {
        self.records.lock().remove(quadruplet);
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::Relaxed)
    }

    pub fn introspect_calls(&self) -> usize {
        self.introspect_calls.load(Ordering::Relaxed)
    }
}

impl PluginHost for StaticPluginHost {
    fn quick_scan(&self) -> Result<Vec<PluginSummary>, HostError> {
        self.scan_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.lock().values().map(|r| r.summary()).collect())
    }

    fn introspect(&self, blueprint: &PluginBlueprint) -> Result<PluginRecord, HostError> {
        self.introspect_calls.fetch_add(1, Ordering::Relaxed);
        let key = blueprint.quadruplet();
        self.records
            .lock()
            .get(&key)
            .cloned()
            .ok_or(HostError::NotInstalled(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{ParameterInfo, PluginBlueprint, PluginRecord};

    fn test_record(name: &str, subtype: &str) -> PluginRecord {
        PluginRecord {
            blueprint: PluginBlueprint::new("aufx", subtype, "acme", name),
            category: "Effect".to_string(),
            parameters: vec![ParameterInfo {
                address: 1,
                name: "Mix".to_string(),
                min_value: 0.0,
                max_value: 1.0,
                default_value: 0.5,
                unit: None,
            }],
        }
    }

    #[test]
    fn test_static_host_scan_and_introspect() {
        let host = StaticPluginHost::new();
        host.install(test_record("Verb", "rvb1"));

        let scanned = host.quick_scan().unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(host.scan_calls(), 1);

        let record = host.introspect(&scanned[0].blueprint).unwrap();
        assert_eq!(record.parameters.len(), 1);
        assert_eq!(host.introspect_calls(), 1);
    }

    #[test]
    fn test_uninstalled_unit_fails_introspection() {
        let host = StaticPluginHost::new();
        let missing = PluginBlueprint::new("aufx", "none", "acme", "Ghost");
        assert!(matches!(
            host.introspect(&missing),
            Err(HostError::NotInstalled(_))
        ));
    }
}
