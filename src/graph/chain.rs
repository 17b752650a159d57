// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ordered plugin chains.

use crate::backend::NodeRef;
use crate::ids::{ChainId, PluginInstanceId};
use crate::plugins::{ParameterValue, PluginBlueprint};
use serde::{Deserialize, Serialize};

/// One effect unit inside a chain.
///
/// The live engine node is runtime-only; snapshots carry the blueprint and
/// parameter values so the unit can be re-instantiated on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInstance {
    pub id: PluginInstanceId,
    pub blueprint: PluginBlueprint,
    /// Set at load time. `false` means the unit could not be introspected or
    /// instantiated; processing skips it but the slot is kept.
    pub is_installed: bool,
    /// User bypass control, independent of `is_installed`.
    pub bypassed: bool,
    pub parameters: Vec<ParameterValue>,
    /// Live engine node, if instantiated.
    #[serde(skip)]
    pub node: Option<NodeRef>,
}

impl PluginInstance {
    pub fn new(id: PluginInstanceId, blueprint: PluginBlueprint) -> Self {
        Self {
            id,
            blueprint,
            is_installed: false,
            bypassed: false,
            parameters: Vec::new(),
            node: None,
        }
    }

    /// Whether audio should flow through this unit.
    pub fn is_active(&self) -> bool {
        self.is_installed && !self.bypassed && self.node.is_some()
    }

    pub fn parameter_value(&self, address: u64) -> Option<f32> {
        self.parameters
            .iter()
            .find(|p| p.address == address)
            .map(|p| p.current_value)
    }

    pub fn set_parameter_value(&mut self, address: u64, value: f32) {
        match self.parameters.iter_mut().find(|p| p.address == address) {
            Some(existing) => existing.current_value = value,
            None => self.parameters.push(ParameterValue {
                address,
                current_value: value,
            }),
        }
    }
}

/// An ordered sequence of plugin instances attached to one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginChain {
    pub id: ChainId,
    pub entries: Vec<PluginInstance>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self {
            id: ChainId::new(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: PluginInstanceId) -> Option<&PluginInstance> {
        self.entries.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: PluginInstanceId) -> Option<&mut PluginInstance> {
        self.entries.iter_mut().find(|p| p.id == id)
    }

    pub fn position(&self, id: PluginInstanceId) -> Option<usize> {
        self.entries.iter().position(|p| p.id == id)
    }

    /// Insert at `position`; `position == len` appends.
    pub fn insert(&mut self, position: usize, instance: PluginInstance) {
        self.entries.insert(position.min(self.entries.len()), instance);
    }

    pub fn remove(&mut self, id: PluginInstanceId) -> Option<PluginInstance> {
        let position = self.position(id)?;
        Some(self.entries.remove(position))
    }

    /// Move the entry at `from` to `to`. Returns false on out-of-range.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from >= self.entries.len() || to >= self.entries.len() {
            return false;
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        true
    }

    /// Nodes audio currently flows through, in processing order.
    pub fn active_nodes(&self) -> Vec<NodeRef> {
        self.entries
            .iter()
            .filter(|p| p.is_active())
            .filter_map(|p| p.node)
            .collect()
    }

    /// Readiness contribution: every entry installed or explicitly bypassed.
    pub fn all_installed_or_bypassed(&self) -> bool {
        self.entries.iter().all(|p| p.is_installed || p.bypassed)
    }
}

impl Default for PluginChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NodeRef;
    use crate::ids::PluginInstanceId;
    use crate::plugins::PluginBlueprint;

    fn instance(name: &str) -> PluginInstance {
        let mut p = PluginInstance::new(
            PluginInstanceId::new(),
            PluginBlueprint::new("aufx", "test", "acme", name),
        );
        p.is_installed = true;
        p.node = Some(NodeRef(99));
        p
    }

    #[test]
    fn test_insert_positions() {
        let mut chain = PluginChain::new();
        let a = instance("a");
        let b = instance("b");
        let c = instance("c");
        let (ida, idb, idc) = (a.id, b.id, c.id);
        chain.insert(0, a);
        chain.insert(1, b);
        // Insert between.
        chain.insert(1, c);
        let order: Vec<_> = chain.entries.iter().map(|p| p.id).collect();
        assert_eq!(order, vec![ida, idc, idb]);
        // Past-the-end clamps to append.
        let d = instance("d");
        let idd = d.id;
        chain.insert(100, d);
        assert_eq!(chain.entries.last().map(|p| p.id), Some(idd));
    }

    #[test]
    fn test_reorder_bounds() {
        let mut chain = PluginChain::new();
        chain.insert(0, instance("a"));
        chain.insert(1, instance("b"));
        assert!(chain.reorder(0, 1));
        assert!(!chain.reorder(0, 2));
        assert!(!chain.reorder(5, 0));
    }

    #[test]
    fn test_active_nodes_skip_bypassed_and_missing() {
        let mut chain = PluginChain::new();
        let mut bypassed = instance("a");
        bypassed.bypassed = true;
        let mut missing = instance("b");
        missing.is_installed = false;
        missing.node = None;
        let active = instance("c");
        let active_node = active.node.unwrap();
        chain.insert(0, bypassed);
        chain.insert(1, missing);
        chain.insert(2, active);

        assert_eq!(chain.active_nodes(), vec![active_node]);
        // Missing unit is neither installed nor bypassed: chain not ready.
        assert!(!chain.all_installed_or_bypassed());
    }

    #[test]
    fn test_parameter_value_upsert() {
        let mut p = instance("a");
        p.set_parameter_value(7, 0.5);
        p.set_parameter_value(7, 0.9);
        assert_eq!(p.parameter_value(7), Some(0.9));
        assert_eq!(p.parameters.len(), 1);
    }
}
