// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ref-counted sharing of hardware input nodes.
//!
//! Channels bound to the same `(device_uid, input_bus)` share one capture
//! node. The table owns the node; channels hold it by key. All mutation goes
//! through the dispatcher, so plain refcounts decide lifetime.

use crate::backend::NodeRef;
use std::collections::HashMap;

/// Key identifying one physical capture point.
pub type InputKey = (String, u32);

#[derive(Debug, Clone, Copy)]
struct SharedInput {
    node: NodeRef,
    refs: u32,
}

/// Outcome of releasing one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other channels still hold the node.
    Retained(u32),
    /// Last reference dropped; caller must detach and free the node.
    Freed(NodeRef),
    /// No entry for the key.
    NotFound,
}

/// The input-node sharing table. Sole source of truth for which channels
/// share which capture node.
#[derive(Debug, Default)]
pub struct InputNodeTable {
    entries: HashMap<InputKey, SharedInput>,
}

impl InputNodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reuse an existing node for `key`, bumping its refcount.
    pub fn acquire_existing(&mut self, key: &InputKey) -> Option<NodeRef> {
        let entry = self.entries.get_mut(key)?;
        entry.refs += 1;
        Some(entry.node)
    }

    /// Register a freshly allocated node with refcount 1.
    pub fn insert_new(&mut self, key: InputKey, node: NodeRef) {
        debug_assert!(!self.entries.contains_key(&key));
        self.entries.insert(key, SharedInput { node, refs: 1 });
    }

    /// Drop one reference for `key`.
    pub fn release(&mut self, key: &InputKey) -> ReleaseOutcome {
        match self.entries.get_mut(key) {
            None => ReleaseOutcome::NotFound,
            Some(entry) if entry.refs > 1 => {
                entry.refs -= 1;
                ReleaseOutcome::Retained(entry.refs)
            }
            Some(entry) => {
                let node = entry.node;
                self.entries.remove(key);
                ReleaseOutcome::Freed(node)
            }
        }
    }

    pub fn node_for(&self, key: &InputKey) -> Option<NodeRef> {
        self.entries.get(key).map(|e| e.node)
    }

    pub fn refs_for(&self, key: &InputKey) -> u32 {
        self.entries.get(key).map(|e| e.refs).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NodeRef;

    fn key(uid: &str, bus: u32) -> InputKey {
        (uid.to_string(), bus)
    }

    #[test]
    fn test_sharing_lifecycle() {
        let mut table = InputNodeTable::new();
        let k = key("USB-Interface", 0);

        assert!(table.acquire_existing(&k).is_none());
        table.insert_new(k.clone(), NodeRef(5));
        assert_eq!(table.len(), 1);
        assert_eq!(table.refs_for(&k), 1);

        // Second channel on the same key shares the node.
        assert_eq!(table.acquire_existing(&k), Some(NodeRef(5)));
        assert_eq!(table.refs_for(&k), 2);
        assert_eq!(table.len(), 1);

        assert_eq!(table.release(&k), ReleaseOutcome::Retained(1));
        assert_eq!(table.release(&k), ReleaseOutcome::Freed(NodeRef(5)));
        assert!(table.is_empty());
        assert_eq!(table.release(&k), ReleaseOutcome::NotFound);
    }

    #[test]
    fn test_distinct_buses_do_not_share() {
        let mut table = InputNodeTable::new();
        table.insert_new(key("USB-Interface", 0), NodeRef(5));
        assert!(table.acquire_existing(&key("USB-Interface", 1)).is_none());
        table.insert_new(key("USB-Interface", 1), NodeRef(6));
        assert_eq!(table.len(), 2);
    }
}
