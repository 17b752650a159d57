// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin identity, host contract, and the introspection cache.
//!
//! A plugin unit is identified by its blueprint quadruplet. Discovery and
//! introspection live behind [`PluginHost`]; results are persisted by
//! [`PluginCache`] so session restores do not pay seconds-per-unit
//! introspection cost twice.

pub mod cache;
pub mod host;
pub mod types;

pub use cache::{
    CacheError, CacheMetrics, IndexEntry, PluginCache, RefreshSummary, CACHE_DIR_ENV,
    DETAILS_VERSION, INDEX_VERSION,
};
pub use host::{HostError, PluginHost, StaticPluginHost};
pub use types::{ParameterInfo, ParameterValue, PluginBlueprint, PluginRecord, PluginSummary};
