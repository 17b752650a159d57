// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin identity and introspection records.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The four-tuple identifying a plugin unit.
///
/// `kind`, `subtype` and `manufacturer` are four-character tags assigned by
/// the unit's vendor; `name` disambiguates units that share tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginBlueprint {
    #[serde(rename = "type")]
    pub kind: String,
    pub subtype: String,
    pub manufacturer: String,
    pub name: String,
}

impl PluginBlueprint {
    pub fn new(
        kind: impl Into<String>,
        subtype: impl Into<String>,
        manufacturer: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
            manufacturer: manufacturer.into(),
            name: name.into(),
        }
    }

    /// Textual cache key: `{type}:{subtype}:{manufacturer_id}:{name}`.
    pub fn quadruplet(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.kind, self.subtype, self.manufacturer, self.name
        )
    }

    /// Hex sha256 of the quadruplet; used as the detail file name.
    pub fn detail_file_stem(&self) -> String {
        hex_sha256(self.quadruplet().as_bytes())
    }
}

impl fmt::Display for PluginBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.quadruplet())
    }
}

/// Quick-scan result: identity plus category, no parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSummary {
    #[serde(flatten)]
    pub blueprint: PluginBlueprint,
    pub category: String,
}

impl PluginSummary {
    /// Content checksum over identity and category. A changed checksum for
    /// the same key means the installed unit changed and cached parameter
    /// details are stale.
    pub fn checksum(&self) -> String {
        let material = format!(
            "{}|{}|{}|{}|{}",
            self.blueprint.kind,
            self.blueprint.subtype,
            self.blueprint.manufacturer,
            self.blueprint.name,
            self.category
        );
        hex_sha256(material.as_bytes())
    }
}

/// One parameter in a plugin's introspected schema.
///
/// Addresses are opaque and assigned by the plugin host; they are only
/// meaningful against the schema they were introspected with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub address: u64,
    pub name: String,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Fully introspected plugin record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginRecord {
    #[serde(flatten)]
    pub blueprint: PluginBlueprint,
    pub category: String,
    pub parameters: Vec<ParameterInfo>,
}

impl PluginRecord {
    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            blueprint: self.blueprint.clone(),
            category: self.category.clone(),
        }
    }

    /// Look up a parameter by address.
    pub fn parameter(&self, address: u64) -> Option<&ParameterInfo> {
        self.parameters.iter().find(|p| p.address == address)
    }
}

/// A saved parameter value, mapped by address on restore.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub address: u64,
    pub current_value: f32,
}

pub(crate) fn hex_sha256(data: &[u8]) -> String {
    use std::fmt::Write;

    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay() -> PluginSummary {
        PluginSummary {
            blueprint: PluginBlueprint::new("aufx", "dely", "appl", "Sample Delay"),
            category: "Delay".to_string(),
        }
    }

    #[test]
    fn test_quadruplet_format() {
        assert_eq!(
            delay().blueprint.quadruplet(),
            "aufx:dely:appl:Sample Delay"
        );
    }

    #[test]
    fn test_checksum_tracks_category() {
        let a = delay();
        let mut b = delay();
        assert_eq!(a.checksum(), b.checksum());
        b.category = "Effect".to_string();
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_detail_file_stem_is_hex() {
        let stem = delay().blueprint.detail_file_stem();
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_record_parameter_lookup() {
        let record = PluginRecord {
            blueprint: delay().blueprint,
            category: "Delay".to_string(),
            parameters: vec![ParameterInfo {
                address: 7,
                name: "Delay Time".to_string(),
                min_value: 0.0,
                max_value: 2.0,
                default_value: 0.25,
                unit: Some("s".to_string()),
            }],
        };
        assert!(record.parameter(7).is_some());
        assert!(record.parameter(8).is_none());
    }
}
