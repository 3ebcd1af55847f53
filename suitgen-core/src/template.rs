//! Manifest templates and slot offsets.
//!
//! A template fixes the shape of a manifest: how many components there are
//! and how many image slots each has. Everything the build derives from the
//! image files (size, digest, uri, offset) is filled in by
//! [`ManifestBuilder`](crate::manifest::ManifestBuilder); the template itself
//! is never mutated.
//!
//! # Template Format
//!
//! ```json
//! {
//!   "manifest-version": 1,
//!   "components": [
//!     {
//!       "identifier": "firmware",
//!       "images": [
//!         { "conditions": [ { "condition-component-offset": null } ] },
//!         { "conditions": [ { "condition-component-offset": null } ] }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A manifest template, loaded once per build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestTemplate {
    /// Manifest format version written into the output.
    #[serde(default = "default_manifest_version")]
    pub manifest_version: u64,
    /// Installable components, in manifest order.
    pub components: Vec<ComponentTemplate>,
    /// Sequence number placeholder. Always replaced by the build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
}

fn default_manifest_version() -> u64 {
    crate::MANIFEST_VERSION
}

/// One component of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentTemplate {
    /// Optional component name (e.g. a flash partition).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// One entry per slot.
    pub images: Vec<ImageTemplate>,
}

/// Placeholder for one image slot.
///
/// Unknown fields (a template's own `size`, `digest`, `uri` or `file`) are
/// ignored: the build always recomputes them from the slot file. The only
/// condition a slot may name is `condition-component-offset`, which the
/// build fills in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageTemplate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<serde_json::Value>,
}

/// Template key of the per-slot offset condition.
pub const COMPONENT_OFFSET_PLACEHOLDER: &str = "condition-component-offset";

impl ImageTemplate {
    fn validate(&self, slot: usize) -> Result<()> {
        match self.conditions.as_slice() {
            [] => Ok(()),
            [only] => match only.as_object() {
                Some(obj) if obj.len() == 1 && obj.contains_key(COMPONENT_OFFSET_PLACEHOLDER) => {
                    Ok(())
                }
                _ => Err(Error::Configuration(format!(
                    "slot {}: unsupported condition placeholder {}",
                    slot, only
                ))),
            },
            more => Err(Error::Configuration(format!(
                "slot {}: expected at most one condition placeholder, found {}",
                slot,
                more.len()
            ))),
        }
    }
}

impl ManifestTemplate {
    /// Single-component template with `slots` empty image slots.
    pub fn with_slots(slots: usize) -> Self {
        Self {
            manifest_version: crate::MANIFEST_VERSION,
            components: vec![ComponentTemplate {
                identifier: None,
                images: vec![ImageTemplate::default(); slots],
            }],
            sequence_number: None,
        }
    }

    /// Parse a template from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid JSON template: {}", e)))
    }

    /// Parse a template from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("invalid YAML template: {}", e)))
    }

    /// Load a template from a file; `.yaml`/`.yml` select YAML, anything
    /// else is read as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    /// Number of image slots of the first component.
    ///
    /// Only one component is ever targeted by a build.
    pub fn slot_count(&self) -> usize {
        self.components.first().map_or(0, |c| c.images.len())
    }

    /// Check that the template describes a manifest this crate can emit:
    /// the supported format version and only offset placeholders per slot.
    pub fn validate(&self) -> Result<()> {
        if self.manifest_version != crate::MANIFEST_VERSION {
            return Err(Error::Configuration(format!(
                "unsupported manifest-version {} (expected {})",
                self.manifest_version,
                crate::MANIFEST_VERSION
            )));
        }
        for component in &self.components {
            for (slot, image) in component.images.iter().enumerate() {
                image.validate(slot)?;
            }
        }
        Ok(())
    }
}

/// Parse one slot offset. A `0x` prefix selects base 16, anything else is
/// read as decimal.
pub fn parse_offset(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, radix) = match s.strip_prefix("0x") {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    // from_str_radix takes a leading '+'
    if digits.starts_with('+') {
        return Err(Error::Configuration(format!(
            "invalid offset '{}': sign not allowed",
            s
        )));
    }
    u64::from_str_radix(digits, radix)
        .map_err(|e| Error::Configuration(format!("invalid offset '{}': {}", s, e)))
}

/// Parse a comma-separated offset list, one entry per slot.
pub fn parse_offsets(s: &str) -> Result<Vec<u64>> {
    s.split(',').map(parse_offset).collect()
}
