//! Build configuration.
//!
//! Everything `suitgen manifest` needs can be kept in a YAML file next to
//! the firmware build, with command-line flags taking precedence.
//!
//! # Configuration File Format
//!
//! ```yaml
//! template: manifest-template.json
//! url-root: "coap://[2001:db8::1]/fw"
//! images:
//!   - build/slot0.bin
//!   - build/slot1.bin
//! offsets: "0,0x1000"        # or a list: [0, "0x1000"]
//! sequence-number: 5
//! vendor: acme
//! class: widget
//! signing:
//!   key: keys/release.pem
//!   key-id: release-2024
//! output: build/manifest.cose
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::manifest::{Manifest, ManifestBuilder};
use crate::template::{parse_offset, parse_offsets, ManifestTemplate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Build settings for one manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_root: Option<String>,
    /// Slot files, in slot order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets: Option<OffsetList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing: Option<SigningConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// Key used to sign the built manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SigningConfig {
    /// PKCS#8 private key file (PEM or DER).
    pub key: PathBuf,
    /// Key identifier placed in the protected header.
    pub key_id: String,
}

/// Slot offsets, either as one comma-separated string or as a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OffsetList {
    Text(String),
    List(Vec<OffsetEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OffsetEntry {
    Number(u64),
    Text(String),
}

impl OffsetList {
    pub fn resolve(&self) -> Result<Vec<u64>> {
        match self {
            OffsetList::Text(s) => parse_offsets(s),
            OffsetList::List(entries) => entries
                .iter()
                .map(|e| match e {
                    OffsetEntry::Number(n) => Ok(*n),
                    OffsetEntry::Text(s) => parse_offset(s),
                })
                .collect(),
        }
    }
}

impl BuildConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Configuration(format!("invalid build config: {}", e)))
    }

    /// Load configuration from a file, resolving relative paths against the
    /// file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = Self::from_yaml(&content)?;
        match path.parent() {
            Some(base) if !base.as_os_str().is_empty() => Ok(config.rebase(base)),
            _ => Ok(config),
        }
    }

    fn rebase(mut self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.template = self.template.map(join);
        self.images = self.images.into_iter().map(join).collect();
        self.output = self.output.map(join);
        if let Some(signing) = self.signing.as_mut() {
            signing.key = join(std::mem::take(&mut signing.key));
        }
        self
    }

    /// Overlay `overrides` on top of this config. Set fields in `overrides`
    /// win; a non-empty image list replaces the whole list.
    pub fn merge(self, overrides: BuildConfig) -> Self {
        Self {
            template: overrides.template.or(self.template),
            url_root: overrides.url_root.or(self.url_root),
            images: if overrides.images.is_empty() {
                self.images
            } else {
                overrides.images
            },
            offsets: overrides.offsets.or(self.offsets),
            sequence_number: overrides.sequence_number.or(self.sequence_number),
            vendor: overrides.vendor.or(self.vendor),
            class: overrides.class.or(self.class),
            signing: overrides.signing.or(self.signing),
            output: overrides.output.or(self.output),
        }
    }

    /// Vendor/class identity derived from the configured names.
    pub fn identity(&self) -> Result<DeviceIdentity> {
        let vendor = required(self.vendor.as_deref(), "vendor")?;
        let class = required(self.class.as_deref(), "class")?;
        Ok(DeviceIdentity::derive(vendor, class))
    }

    /// Turn the configuration into a ready-to-build [`ManifestBuilder`].
    ///
    /// Loads the template and parses offsets; slot files are only read by
    /// [`ManifestBuilder::build`].
    pub fn manifest_builder(&self) -> Result<ManifestBuilder> {
        let template_path = required(self.template.as_deref(), "template")?;
        let template = ManifestTemplate::from_file(template_path)?;
        let url_root = required(self.url_root.as_deref(), "url-root")?;
        let sequence_number = self
            .sequence_number
            .ok_or_else(|| Error::Configuration("missing field: sequence-number".to_string()))?;
        let offsets = match &self.offsets {
            Some(offsets) => offsets.resolve()?,
            None => Vec::new(),
        };

        Ok(Manifest::builder()
            .template(template)
            .url_root(url_root)
            .images(self.images.iter().cloned())
            .offsets(offsets)
            .sequence_number(sequence_number)
            .identity(self.identity()?))
    }
}

fn required<'a, T: ?Sized>(value: Option<&'a T>, name: &str) -> Result<&'a T> {
    value.ok_or_else(|| Error::Configuration(format!("missing field: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_YAML: &str = r#"
template: template.json
url-root: "coap://[2001:db8::1]/fw"
images:
  - slot0.bin
  - slot1.bin
offsets: "0,0x1000"
sequence-number: 5
vendor: acme
class: widget
signing:
  key: keys/release.pem
  key-id: release
"#;

    #[test]
    fn test_parse_config() {
        let config = BuildConfig::from_yaml(CONFIG_YAML).unwrap();
        assert_eq!(config.sequence_number, Some(5));
        assert_eq!(config.images.len(), 2);
        assert_eq!(config.offsets.unwrap().resolve().unwrap(), vec![0, 0x1000]);
        assert_eq!(config.signing.unwrap().key_id, "release");
    }

    #[test]
    fn test_offsets_as_list() {
        let config = BuildConfig::from_yaml("offsets: [0, \"0x1000\", 8192]").unwrap();
        assert_eq!(
            config.offsets.unwrap().resolve().unwrap(),
            vec![0, 4096, 8192]
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            BuildConfig::from_yaml("sequence-nubmer: 5"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = BuildConfig::from_yaml(CONFIG_YAML).unwrap();
        let merged = base.clone().merge(BuildConfig {
            sequence_number: Some(6),
            ..Default::default()
        });
        assert_eq!(merged.sequence_number, Some(6));
        assert_eq!(merged.vendor.as_deref(), Some("acme"));
        assert_eq!(merged.images, base.images);

        let merged = base.merge(BuildConfig {
            images: vec![PathBuf::from("only.bin")],
            ..Default::default()
        });
        assert_eq!(merged.images, vec![PathBuf::from("only.bin")]);
    }

    #[test]
    fn test_from_file_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("suitgen.yaml");
        std::fs::write(&path, CONFIG_YAML).unwrap();

        let config = BuildConfig::from_file(&path).unwrap();
        assert_eq!(config.template, Some(dir.path().join("template.json")));
        assert_eq!(config.images[1], dir.path().join("slot1.bin"));
        assert_eq!(
            config.signing.unwrap().key,
            dir.path().join("keys/release.pem")
        );
    }

    #[test]
    fn test_missing_identity_fields() {
        let err = BuildConfig::default().identity().unwrap_err();
        assert!(err.to_string().contains("vendor"), "{}", err);
    }

    #[test]
    fn test_manifest_builder_from_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("template.json"),
            r#"{"components": [{"images": [{}, {}]}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("slot0.bin"), [1u8; 100]).unwrap();
        std::fs::write(dir.path().join("slot1.bin"), [2u8; 200]).unwrap();
        let path = dir.path().join("suitgen.yaml");
        std::fs::write(&path, CONFIG_YAML).unwrap();

        let manifest = BuildConfig::from_file(&path)
            .unwrap()
            .manifest_builder()
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(manifest.sequence_number(), 5);
        assert_eq!(
            manifest.images().map(|i| i.size()).collect::<Vec<_>>(),
            vec![100, 200]
        );
    }
}
