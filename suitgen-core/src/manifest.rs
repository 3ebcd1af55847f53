//! Firmware-update manifest - the document a device verifies before it
//! installs new firmware.
//!
//! A manifest carries:
//! - a monotonically increasing sequence number (freshness)
//! - vendor and class conditions (which devices may install it)
//! - one component whose images describe each update slot: size, digest,
//!   fetch uri and the flash offset the image must be written to
//!
//! Manifests are built once per invocation by [`ManifestBuilder`] from a
//! read-only [`ManifestTemplate`] plus the slot files, and are immutable
//! afterwards.

use crate::error::{Error, Result};
use crate::identity::DeviceIdentity;
use crate::template::ManifestTemplate;
use crate::value::{Key, Value};
use crate::wire;
use crate::MANIFEST_VERSION;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

// Integer key mapping (wire format):
//
// manifest:  1 version, 2 sequence-number, 3 conditions, 4 components
// component: 1 identifier, 2 images
// image:     2 size, 3 digest, 4 uri, 5 conditions
// condition: [type, value]
// digest:    [algorithm-id, bytes]
const MANIFEST_KEY_VERSION: i64 = 1;
const MANIFEST_KEY_SEQUENCE_NUMBER: i64 = 2;
const MANIFEST_KEY_CONDITIONS: i64 = 3;
const MANIFEST_KEY_COMPONENTS: i64 = 4;

const COMPONENT_KEY_IDENTIFIER: i64 = 1;
const COMPONENT_KEY_IMAGES: i64 = 2;

const IMAGE_KEY_SIZE: i64 = 2;
const IMAGE_KEY_DIGEST: i64 = 3;
const IMAGE_KEY_URI: i64 = 4;
const IMAGE_KEY_CONDITIONS: i64 = 5;

/// Condition type: vendor identifier must equal the device's.
pub const CONDITION_VENDOR_ID: u64 = 1;
/// Condition type: class identifier must equal the device's.
pub const CONDITION_CLASS_ID: u64 = 2;
/// Condition type: byte offset within the component the image is written to.
pub const CONDITION_COMPONENT_OFFSET: u64 = 5;

/// Read buffer used while digesting slot files.
const DIGEST_CHUNK_SIZE: usize = 8 * 1024;

/// A predicate a device evaluates before applying a manifest or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    VendorId(Uuid),
    ClassId(Uuid),
    ComponentOffset(u64),
}

impl Condition {
    /// Wire type id of this condition.
    pub fn type_id(&self) -> u64 {
        match self {
            Condition::VendorId(_) => CONDITION_VENDOR_ID,
            Condition::ClassId(_) => CONDITION_CLASS_ID,
            Condition::ComponentOffset(_) => CONDITION_COMPONENT_OFFSET,
        }
    }

    fn to_value(self) -> Value {
        let value = match self {
            Condition::VendorId(id) | Condition::ClassId(id) => Value::Bytes(id.as_bytes().to_vec()),
            Condition::ComponentOffset(offset) => Value::from(offset),
        };
        Value::array([Value::from(self.type_id()), value])
    }

    fn from_value(value: &Value) -> Result<Self> {
        let pair = match value.as_array() {
            Some([kind, value]) => (kind, value),
            _ => return Err(malformed("condition must be a [type, value] pair")),
        };
        let kind = pair
            .0
            .as_u64()
            .ok_or_else(|| malformed("condition type must be an unsigned integer"))?;
        match kind {
            CONDITION_VENDOR_ID => Ok(Condition::VendorId(uuid_from_value(pair.1)?)),
            CONDITION_CLASS_ID => Ok(Condition::ClassId(uuid_from_value(pair.1)?)),
            CONDITION_COMPONENT_OFFSET => Ok(Condition::ComponentOffset(
                pair.1
                    .as_u64()
                    .ok_or_else(|| malformed("component offset must be an unsigned integer"))?,
            )),
            other => Err(malformed(&format!("unknown condition type {}", other))),
        }
    }
}

fn uuid_from_value(value: &Value) -> Result<Uuid> {
    value
        .as_bytes()
        .and_then(|b| Uuid::from_slice(b).ok())
        .ok_or_else(|| malformed("identifier condition must be a 16-byte string"))
}

fn malformed(reason: &str) -> Error {
    Error::Decoding(format!("malformed manifest: {}", reason))
}

/// Digest algorithms a manifest can name.
///
/// Ids follow the device-side list (0 none, 1 SHA-256, 2 SHA-384, 3 SHA-512);
/// only SHA-256 is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub fn id(self) -> u64 {
        match self {
            DigestAlgorithm::Sha256 => 1,
        }
    }

    pub fn from_id(id: u64) -> Result<Self> {
        match id {
            1 => Ok(DigestAlgorithm::Sha256),
            other => Err(malformed(&format!("unsupported digest algorithm {}", other))),
        }
    }

    /// Length in bytes of a digest produced by this algorithm.
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
        }
    }
}

/// Cryptographic digest of an image's full contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl ImageDigest {
    /// Wrap an existing digest. The length must match the algorithm, so a
    /// placeholder or empty digest cannot be constructed.
    pub fn new(algorithm: DigestAlgorithm, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != algorithm.output_len() {
            return Err(Error::Configuration(format!(
                "digest must be {} bytes for {:?}, got {}",
                algorithm.output_len(),
                algorithm,
                bytes.len()
            )));
        }
        Ok(Self { algorithm, bytes })
    }

    /// Digest a byte slice.
    pub fn sha256(data: &[u8]) -> Self {
        Self {
            algorithm: DigestAlgorithm::Sha256,
            bytes: Sha256::digest(data).to_vec(),
        }
    }

    /// Stream a file through SHA-256. Returns the number of bytes read
    /// together with the digest.
    pub fn sha256_file(path: &Path) -> Result<(u64, Self)> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let mut reader = BufReader::new(file);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; DIGEST_CHUNK_SIZE];
        let mut size: u64 = 0;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io(path, e)),
            };
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        let digest = Self {
            algorithm: DigestAlgorithm::Sha256,
            bytes: hasher.finalize().to_vec(),
        };
        Ok((size, digest))
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    fn to_value(&self) -> Value {
        Value::array([
            Value::from(self.algorithm.id()),
            Value::Bytes(self.bytes.clone()),
        ])
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value.as_array() {
            Some([alg, Value::Bytes(bytes)]) => {
                let alg = alg
                    .as_u64()
                    .ok_or_else(|| malformed("digest algorithm must be an unsigned integer"))?;
                Self::new(DigestAlgorithm::from_id(alg)?, bytes.clone())
                    .map_err(|e| malformed(&e.to_string()))
            }
            _ => Err(malformed("digest must be an [algorithm, bytes] pair")),
        }
    }
}

/// One slot's image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    size: u64,
    digest: ImageDigest,
    uri: String,
    conditions: Vec<Condition>,
}

impl Image {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> &ImageDigest {
        &self.digest
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Byte offset within the component this image is written to.
    pub fn offset(&self) -> Option<u64> {
        self.conditions.iter().find_map(|c| match c {
            Condition::ComponentOffset(offset) => Some(*offset),
            _ => None,
        })
    }

    fn to_value(&self) -> Value {
        Value::map([
            (Key::Int(IMAGE_KEY_SIZE), Value::from(self.size)),
            (Key::Int(IMAGE_KEY_DIGEST), self.digest.to_value()),
            (Key::Int(IMAGE_KEY_URI), Value::from(self.uri.as_str())),
            (
                Key::Int(IMAGE_KEY_CONDITIONS),
                Value::array(self.conditions.iter().map(|c| c.to_value())),
            ),
        ])
    }

    fn from_value(value: &Value) -> Result<Self> {
        let entries = value
            .as_map()
            .ok_or_else(|| malformed("image must be a map"))?;

        let mut size = None;
        let mut digest = None;
        let mut uri = None;
        let mut conditions = Vec::new();
        for (key, value) in entries {
            match key {
                Key::Int(IMAGE_KEY_SIZE) => {
                    size = Some(
                        value
                            .as_u64()
                            .ok_or_else(|| malformed("image size must be an unsigned integer"))?,
                    )
                }
                Key::Int(IMAGE_KEY_DIGEST) => digest = Some(ImageDigest::from_value(value)?),
                Key::Int(IMAGE_KEY_URI) => {
                    uri = Some(
                        value
                            .as_text()
                            .ok_or_else(|| malformed("image uri must be text"))?
                            .to_string(),
                    )
                }
                Key::Int(IMAGE_KEY_CONDITIONS) => conditions = conditions_from_value(value)?,
                other => return Err(malformed(&format!("unknown image key {}", other))),
            }
        }

        Ok(Image {
            size: size.ok_or_else(|| malformed("image missing size"))?,
            digest: digest.ok_or_else(|| malformed("image missing digest"))?,
            uri: uri.ok_or_else(|| malformed("image missing uri"))?,
            conditions,
        })
    }
}

/// An installable target holding one image per slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    identifier: Option<String>,
    images: Vec<Image>,
}

impl Component {
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    fn to_value(&self) -> Value {
        let mut entries = Vec::with_capacity(2);
        if let Some(id) = &self.identifier {
            entries.push((Key::Int(COMPONENT_KEY_IDENTIFIER), Value::from(id.as_str())));
        }
        entries.push((
            Key::Int(COMPONENT_KEY_IMAGES),
            Value::array(self.images.iter().map(Image::to_value)),
        ));
        Value::Map(entries)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let entries = value
            .as_map()
            .ok_or_else(|| malformed("component must be a map"))?;

        let mut identifier = None;
        let mut images = None;
        for (key, value) in entries {
            match key {
                Key::Int(COMPONENT_KEY_IDENTIFIER) => {
                    identifier = Some(
                        value
                            .as_text()
                            .ok_or_else(|| malformed("component identifier must be text"))?
                            .to_string(),
                    )
                }
                Key::Int(COMPONENT_KEY_IMAGES) => {
                    images = Some(
                        value
                            .as_array()
                            .ok_or_else(|| malformed("component images must be an array"))?
                            .iter()
                            .map(Image::from_value)
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                other => return Err(malformed(&format!("unknown component key {}", other))),
            }
        }

        Ok(Component {
            identifier,
            images: images.ok_or_else(|| malformed("component missing images"))?,
        })
    }
}

fn conditions_from_value(value: &Value) -> Result<Vec<Condition>> {
    value
        .as_array()
        .ok_or_else(|| malformed("conditions must be an array"))?
        .iter()
        .map(Condition::from_value)
        .collect()
}

/// A complete, immutable firmware-update manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    version: u64,
    sequence_number: u64,
    conditions: Vec<Condition>,
    components: Vec<Component>,
}

impl Manifest {
    /// Create a builder for assembling a manifest from a template.
    pub fn builder() -> ManifestBuilder {
        ManifestBuilder::new()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// All images of all components, in manifest order.
    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.components.iter().flat_map(|c| c.images.iter())
    }

    pub fn vendor_id(&self) -> Option<Uuid> {
        self.conditions.iter().find_map(|c| match c {
            Condition::VendorId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn class_id(&self) -> Option<Uuid> {
        self.conditions.iter().find_map(|c| match c {
            Condition::ClassId(id) => Some(*id),
            _ => None,
        })
    }

    /// Value tree handed to the canonical encoder.
    pub fn to_value(&self) -> Value {
        Value::map([
            (Key::Int(MANIFEST_KEY_VERSION), Value::from(self.version)),
            (
                Key::Int(MANIFEST_KEY_SEQUENCE_NUMBER),
                Value::from(self.sequence_number),
            ),
            (
                Key::Int(MANIFEST_KEY_CONDITIONS),
                Value::array(self.conditions.iter().map(|c| c.to_value())),
            ),
            (
                Key::Int(MANIFEST_KEY_COMPONENTS),
                Value::array(self.components.iter().map(Component::to_value)),
            ),
        ])
    }

    /// Canonical encoded manifest.
    pub fn encode(&self) -> Result<Vec<u8>> {
        wire::encode(&self.to_value())
    }

    /// Parse an encoded manifest. Unknown keys fail closed.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::from_value(&wire::decode(data)?)
    }

    /// Rebuild a manifest from its value tree.
    pub fn from_value(value: &Value) -> Result<Self> {
        let entries = value
            .as_map()
            .ok_or_else(|| malformed("manifest must be a map"))?;

        let mut version = None;
        let mut sequence_number = None;
        let mut conditions = Vec::new();
        let mut components = None;
        for (key, value) in entries {
            match key {
                Key::Int(MANIFEST_KEY_VERSION) => {
                    version = Some(
                        value
                            .as_u64()
                            .ok_or_else(|| malformed("version must be an unsigned integer"))?,
                    )
                }
                Key::Int(MANIFEST_KEY_SEQUENCE_NUMBER) => {
                    sequence_number = Some(value.as_u64().ok_or_else(|| {
                        malformed("sequence number must be an unsigned integer")
                    })?)
                }
                Key::Int(MANIFEST_KEY_CONDITIONS) => conditions = conditions_from_value(value)?,
                Key::Int(MANIFEST_KEY_COMPONENTS) => {
                    components = Some(
                        value
                            .as_array()
                            .ok_or_else(|| malformed("components must be an array"))?
                            .iter()
                            .map(Component::from_value)
                            .collect::<Result<Vec<_>>>()?,
                    )
                }
                other => return Err(malformed(&format!("unknown manifest key {}", other))),
            }
        }

        Ok(Manifest {
            version: version.ok_or_else(|| malformed("missing version"))?,
            sequence_number: sequence_number
                .ok_or_else(|| malformed("missing sequence number"))?,
            conditions,
            components: components.ok_or_else(|| malformed("missing components"))?,
        })
    }

    /// Acceptance check a device performs before installing.
    ///
    /// Requires the supported manifest version, a sequence number strictly
    /// greater than `current_sequence`, and vendor and class conditions that
    /// both match `device`.
    pub fn check(&self, device: &DeviceIdentity, current_sequence: u64) -> Result<()> {
        if self.version != MANIFEST_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }

        if self.sequence_number <= current_sequence {
            return Err(Error::StaleSequenceNumber {
                received: self.sequence_number,
                current: current_sequence,
            });
        }

        check_identifier("vendor-id", device.vendor_id, self.vendor_id())?;
        check_identifier("class-id", device.class_id, self.class_id())?;
        Ok(())
    }
}

fn check_identifier(condition: &'static str, expected: Uuid, actual: Option<Uuid>) -> Result<()> {
    match actual {
        Some(id) if id == expected => Ok(()),
        other => Err(Error::ConditionFailed {
            condition,
            expected: expected.simple().to_string(),
            actual: other.map_or_else(|| "none".to_string(), |id| id.simple().to_string()),
        }),
    }
}

/// Join the uri root with the file's base name.
fn image_uri(url_root: &str, path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::Configuration(format!("slot file {} has no usable file name", path.display()))
        })?;

    if url_root.is_empty() {
        Ok(name.to_string())
    } else if url_root.ends_with('/') {
        Ok(format!("{}{}", url_root, name))
    } else {
        Ok(format!("{}/{}", url_root, name))
    }
}

/// Builder that assembles a [`Manifest`] from a template and slot files.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    template: Option<ManifestTemplate>,
    url_root: Option<String>,
    images: Vec<PathBuf>,
    offsets: Vec<u64>,
    sequence_number: Option<u64>,
    identity: Option<DeviceIdentity>,
}

impl ManifestBuilder {
    /// Create a new manifest builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Template fixing the manifest shape.
    pub fn template(mut self, template: ManifestTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Root every image uri is built from.
    pub fn url_root(mut self, url_root: impl Into<String>) -> Self {
        self.url_root = Some(url_root.into());
        self
    }

    /// Add the file for the next slot.
    pub fn image(mut self, path: impl Into<PathBuf>) -> Self {
        self.images.push(path.into());
        self
    }

    /// Add files for the next slots, in slot order.
    pub fn images<P: Into<PathBuf>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.images.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Add the component offset for the next slot.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offsets.push(offset);
        self
    }

    /// Add component offsets for the next slots, in slot order.
    pub fn offsets(mut self, offsets: impl IntoIterator<Item = u64>) -> Self {
        self.offsets.extend(offsets);
        self
    }

    pub fn sequence_number(mut self, sequence_number: u64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    /// Vendor/class identity the manifest is bound to.
    pub fn identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Read and digest every slot file and assemble the manifest.
    ///
    /// Any mismatch or unreadable file aborts the build; nothing partial is
    /// ever returned.
    pub fn build(self) -> Result<Manifest> {
        let template = self
            .template
            .ok_or_else(|| Error::Configuration("missing field: template".to_string()))?;
        let url_root = self
            .url_root
            .ok_or_else(|| Error::Configuration("missing field: url_root".to_string()))?;
        let sequence_number = self
            .sequence_number
            .ok_or_else(|| Error::Configuration("missing field: sequence_number".to_string()))?;
        let identity = self
            .identity
            .ok_or_else(|| Error::Configuration("missing field: identity".to_string()))?;

        template.validate()?;
        if template.components.len() != 1 {
            return Err(Error::Configuration(format!(
                "template must have exactly one component, found {}",
                template.components.len()
            )));
        }
        if self.offsets.len() != self.images.len() {
            return Err(Error::Configuration(format!(
                "{} offsets supplied for {} slot files",
                self.offsets.len(),
                self.images.len()
            )));
        }
        if self.images.len() != template.slot_count() {
            return Err(Error::Configuration(format!(
                "template has {} slots but {} slot files were supplied",
                template.slot_count(),
                self.images.len()
            )));
        }

        let mut images = Vec::with_capacity(self.images.len());
        for (slot, (path, offset)) in self.images.iter().zip(&self.offsets).enumerate() {
            let uri = image_uri(&url_root, path)?;
            let (size, digest) = ImageDigest::sha256_file(path)?;
            debug!(
                slot,
                size,
                offset,
                digest = %digest.to_hex(),
                uri = %uri,
                "Digested slot image"
            );
            images.push(Image {
                size,
                digest,
                uri,
                conditions: vec![Condition::ComponentOffset(*offset)],
            });
        }

        let component_template = &template.components[0];
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            sequence_number,
            conditions: vec![
                Condition::VendorId(identity.vendor_id),
                Condition::ClassId(identity.class_id),
            ],
            components: vec![Component {
                identifier: component_template.identifier.clone(),
                images,
            }],
        };

        info!(
            sequence_number,
            slots = manifest.images().count(),
            identity = %identity,
            "Manifest assembled"
        );

        Ok(manifest)
    }
}
