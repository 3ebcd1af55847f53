//! # suitgen
//!
//! Build, encode and sign firmware-update manifests for constrained devices.
//!
//! A manifest tells a device which firmware images to fetch, where to write
//! them, how to check their integrity, and whether the update is meant for
//! it at all. This crate assembles such manifests from a template and the
//! built image files, encodes them canonically, and wraps them in a
//! COSE_Sign1 envelope.
//!
//! ## Key Concepts
//!
//! - **Template**: fixes the manifest shape (components, number of slots)
//! - **Slot**: one image position; one file and one flash offset per slot
//! - **Canonical encoding**: deterministic CBOR, so equal manifests give
//!   equal bytes and signatures are reproducible
//! - **Envelope**: COSE_Sign1 over the encoded manifest (or a timestamp)
//!
//! ## Example
//!
//! ```rust,ignore
//! use suitgen::{cose, parse_offsets, DeviceIdentity, Manifest, ManifestTemplate, SigningKey};
//!
//! let manifest = Manifest::builder()
//!     .template(ManifestTemplate::from_file("template.json")?)
//!     .url_root("coap://[2001:db8::1]/fw")
//!     .images(["slot0.bin", "slot1.bin"])
//!     .offsets(parse_offsets("0,0x1000")?)
//!     .sequence_number(5)
//!     .identity(DeviceIdentity::derive("acme", "widget"))
//!     .build()?;
//!
//! let key = SigningKey::from_file("release.pem")?;
//! let envelope = cose::sign(&manifest.encode()?, b"release", &key)?;
//! std::fs::write("manifest.cose", envelope.to_bytes()?)?;
//! ```

pub mod config;
pub mod cose;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod template;
pub mod value;
pub mod wire;

pub use config::BuildConfig;
pub use cose::{ProtectedHeader, SignedEnvelope};
pub use crypto::{Algorithm, PublicKey, Signature, Signer, SigningKey, Verifier};
pub use error::{Error, ErrorCode, Result};
pub use identity::DeviceIdentity;
pub use manifest::{
    Component, Condition, DigestAlgorithm, Image, ImageDigest, Manifest, ManifestBuilder,
};
pub use template::{parse_offset, parse_offsets, ManifestTemplate};
pub use value::{Key, Value};
pub use wire::MAX_ENCODED_SIZE;

/// Manifest format version written into every manifest and the only one
/// accepted by [`Manifest::check`].
pub const MANIFEST_VERSION: u64 = 1;

/// Context string of a COSE_Sign1 `Sig_structure`.
pub const SIG_STRUCTURE_CONTEXT: &str = "Signature1";
