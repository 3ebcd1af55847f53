//! Vendor and class identifiers.
//!
//! Both are RFC 4122 name-based (version 5) UUIDs: the vendor id is derived
//! from the DNS namespace and the vendor name, the class id from the vendor
//! id and the class name. A device only accepts manifests whose conditions
//! carry its own pair, so the derivation must never change.

use uuid::Uuid;

/// Derive a name-based identifier: SHA-1 over `namespace || name`, truncated
/// to 128 bits with the version (5) and variant bits set.
pub fn derive(namespace: &Uuid, name: impl AsRef<[u8]>) -> Uuid {
    Uuid::new_v5(namespace, name.as_ref())
}

/// The vendor/class identity a manifest is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: Uuid,
    pub class_id: Uuid,
}

impl DeviceIdentity {
    /// Derive both identifiers from human-readable names.
    pub fn derive(vendor: &str, class: &str) -> Self {
        let vendor_id = derive(&Uuid::NAMESPACE_DNS, vendor);
        let class_id = derive(&vendor_id, class);
        Self {
            vendor_id,
            class_id,
        }
    }

    /// Use identifiers that were derived elsewhere.
    pub fn new(vendor_id: Uuid, class_id: Uuid) -> Self {
        Self {
            vendor_id,
            class_id,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vendor={} class={}",
            self.vendor_id.simple(),
            self.class_id.simple()
        )
    }
}
