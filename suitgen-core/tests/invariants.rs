//! Property-based tests for the encoding and signing invariants.
//!
//! 1. Determinism - equal trees give equal bytes regardless of map order
//! 2. Canonical form - output re-encodes to itself, keys in bytewise order
//! 3. Shortest heads - integers use the smallest possible head
//! 4. Round trip - manifests and values survive encode/decode
//! 5. Signature integrity - envelopes are reproducible and tamper-evident

use proptest::prelude::*;
use suitgen::{
    cose, parse_offset, wire, DeviceIdentity, Error, Key, Manifest, ManifestTemplate, SignedEnvelope,
    SigningKey, Value,
};

// ============================================================================
// Strategies for generating test data
// ============================================================================

fn arb_key() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Int),
        "[a-z]{1,8}".prop_map(Key::Text),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<u64>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        "[a-zA-Z0-9 /:]{0,24}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(any::<i64>(), inner.clone(), 0..6).prop_map(|m| {
                Value::Map(m.into_iter().map(|(k, v)| (Key::Int(k), v)).collect())
            }),
            prop::collection::btree_map("[a-z]{1,8}", inner.clone(), 0..6).prop_map(|m| {
                Value::Map(m.into_iter().map(|(k, v)| (Key::Text(k), v)).collect())
            }),
            (0u64..64, inner).prop_map(|(tag, v)| Value::Tag(tag, Box::new(v))),
        ]
    })
}

/// Map entries with unique keys, in arbitrary order.
fn arb_entries() -> impl Strategy<Value = Vec<(Key, u64)>> {
    prop::collection::vec((arb_key(), any::<u64>()), 0..12).prop_map(|entries| {
        let mut seen = Vec::new();
        entries
            .into_iter()
            .filter(|(k, _)| {
                if seen.contains(k) {
                    false
                } else {
                    seen.push(k.clone());
                    true
                }
            })
            .collect()
    })
}

/// Whether the tree holds a bignum tag (2 or 3), which the encoder refuses.
fn has_bignum_tag(value: &Value) -> bool {
    match value {
        Value::Tag(2 | 3, _) => true,
        Value::Tag(_, inner) => has_bignum_tag(inner),
        Value::Array(items) => items.iter().any(has_bignum_tag),
        Value::Map(entries) => entries.iter().any(|(_, v)| has_bignum_tag(v)),
        _ => false,
    }
}

fn expected_head_len(n: u64) -> usize {
    match n {
        0..=23 => 1,
        24..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

// ============================================================================
// Invariant 1 & 2: Determinism and canonical form
// ============================================================================

proptest! {
    /// Insertion order of map entries never changes the encoding.
    #[test]
    fn map_order_does_not_change_bytes(entries in arb_entries()) {
        let forward = Value::map(entries.clone());
        let reversed = Value::map(entries.into_iter().rev());
        prop_assert_eq!(wire::encode(&forward).unwrap(), wire::encode(&reversed).unwrap());
    }

    /// Encoded map keys appear in bytewise order of their encodings.
    #[test]
    fn encoded_keys_are_sorted(entries in arb_entries()) {
        let bytes = wire::encode(&Value::map(entries)).unwrap();
        let decoded = wire::decode(&bytes).unwrap();
        let keys: Vec<Vec<u8>> = decoded
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| wire::encode_key(k).unwrap())
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(keys, sorted);
    }

    /// Encoder output is canonical and decodes to the canonicalized input;
    /// trees holding bignum tags are refused outright.
    #[test]
    fn encode_is_canonical(value in arb_value()) {
        if has_bignum_tag(&value) {
            prop_assert!(matches!(wire::encode(&value), Err(Error::Encoding(_))));
            return Ok(());
        }
        let bytes = wire::encode(&value).unwrap();
        prop_assert!(wire::is_canonical(&bytes).unwrap());
        let decoded = wire::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, value.canonicalize().unwrap());
    }

    /// Canonicalizing is idempotent.
    #[test]
    fn canonicalize_is_idempotent(value in arb_value()) {
        let once = value.canonicalize().unwrap();
        prop_assert_eq!(once.clone().canonicalize().unwrap(), once);
    }
}

// ============================================================================
// Invariant 3: Shortest heads
// ============================================================================

proptest! {
    #[test]
    fn unsigned_integers_use_shortest_head(n in any::<u64>()) {
        let bytes = wire::encode(&Value::from(n)).unwrap();
        prop_assert_eq!(bytes.len(), expected_head_len(n));
        prop_assert_eq!(bytes[0] >> 5, 0);
    }

    #[test]
    fn negative_integers_use_shortest_head(n in i64::MIN..0i64) {
        let bytes = wire::encode(&Value::from(n)).unwrap();
        // -1 - n is the encoded argument
        let argument = (-1i128 - i128::from(n)) as u64;
        prop_assert_eq!(bytes.len(), expected_head_len(argument));
        prop_assert_eq!(bytes[0] >> 5, 1);
    }

    #[test]
    fn offsets_parse_in_both_bases(n in any::<u64>()) {
        prop_assert_eq!(parse_offset(&n.to_string()).unwrap(), n);
        prop_assert_eq!(parse_offset(&format!("0x{:x}", n)).unwrap(), n);
    }
}

// ============================================================================
// Invariant 4 & 5: Manifest round trip and signature integrity
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn manifest_roundtrip(
        sizes in prop::collection::vec(0usize..4096, 1..4),
        seq in any::<u64>(),
        vendor in "[a-z]{1,12}",
        class in "[a-z]{1,12}",
    ) {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (slot, size) in sizes.iter().enumerate() {
            let path = dir.path().join(format!("slot{}.bin", slot));
            std::fs::write(&path, vec![slot as u8; *size]).unwrap();
            paths.push(path);
        }
        let offsets: Vec<u64> = (0..sizes.len() as u64).map(|i| i * 0x1000).collect();

        let manifest = Manifest::builder()
            .template(ManifestTemplate::with_slots(sizes.len()))
            .url_root("coap://host/fw")
            .images(paths)
            .offsets(offsets.clone())
            .sequence_number(seq)
            .identity(DeviceIdentity::derive(&vendor, &class))
            .build()
            .unwrap();

        let bytes = manifest.encode().unwrap();
        prop_assert!(wire::is_canonical(&bytes).unwrap());
        let decoded = Manifest::decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &manifest);

        let decoded_sizes: Vec<u64> = decoded.images().map(|i| i.size()).collect();
        let expected_sizes: Vec<u64> = sizes.iter().map(|s| *s as u64).collect();
        prop_assert_eq!(decoded_sizes, expected_sizes);
        let decoded_offsets: Vec<Option<u64>> = decoded.images().map(|i| i.offset()).collect();
        prop_assert_eq!(decoded_offsets, offsets.into_iter().map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn envelopes_are_reproducible_and_tamper_evident(
        seed in any::<[u8; 32]>(),
        payload in prop::collection::vec(any::<u8>(), 1..256),
        flip in any::<prop::sample::Index>(),
    ) {
        let key = SigningKey::from_bytes(&seed);
        let first = cose::sign(&payload, b"kid", &key).unwrap();
        let second = cose::sign(&payload, b"kid", &key).unwrap();
        prop_assert_eq!(first.to_bytes().unwrap(), second.to_bytes().unwrap());
        prop_assert!(first.verify(&key.public_key()).is_ok());

        let mut tampered = payload.clone();
        let index = flip.index(tampered.len());
        tampered[index] ^= 0x80;
        let resigned = cose::sign(&tampered, b"kid", &key).unwrap();
        prop_assert_ne!(resigned.signature(), first.signature());

        let forged = SignedEnvelope::from_bytes(
            &wire::encode(&Value::array([
                Value::Bytes(first.protected_bytes().to_vec()),
                Value::Map(vec![]),
                Value::Bytes(tampered),
                Value::Bytes(first.signature().to_vec()),
            ]))
            .unwrap(),
        )
        .unwrap();
        prop_assert!(forged.verify(&key.public_key()).is_err());
    }
}

#[test]
fn identity_is_stable_for_equal_names() {
    for (vendor, class) in [("acme", "widget"), ("globex", "gadget")] {
        let identity = DeviceIdentity::derive(vendor, class);
        assert_eq!(identity, DeviceIdentity::derive(vendor, class));
        assert_eq!(identity.vendor_id.get_version_num(), 5);
        assert_eq!(identity.class_id.get_version_num(), 5);
    }
}
