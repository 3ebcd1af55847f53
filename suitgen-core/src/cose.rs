//! COSE_Sign1 envelopes (RFC 9052) around encoded manifests and timestamps.
//!
//! Wire layout:
//!
//! ```text
//! protected      = bstr .cbor { 1: alg, 4: kid }
//! Sig_structure  = [ "Signature1", protected, h'', payload ]
//! COSE_Sign1     = [ protected, {}, payload, signature ]
//! ```
//!
//! The envelope is emitted untagged. Every step uses the canonical encoder,
//! so the same payload, key id and key always give the same envelope bytes.

use crate::crypto::{Algorithm, Signer, Verifier, SIGNATURE_LENGTH};
use crate::error::{Error, Result};
use crate::value::{Key, Value};
use crate::wire;
use crate::SIG_STRUCTURE_CONTEXT;
use tracing::{debug, warn};

/// Header label for the algorithm identifier.
pub const HEADER_ALG: i64 = 1;
/// Header label for the key identifier.
pub const HEADER_KID: i64 = 4;

/// Integrity-protected header of a signed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedHeader {
    pub algorithm: Algorithm,
    pub key_id: Vec<u8>,
}

impl ProtectedHeader {
    pub fn new(algorithm: Algorithm, key_id: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            key_id: key_id.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::map([
            (Key::Int(HEADER_ALG), Value::from(self.algorithm.cose_id())),
            (Key::Int(HEADER_KID), Value::Bytes(self.key_id.clone())),
        ])
    }

    /// Canonical header bytes, as carried in the envelope.
    pub fn encode(&self) -> Result<Vec<u8>> {
        wire::encode(&self.to_value())
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let value = wire::decode(data)?;
        let alg = value
            .get(&Key::Int(HEADER_ALG))
            .and_then(Value::as_integer)
            .and_then(|i| i64::try_from(i).ok())
            .ok_or_else(|| Error::Decoding("protected header missing algorithm".to_string()))?;
        let key_id = value
            .get(&Key::Int(HEADER_KID))
            .and_then(Value::as_bytes)
            .ok_or_else(|| Error::Decoding("protected header missing key id".to_string()))?;
        Ok(Self {
            algorithm: Algorithm::from_cose_id(alg)?,
            key_id: key_id.to_vec(),
        })
    }
}

/// Build the exact bytes that are signed.
pub fn sig_structure(protected: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    wire::encode(&Value::array([
        Value::from(SIG_STRUCTURE_CONTEXT),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(Vec::new()),
        Value::Bytes(payload.to_vec()),
    ]))
}

fn expected_signature_len(algorithm: Algorithm) -> usize {
    match algorithm {
        Algorithm::EdDsa => SIGNATURE_LENGTH,
    }
}

/// Sign `payload` (already encoded bytes) under `key_id`.
pub fn sign(payload: &[u8], key_id: &[u8], signer: &dyn Signer) -> Result<SignedEnvelope> {
    let header = ProtectedHeader::new(signer.algorithm(), key_id);
    let protected = header.encode()?;
    let to_be_signed = sig_structure(&protected, payload)?;

    let signature = signer
        .try_sign(&to_be_signed)
        .map_err(|e| match e {
            Error::Signing(_) => e,
            other => Error::Signing(other.to_string()),
        })?;

    let expected = expected_signature_len(header.algorithm);
    if signature.len() != expected {
        return Err(Error::Signing(format!(
            "signer returned {} bytes, expected {}",
            signature.len(),
            expected
        )));
    }

    debug!(
        payload_len = payload.len(),
        kid = %String::from_utf8_lossy(key_id),
        "Payload signed"
    );

    Ok(SignedEnvelope {
        protected,
        payload: payload.to_vec(),
        signature,
    })
}

/// Sign a standalone epoch timestamp (`tag 1` wrapping seconds).
pub fn sign_timestamp(
    epoch_secs: i64,
    key_id: &[u8],
    signer: &dyn Signer,
) -> Result<SignedEnvelope> {
    let payload = wire::encode(&Value::timestamp(epoch_secs))?;
    sign(&payload, key_id, signer)
}

/// A COSE_Sign1 envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    protected: Vec<u8>,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl SignedEnvelope {
    /// Serialized protected header bytes, exactly as signed.
    pub fn protected_bytes(&self) -> &[u8] {
        &self.protected
    }

    pub fn protected_header(&self) -> Result<ProtectedHeader> {
        ProtectedHeader::decode(&self.protected)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn to_value(&self) -> Value {
        Value::array([
            Value::Bytes(self.protected.clone()),
            Value::Map(Vec::new()),
            Value::Bytes(self.payload.clone()),
            Value::Bytes(self.signature.clone()),
        ])
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire::encode(&self.to_value())
    }

    /// Parse an envelope. Does not verify the signature.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value = wire::decode(data)?;
        match value.as_array() {
            Some(
                [Value::Bytes(protected), Value::Map(unprotected), Value::Bytes(payload), Value::Bytes(signature)],
            ) => {
                if !unprotected.is_empty() {
                    return Err(Error::Decoding(
                        "unprotected header must be empty".to_string(),
                    ));
                }
                Ok(Self {
                    protected: protected.clone(),
                    payload: payload.clone(),
                    signature: signature.clone(),
                })
            }
            _ => Err(Error::Decoding(
                "envelope must be [protected, unprotected, payload, signature]".to_string(),
            )),
        }
    }

    /// Check the signature against `verifier`.
    pub fn verify(&self, verifier: &dyn Verifier) -> Result<()> {
        let header = self.protected_header()?;
        if header.algorithm != verifier.algorithm() {
            return Err(Error::SignatureInvalid(format!(
                "envelope algorithm {:?} does not match key algorithm {:?}",
                header.algorithm,
                verifier.algorithm()
            )));
        }

        let to_be_signed = sig_structure(&self.protected, &self.payload)?;
        verifier
            .verify_signature(&to_be_signed, &self.signature)
            .map_err(|e| {
                warn!(error = %e, "Envelope signature rejected");
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKey;

    /// Deterministic stand-in that "signs" by repeating a byte.
    struct FixedSigner(usize);

    impl Signer for FixedSigner {
        fn algorithm(&self) -> Algorithm {
            Algorithm::EdDsa
        }

        fn try_sign(&self, _message: &[u8]) -> Result<Vec<u8>> {
            Ok(vec![0xAB; self.0])
        }
    }

    struct FailingSigner;

    impl Signer for FailingSigner {
        fn algorithm(&self) -> Algorithm {
            Algorithm::EdDsa
        }

        fn try_sign(&self, _message: &[u8]) -> Result<Vec<u8>> {
            Err(Error::Crypto("device unavailable".to_string()))
        }
    }

    #[test]
    fn test_protected_header_bytes() {
        let header = ProtectedHeader::new(Algorithm::EdDsa, b"test".to_vec());
        assert_eq!(
            header.encode().unwrap(),
            vec![0xa2, 0x01, 0x27, 0x04, 0x44, 0x74, 0x65, 0x73, 0x74]
        );
        assert_eq!(ProtectedHeader::decode(&header.encode().unwrap()).unwrap(), header);
    }

    #[test]
    fn test_sig_structure_layout() {
        let tbs = sig_structure(&[0xa0], &[0x01]).unwrap();
        let mut expected = vec![0x84, 0x6a];
        expected.extend_from_slice(b"Signature1");
        expected.extend_from_slice(&[0x41, 0xa0, 0x40, 0x41, 0x01]);
        assert_eq!(tbs, expected);
    }

    #[test]
    fn test_envelope_layout_with_fixed_signer() {
        let envelope = sign(&[0x01], b"k", &FixedSigner(64)).unwrap();
        let bytes = envelope.to_bytes().unwrap();

        // [bstr(protected), {}, bstr(payload), bstr(64)]
        let protected = ProtectedHeader::new(Algorithm::EdDsa, b"k".to_vec())
            .encode()
            .unwrap();
        let mut expected = vec![0x84, 0x40 + protected.len() as u8];
        expected.extend_from_slice(&protected);
        expected.extend_from_slice(&[0xa0, 0x41, 0x01, 0x58, 0x40]);
        expected.extend_from_slice(&[0xAB; 64]);
        assert_eq!(bytes, expected);
        assert_eq!(SignedEnvelope::from_bytes(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_wrong_signature_length_is_signing_error() {
        assert!(matches!(
            sign(b"payload", b"k", &FixedSigner(63)),
            Err(Error::Signing(_))
        ));
        assert!(matches!(
            sign(b"payload", b"k", &FailingSigner),
            Err(Error::Signing(_))
        ));
    }

    #[test]
    fn test_sign_and_verify_with_ed25519() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let envelope = sign(b"manifest bytes", b"release-key", &key).unwrap();
        assert!(envelope.verify(&key.public_key()).is_ok());
        assert_eq!(envelope.protected_header().unwrap().key_id, b"release-key");

        let other = SigningKey::from_bytes(&[8u8; 32]);
        assert!(matches!(
            envelope.verify(&other.public_key()),
            Err(Error::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let mut envelope = sign(b"manifest bytes", b"k", &key).unwrap();
        envelope.payload[0] ^= 0x01;
        assert!(envelope.verify(&key.public_key()).is_err());
    }

    #[test]
    fn test_signing_is_reproducible() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let a = sign(b"payload", b"k", &key).unwrap().to_bytes().unwrap();
        let b = sign(b"payload", b"k", &key).unwrap().to_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_timestamp_envelope() {
        let key = SigningKey::from_bytes(&[7u8; 32]);
        let envelope = sign_timestamp(1_700_000_000, b"time", &key).unwrap();
        assert_eq!(
            wire::decode(envelope.payload()).unwrap(),
            Value::timestamp(1_700_000_000)
        );
        assert!(envelope.verify(&key.public_key()).is_ok());
    }

    #[test]
    fn test_from_bytes_rejects_bad_shapes() {
        let not_array = wire::encode(&Value::from(1u64)).unwrap();
        assert!(matches!(
            SignedEnvelope::from_bytes(&not_array),
            Err(Error::Decoding(_))
        ));

        let with_unprotected = wire::encode(&Value::array([
            Value::Bytes(vec![0xa0]),
            Value::map([(Key::Int(4), Value::Bytes(vec![1]))]),
            Value::Bytes(vec![]),
            Value::Bytes(vec![0; 64]),
        ]))
        .unwrap();
        assert!(SignedEnvelope::from_bytes(&with_unprotected).is_err());
    }
}
