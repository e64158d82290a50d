//! ECDSA key management
//!
//! Key pair generation, recoverable signing and address recovery using
//! the secp256k1 elliptic curve. Signatures use the packed Ethereum
//! form `{r(32)}{s(32)}{v(1)}` with `v` in `{27, 28}`, so the signer
//! address can be recovered from the digest and signature alone.

use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;
use zeroize::Zeroize;

use crate::crypto::hash::keccak256;
use crate::types::Address;

/// Length of a packed signature: 32-byte r, 32-byte s, 1-byte v
pub const SIGNATURE_LEN: usize = 65;

/// Errors raised when importing or using a signing credential
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SigningError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid private key hex")]
    InvalidPrivateKeyHex,
}

/// Errors raised when recovering a signer from a signature
///
/// Returned as a value rather than panicking so batch verification of
/// many signatures can report partial failure.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Invalid signature length: expected {SIGNATURE_LEN} bytes, got {got}")]
    InvalidLength { got: usize },
    #[error("Invalid recovery byte: {0} (expected 27 or 28)")]
    InvalidRecoveryByte(u8),
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),
}

/// A key pair consisting of a private scalar and its public key
///
/// Held in memory only for the signing call; never serialized by the
/// engine. Imported key material is zeroized after the scalar is
/// constructed.
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Import a key pair from a raw 32-byte private scalar
    ///
    /// The input buffer is zeroized before returning, on success and
    /// on failure.
    pub fn from_secret_bytes(bytes: &mut [u8; 32]) -> Result<Self, SigningError> {
        let result = SecretKey::from_slice(&bytes[..]).map_err(|_| SigningError::InvalidPrivateKey);
        bytes.zeroize();
        let secret_key = result?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Import a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, SigningError> {
        let stripped = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let mut decoded =
            hex::decode(stripped).map_err(|_| SigningError::InvalidPrivateKeyHex)?;
        if decoded.len() != 32 {
            decoded.zeroize();
            return Err(SigningError::InvalidPrivateKey);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Self::from_secret_bytes(&mut bytes)
    }

    /// The Ethereum address derived from the public key:
    /// `keccak256(uncompressed_pubkey)[12..32]`
    pub fn address(&self) -> Address {
        public_key_to_address(&self.public_key)
    }

    /// Get the public key in uncompressed form (65 bytes, 0x04 prefix)
    pub fn public_key_bytes(&self) -> [u8; 65] {
        self.public_key.serialize_uncompressed()
    }

    /// Sign a 32-byte digest, producing a recoverable packed signature
    ///
    /// Always produces a signature that [`recover`] maps back to
    /// [`KeyPair::address`]; the credential was validated at import.
    pub fn sign(&self, digest: &[u8; 32]) -> Signature {
        let secp = Secp256k1::new();
        let message = Message::from_digest(*digest);
        let recoverable = secp.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = recoverable.serialize_compact();

        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..64].copy_from_slice(&compact);
        bytes[64] = 27 + recovery_id.to_i32() as u8;

        Signature {
            signer: self.address(),
            digest: *digest,
            bytes,
        }
    }
}

/// Derive the Ethereum address of a public key
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    // Skip the 0x04 marker; address is the last 20 bytes of the hash
    let hash = keccak256(&uncompressed[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}

/// Recover the address that signed `digest` from a packed signature
pub fn recover(digest: &[u8; 32], signature: &[u8]) -> Result<Address, VerificationError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(VerificationError::InvalidLength {
            got: signature.len(),
        });
    }
    let v = signature[64];
    if v != 27 && v != 28 {
        return Err(VerificationError::InvalidRecoveryByte(v));
    }
    let recovery_id = RecoveryId::from_i32((v - 27) as i32)
        .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|e| VerificationError::MalformedSignature(e.to_string()))?;

    let secp = Secp256k1::new();
    let message = Message::from_digest(*digest);
    let public_key = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| VerificationError::RecoveryFailed(e.to_string()))?;
    Ok(public_key_to_address(&public_key))
}

/// A signature over an operation digest, immutable once produced
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Address of the signer, as claimed at signing time
    pub signer: Address,
    /// The 32-byte digest that was signed
    pub digest: [u8; 32],
    /// Packed `r || s || v` signature bytes
    pub bytes: [u8; SIGNATURE_LEN],
}

impl Signature {
    /// Rebuild a signature value from packed bytes, recovering the signer
    pub fn from_packed(digest: [u8; 32], bytes: [u8; SIGNATURE_LEN]) -> Result<Self, VerificationError> {
        let signer = recover(&digest, &bytes)?;
        Ok(Signature {
            signer,
            digest,
            bytes,
        })
    }

    /// The r component (first 32 bytes)
    pub fn r(&self) -> &[u8] {
        &self.bytes[..32]
    }

    /// The s component (second 32 bytes)
    pub fn s(&self) -> &[u8] {
        &self.bytes[32..64]
    }

    /// The recovery byte
    pub fn v(&self) -> u8 {
        self.bytes[64]
    }

    /// Check the bytes recover exactly the claimed signer over the
    /// claimed digest
    pub fn verify(&self) -> Result<(), VerificationError> {
        let recovered = recover(&self.digest, &self.bytes)?;
        if recovered != self.signer {
            return Err(VerificationError::RecoveryFailed(format!(
                "recovered {} but signature claims {}",
                recovered, self.signer
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signature")
            .field("signer", &self.signer)
            .field("digest", &hex::encode(self.digest))
            .field("bytes", &hex::encode(self.bytes))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::keccak256;

    #[test]
    fn test_known_address_derivation() {
        // Private key 0x...01 has a well-known address
        let kp = KeyPair::from_private_key_hex(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(
            kp.address().to_checksum(),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn test_sign_and_recover() {
        let kp = KeyPair::generate();
        let digest = keccak256(b"operation to authorize");

        let sig = kp.sign(&digest);
        assert_eq!(sig.signer, kp.address());
        assert_eq!(recover(&digest, &sig.bytes).unwrap(), kp.address());
        sig.verify().unwrap();
    }

    #[test]
    fn test_recover_rejects_bad_length() {
        let digest = keccak256(b"msg");
        assert_eq!(
            recover(&digest, &[0u8; 64]),
            Err(VerificationError::InvalidLength { got: 64 })
        );
    }

    #[test]
    fn test_recover_rejects_bad_recovery_byte() {
        let kp = KeyPair::generate();
        let digest = keccak256(b"msg");
        let mut bytes = kp.sign(&digest).bytes;
        bytes[64] = 99;
        assert_eq!(
            recover(&digest, &bytes),
            Err(VerificationError::InvalidRecoveryByte(99))
        );
    }

    #[test]
    fn test_tampered_digest_recovers_different_address() {
        let kp = KeyPair::generate();
        let digest = keccak256(b"original");
        let sig = kp.sign(&digest);

        let other = keccak256(b"tampered");
        // Recovery over the wrong digest either fails or yields some
        // other address; it must never return the signer.
        match recover(&other, &sig.bytes) {
            Ok(addr) => assert_ne!(addr, kp.address()),
            Err(_) => {}
        }
    }

    #[test]
    fn test_import_rejects_invalid_keys() {
        assert!(KeyPair::from_private_key_hex("not hex").is_err());
        assert!(KeyPair::from_private_key_hex("abcd").is_err());
        // Zero is outside the curve order
        assert_eq!(
            KeyPair::from_private_key_hex(
                "0000000000000000000000000000000000000000000000000000000000000000",
            )
            .err(),
            Some(SigningError::InvalidPrivateKey)
        );
    }

    #[test]
    fn test_from_secret_bytes_zeroizes_input() {
        let kp = KeyPair::generate();
        let hex_key = hex::encode(kp.public_key_bytes());
        assert_eq!(hex_key.len(), 130);

        let mut bytes = [1u8; 32];
        let _ = KeyPair::from_secret_bytes(&mut bytes).unwrap();
        assert_eq!(bytes, [0u8; 32]);
    }
}
