//! Cryptographic primitives for the engine
//!
//! This module provides:
//! - Keccak-256 hashing (digests, selectors, address derivation)
//! - ECDSA key management and recoverable signatures (secp256k1)

pub mod hash;
pub mod keys;

pub use hash::{keccak256, keccak256_concat, keccak256_hex, selector};
pub use keys::{
    public_key_to_address, recover, KeyPair, Signature, SigningError, VerificationError,
    SIGNATURE_LEN,
};
