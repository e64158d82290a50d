//! Canonical transaction wire codec
//!
//! This module contains:
//! - A strict, minimal RLP encoder/decoder
//! - The legacy Ethereum transaction format with EIP-155 replay
//!   protection (unsigned preimage, sighash, signed wire form)
//!
//! Encoding and decoding are pure functions of their input; every
//! non-canonical byte sequence is rejected instead of being accepted
//! as an alternate spelling of the same transaction.

pub mod rlp;
pub mod transaction;

pub use rlp::CodecError;
pub use transaction::{tx_hash, SignedTransaction, Transaction, TransactionBuilder};
