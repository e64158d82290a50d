//! Multisignature operations and policy evaluation
//!
//! Provides the Safe-style M-of-N operation model: the EIP-712 digest
//! the owners sign, the packed signature calldata form, and the local
//! policy evaluator that checks a signature set against the on-chain
//! owner set and threshold before anything is submitted.
//!
//! # Example
//!
//! ```ignore
//! use eth_multisig_core::multisig::{evaluate, Evaluation, PolicySnapshot};
//!
//! let policy = PolicySnapshot::new(owners, 2)?;
//! let digest = safe_tx.digest();
//! match evaluate(&digest, &signatures, &policy) {
//!     Evaluation::Satisfied => { /* submit */ }
//!     Evaluation::Insufficient { missing } => { /* collect more */ }
//!     Evaluation::Invalid(reason) => { /* reject */ }
//! }
//! ```

pub mod policy;
pub mod safe_tx;

pub use policy::{evaluate, Evaluation, InvalidReason, PolicyError, PolicySnapshot};
pub use safe_tx::{
    exec_transaction_selector, pack_signatures, split_signatures, Operation, SafeTransaction,
    SignatureDataError, GAS_CALL_DATA_BYTE,
};
