//! Ethereum transaction and multisig signature engine
//!
//! This crate provides the core of a Safe-style multisig stack:
//! - Canonical RLP encoding/decoding of legacy transactions with
//!   EIP-155 replay protection
//! - Keccak-256 digests and recoverable secp256k1 signatures
//! - EIP-712 operation hashing and local evaluation of signature sets
//!   against an on-chain owner/threshold policy
//! - A swappable node gateway with a live JSON-RPC client and a
//!   deterministic in-memory chain for tests
//!
//! The engine is stateless between operations: nonces and policy
//! snapshots are read fresh from the chain, nothing is persisted, and
//! failed submissions are surfaced to the caller instead of being
//! retried.
//!
//! # Example
//!
//! ```ignore
//! use eth_multisig_core::gateway::SimulatedChain;
//! use eth_multisig_core::multisig::Operation;
//! use eth_multisig_core::safe::Safe;
//!
//! let chain = SimulatedChain::new(1337);
//! let owners = chain.spawn_funded_accounts(3, 10u128.pow(18)).await;
//! let safe_address = chain
//!     .deploy_safe(owners.iter().map(|k| k.address()).collect(), 2)
//!     .await?;
//!
//! let safe = Safe::new(safe_address, 1337, chain);
//! let safe_tx = safe
//!     .build_transaction(recipient, value, vec![], Operation::Call, None)
//!     .await?;
//!
//! let digest = safe_tx.digest();
//! let signatures = vec![owners[0].sign(&digest), owners[1].sign(&digest)];
//! let tx_hash = safe.execute(&safe_tx, &signatures, &submitter, gas_price).await?;
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod gateway;
pub mod multisig;
pub mod safe;
pub mod types;

// Re-export commonly used types
pub use codec::{CodecError, SignedTransaction, Transaction};
pub use config::EngineConfig;
pub use crypto::{KeyPair, Signature, SigningError, VerificationError};
pub use gateway::{
    GatewayError, NodeGateway, Receipt, ReceiptLookup, RejectionReason, RpcClient, SimulatedChain,
};
pub use multisig::{Evaluation, Operation, PolicySnapshot, SafeTransaction};
pub use safe::{Safe, SafeError};
pub use types::{Address, TxHash};
