//! Engine configuration
//!
//! Supplied by the surrounding application: where the node is, which
//! chain the engine signs for, and which multisig contract is
//! authoritative.

use std::time::Duration;

use crate::types::Address;

/// Configuration for constructing the live node gateway
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// JSON-RPC endpoint of the Ethereum node
    pub node_url: String,
    /// Chain identifier every transaction and operation digest is
    /// bound to
    pub chain_id: u64,
    /// The multisig contract whose owner/threshold state is
    /// authoritative, when one is configured
    pub safe_address: Option<Address>,
    /// Per-call timeout for node requests
    pub timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_url: "http://localhost:8545".to_string(),
            chain_id: 1337,
            safe_address: None,
            timeout: Duration::from_secs(10),
        }
    }
}
