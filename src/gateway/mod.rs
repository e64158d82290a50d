//! Node gateway: the capability "reachable Ethereum JSON-RPC endpoint"
//!
//! Everything the engine needs from a chain node goes through the
//! [`NodeGateway`] trait: account nonces and balances, the multisig
//! owner/threshold snapshot and operation nonce, gas estimation, raw
//! transaction submission and receipt lookup. Two variants are provided: a live
//! HTTP JSON-RPC client ([`rpc::RpcClient`]) and a deterministic
//! in-memory chain for tests ([`sim::SimulatedChain`]).
//!
//! The gateway never retries on its own. A transient
//! [`GatewayError::NodeUnavailable`] may be retried by the caller; a
//! [`GatewayError::ChainRejected`] is fatal for that nonce and blind
//! resubmission risks double-executing a state-changing call.

pub mod rpc;
pub mod sim;

use async_trait::async_trait;
use thiserror::Error;

use crate::multisig::PolicySnapshot;
use crate::types::{Address, TxHash};

pub use rpc::RpcClient;
pub use sim::SimulatedChain;

/// Why the node refused a submitted transaction
///
/// Classified from the node's error message the way geth and parity
/// phrase them, so callers can react without string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    /// The same raw transaction was already accepted
    AlreadyKnown,
    /// A transaction with this nonce is queued at a higher price
    ReplacementUnderpriced,
    /// The account nonce has already moved past this transaction
    NonceTooLow,
    /// Sender balance cannot cover value plus gas
    InsufficientFunds,
    /// Gas limit above what the chain accepts
    GasLimitExceeded,
    /// Anything else the node said
    Other(String),
}

impl RejectionReason {
    /// Map a node error message onto a reason
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("already imported") || lower.contains("already known") {
            RejectionReason::AlreadyKnown
        } else if lower.contains("replacement transaction underpriced")
            || lower.contains("same nonce in the queue")
        {
            RejectionReason::ReplacementUnderpriced
        } else if lower.contains("nonce too low") || lower.contains("correct nonce") {
            RejectionReason::NonceTooLow
        } else if lower.contains("insufficient funds") || lower.contains("enough funds") {
            RejectionReason::InsufficientFunds
        } else if lower.contains("exceeds block gas limit")
            || lower.contains("exceeds current gas limit")
        {
            RejectionReason::GasLimitExceeded
        } else {
            RejectionReason::Other(message.to_string())
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::AlreadyKnown => write!(f, "transaction already known"),
            RejectionReason::ReplacementUnderpriced => write!(f, "replacement underpriced"),
            RejectionReason::NonceTooLow => write!(f, "nonce too low"),
            RejectionReason::InsufficientFunds => write!(f, "insufficient funds"),
            RejectionReason::GasLimitExceeded => write!(f, "gas limit exceeded"),
            RejectionReason::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Errors raised by a node gateway
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection or timeout failure; transient, retryable by the caller
    #[error("Node unavailable: {0}")]
    NodeUnavailable(String),
    /// The node itself rejected a submitted transaction; fatal for
    /// that nonce, never retried by the engine
    #[error("Chain rejected transaction: {0}")]
    ChainRejected(RejectionReason),
    /// A JSON-RPC level error outside the submit path
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    /// The node answered with something the engine cannot interpret
    #[error("Invalid node response: {0}")]
    InvalidResponse(String),
}

/// A call described to the node for gas estimation
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: u128,
    pub data: Vec<u8>,
}

/// Result of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `true` when execution succeeded
    pub status: bool,
    pub block_number: u64,
    pub gas_used: u64,
}

/// Outcome of a receipt lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptLookup {
    /// Included in a block
    Mined(Receipt),
    /// Known to the node but not yet included
    Pending,
    /// The node has never seen this hash
    NotFound,
}

/// A reachable Ethereum JSON-RPC endpoint
///
/// Implementations must leave no partial local state on failure: any
/// error before `submit` returns success means the transaction was not
/// durably broadcast from the engine's point of view.
#[async_trait]
pub trait NodeGateway: Send + Sync {
    /// Next nonce for an account (pending-inclusive where supported)
    async fn get_nonce(&self, address: Address) -> Result<u64, GatewayError>;

    /// Account balance in wei
    async fn get_balance(&self, address: Address) -> Result<u128, GatewayError>;

    /// Owner set and threshold of a multisig contract, read fresh
    async fn get_policy(&self, safe: Address) -> Result<PolicySnapshot, GatewayError>;

    /// Current operation nonce of a multisig contract
    ///
    /// This is the contract's own `nonce()` counter, bumped once per
    /// executed operation. It is unrelated to the account transaction
    /// nonce of the contract address.
    async fn get_safe_nonce(&self, safe: Address) -> Result<u64, GatewayError>;

    /// Node-side gas estimate for a call
    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, GatewayError>;

    /// Broadcast raw signed transaction bytes, returning the
    /// transaction identifier
    async fn submit(&self, raw_tx: &[u8]) -> Result<TxHash, GatewayError>;

    /// Look up the receipt of a previously submitted transaction
    async fn get_receipt(&self, tx_hash: TxHash) -> Result<ReceiptLookup, GatewayError>;
}
