//! Deterministic in-memory chain
//!
//! A test double for a real node: pre-funded accounts, a configurable
//! block gas limit, instant mining and a registry of deployed multisig
//! policies. `submit` runs raw bytes through the real codec, recovers
//! the sender and applies the same acceptance rules a node would, so
//! the whole engine can be exercised without a network.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::Mutex;

use crate::codec::transaction::{tx_hash, SignedTransaction};
use crate::crypto::hash::keccak256;
use crate::crypto::KeyPair;
use crate::gateway::{
    CallRequest, GatewayError, NodeGateway, Receipt, ReceiptLookup, RejectionReason,
};
use crate::multisig::{
    exec_transaction_selector, PolicyError, PolicySnapshot, GAS_CALL_DATA_BYTE,
};
use crate::types::{Address, TxHash};

/// Default block gas limit, matching the local test chain the engine
/// is validated against
pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 10_000_000_000;

/// Base cost of any transaction
const INTRINSIC_GAS: u64 = 21_000;

#[derive(Debug, Default, Clone)]
struct AccountState {
    balance: u128,
    nonce: u64,
}

#[derive(Default)]
struct ChainState {
    accounts: HashMap<Address, AccountState>,
    safes: HashMap<Address, PolicySnapshot>,
    safe_nonces: HashMap<Address, u64>,
    receipts: HashMap<TxHash, Receipt>,
    seen: HashSet<TxHash>,
    block_number: u64,
}

/// In-memory chain simulator
pub struct SimulatedChain {
    chain_id: u64,
    block_gas_limit: u64,
    state: Mutex<ChainState>,
}

impl SimulatedChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            block_gas_limit: DEFAULT_BLOCK_GAS_LIMIT,
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn with_block_gas_limit(mut self, block_gas_limit: u64) -> Self {
        self.block_gas_limit = block_gas_limit;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Credit an account, creating it if needed
    pub async fn fund(&self, address: Address, balance: u128) {
        let mut state = self.state.lock().await;
        state.accounts.entry(address).or_default().balance += balance;
    }

    /// Generate `count` key pairs, each funded with `balance` wei
    pub async fn spawn_funded_accounts(&self, count: usize, balance: u128) -> Vec<KeyPair> {
        let mut keys = Vec::with_capacity(count);
        let mut state = self.state.lock().await;
        for _ in 0..count {
            let kp = KeyPair::generate();
            state.accounts.insert(
                kp.address(),
                AccountState {
                    balance,
                    nonce: 0,
                },
            );
            keys.push(kp);
        }
        keys
    }

    /// Deploy a multisig policy at a deterministic pseudo-address
    pub async fn deploy_safe(
        &self,
        owners: Vec<Address>,
        threshold: usize,
    ) -> Result<Address, PolicyError> {
        let policy = PolicySnapshot::new(owners, threshold)?;
        let mut preimage = Vec::new();
        for owner in policy.owners() {
            preimage.extend_from_slice(owner.as_bytes());
        }
        preimage.extend_from_slice(&(policy.threshold() as u64).to_be_bytes());
        let hash = keccak256(&preimage);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        let address = Address::from_bytes(bytes);

        let mut state = self.state.lock().await;
        state.safes.insert(address, policy);
        info!("deployed simulated safe at {address}");
        Ok(address)
    }

    /// Replace the policy of a deployed safe, modelling an on-chain
    /// owner or threshold change between snapshot and submission
    pub async fn set_policy(&self, safe: Address, policy: PolicySnapshot) {
        let mut state = self.state.lock().await;
        state.safes.insert(safe, policy);
    }

    fn data_gas(data: &[u8]) -> u64 {
        data.iter()
            .map(|&b| if b == 0 { 4 } else { GAS_CALL_DATA_BYTE })
            .sum()
    }
}

#[async_trait]
impl NodeGateway for SimulatedChain {
    async fn get_nonce(&self, address: Address) -> Result<u64, GatewayError> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(&address).map(|a| a.nonce).unwrap_or(0))
    }

    async fn get_balance(&self, address: Address) -> Result<u128, GatewayError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or(0))
    }

    async fn get_policy(&self, safe: Address) -> Result<PolicySnapshot, GatewayError> {
        let state = self.state.lock().await;
        state
            .safes
            .get(&safe)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("no contract at {safe}")))
    }

    async fn get_safe_nonce(&self, safe: Address) -> Result<u64, GatewayError> {
        let state = self.state.lock().await;
        if !state.safes.contains_key(&safe) {
            return Err(GatewayError::InvalidResponse(format!("no contract at {safe}")));
        }
        Ok(state.safe_nonces.get(&safe).copied().unwrap_or(0))
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, GatewayError> {
        let state = self.state.lock().await;
        let contract_overhead = match call.to {
            Some(to) if state.safes.contains_key(&to) => 30_000,
            _ => 0,
        };
        Ok(INTRINSIC_GAS + Self::data_gas(&call.data) + contract_overhead)
    }

    async fn submit(&self, raw_tx: &[u8]) -> Result<TxHash, GatewayError> {
        let signed = SignedTransaction::decode(raw_tx).map_err(|e| {
            GatewayError::ChainRejected(RejectionReason::Other(format!("invalid rlp: {e}")))
        })?;
        let tx = &signed.tx;
        if tx.chain_id != self.chain_id {
            return Err(GatewayError::ChainRejected(RejectionReason::Other(
                format!("invalid chain id: expected {}, got {}", self.chain_id, tx.chain_id),
            )));
        }
        let sender = signed.sender().map_err(|e| {
            GatewayError::ChainRejected(RejectionReason::Other(format!("invalid signature: {e}")))
        })?;
        let hash = tx_hash(raw_tx);

        let mut state = self.state.lock().await;
        if state.seen.contains(&hash) {
            return Err(GatewayError::ChainRejected(RejectionReason::AlreadyKnown));
        }
        if tx.gas_limit > self.block_gas_limit {
            return Err(GatewayError::ChainRejected(
                RejectionReason::GasLimitExceeded,
            ));
        }
        let gas_used = INTRINSIC_GAS + Self::data_gas(&tx.data);
        if gas_used > tx.gas_limit {
            return Err(GatewayError::ChainRejected(RejectionReason::Other(
                "intrinsic gas too low".to_string(),
            )));
        }

        let account = state.accounts.entry(sender).or_default().clone();
        if tx.nonce < account.nonce {
            return Err(GatewayError::ChainRejected(RejectionReason::NonceTooLow));
        }
        if tx.nonce > account.nonce {
            return Err(GatewayError::ChainRejected(RejectionReason::Other(
                format!("nonce gap: expected {}, got {}", account.nonce, tx.nonce),
            )));
        }
        let cost = (tx.gas_limit as u128)
            .checked_mul(tx.gas_price)
            .and_then(|gas_cost| tx.value.checked_add(gas_cost))
            .ok_or_else(|| {
                GatewayError::ChainRejected(RejectionReason::InsufficientFunds)
            })?;
        if account.balance < cost {
            return Err(GatewayError::ChainRejected(
                RejectionReason::InsufficientFunds,
            ));
        }

        // Accepted: apply and mine instantly
        let charged = tx.value + gas_used as u128 * tx.gas_price;
        {
            let sender_state = state.accounts.entry(sender).or_default();
            sender_state.balance -= charged;
            sender_state.nonce += 1;
        }
        if let Some(to) = tx.to {
            state.accounts.entry(to).or_default().balance += tx.value;
            // A mined `execTransaction` advances the contract's
            // operation nonce, invalidating the executed digest
            if state.safes.contains_key(&to)
                && tx.data.get(..4) == Some(exec_transaction_selector().as_slice())
            {
                *state.safe_nonces.entry(to).or_default() += 1;
            }
        }
        state.block_number += 1;
        let receipt = Receipt {
            tx_hash: hash,
            status: true,
            block_number: state.block_number,
            gas_used,
        };
        state.seen.insert(hash);
        state.receipts.insert(hash, receipt);
        debug!("mined {hash} from {sender} in block {}", state.block_number);
        Ok(hash)
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> Result<ReceiptLookup, GatewayError> {
        let state = self.state.lock().await;
        Ok(match state.receipts.get(&tx_hash) {
            Some(receipt) => ReceiptLookup::Mined(receipt.clone()),
            None => ReceiptLookup::NotFound,
        })
    }
}
