//! High-level multisig flow
//!
//! Binds one multisig contract address to a node gateway and walks a
//! logical operation end to end: build the operation against the
//! current contract nonce, check collected signatures against a fresh
//! policy snapshot, and submit the outer `execTransaction` call once
//! the policy is satisfied. Policy state is re-read on every call
//! because owners and threshold can change on-chain between
//! operations.

use log::{info, warn};
use thiserror::Error;

use crate::codec::Transaction;
use crate::config::EngineConfig;
use crate::crypto::keys::{KeyPair, Signature};
use crate::gateway::{CallRequest, GatewayError, NodeGateway};
use crate::multisig::{
    evaluate, pack_signatures, split_signatures, Evaluation, InvalidReason, Operation,
    PolicySnapshot, SafeTransaction, SignatureDataError,
};
use crate::types::{Address, TxHash};

/// Errors raised by the high-level flow
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SafeError {
    #[error("Operation targets safe {got}, engine is bound to {expected}")]
    WrongSafe { expected: Address, got: Address },
    #[error("Missing {missing} owner signature(s)")]
    InsufficientSignatures { missing: usize },
    #[error("Invalid signature set: {0}")]
    InvalidSignatures(#[from] InvalidReason),
    #[error(transparent)]
    SignatureData(#[from] SignatureDataError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// A multisig contract bound to a node gateway
pub struct Safe<G: NodeGateway> {
    address: Address,
    chain_id: u64,
    gateway: G,
}

impl<G: NodeGateway> Safe<G> {
    pub fn new(address: Address, chain_id: u64, gateway: G) -> Self {
        Self {
            address,
            chain_id,
            gateway,
        }
    }

    /// Bind to the safe named in the configuration, when one is set
    pub fn from_config(config: &EngineConfig, gateway: G) -> Option<Self> {
        config
            .safe_address
            .map(|address| Self::new(address, config.chain_id, gateway))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Fresh owner/threshold snapshot; never cached across operations
    pub async fn policy(&self) -> Result<PolicySnapshot, GatewayError> {
        self.gateway.get_policy(self.address).await
    }

    /// Build a multisig operation for the current contract nonce
    ///
    /// When `nonce` is absent the contract's own operation counter is
    /// read from the chain; this is not the account transaction nonce
    /// of the contract address. The gas fields are filled from a
    /// node-side estimate of the inner call plus the deterministic
    /// base-gas model.
    pub async fn build_transaction(
        &self,
        to: Address,
        value: u128,
        data: Vec<u8>,
        operation: Operation,
        nonce: Option<u64>,
    ) -> Result<SafeTransaction, GatewayError> {
        let nonce = match nonce {
            Some(nonce) => nonce,
            None => self.gateway.get_safe_nonce(self.address).await?,
        };
        let safe_tx_gas = self
            .gateway
            .estimate_gas(&CallRequest {
                from: Some(self.address),
                to: Some(to),
                value,
                data: data.clone(),
            })
            .await?;

        let mut safe_tx = SafeTransaction {
            safe: self.address,
            to,
            value,
            data,
            operation,
            safe_tx_gas,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
            chain_id: self.chain_id,
        };
        let threshold = self.policy().await?.threshold();
        safe_tx.base_gas = safe_tx.estimate_base_gas(threshold);
        Ok(safe_tx)
    }

    /// Evaluate packed signatures against the current on-chain policy
    pub async fn check_signatures(
        &self,
        safe_tx: &SafeTransaction,
        packed: &[u8],
    ) -> Result<Evaluation, SafeError> {
        let signatures = split_signatures(packed)?;
        let policy = self.policy().await?;
        Ok(evaluate(&safe_tx.digest(), &signatures, &policy))
    }

    /// Whether the safe can pay its own gas refund in ether
    pub async fn check_funds_for_tx_gas(
        &self,
        safe_tx: &SafeTransaction,
    ) -> Result<bool, GatewayError> {
        let balance = self.gateway.get_balance(self.address).await?;
        // A refund that does not fit in u128 wei cannot be covered
        let needed = (safe_tx.safe_tx_gas as u128 + safe_tx.base_gas as u128)
            .checked_mul(safe_tx.gas_price);
        Ok(matches!(needed, Some(needed) if balance >= needed))
    }

    /// Submit an operation once its signatures satisfy the policy
    ///
    /// Fails fast locally on an unsatisfied policy; the contract
    /// re-validates independently at execution time. Gateway errors
    /// are surfaced unchanged — in particular a
    /// [`GatewayError::ChainRejected`] is never retried here, since a
    /// blind resubmission can double-execute the inner call.
    pub async fn execute(
        &self,
        safe_tx: &SafeTransaction,
        signatures: &[Signature],
        sender: &KeyPair,
        gas_price: u128,
    ) -> Result<TxHash, SafeError> {
        if safe_tx.safe != self.address {
            return Err(SafeError::WrongSafe {
                expected: self.address,
                got: safe_tx.safe,
            });
        }

        let digest = safe_tx.digest();
        let packed = pack_signatures(signatures);
        let split = split_signatures(&packed)?;
        let policy = self.policy().await?;
        match evaluate(&digest, &split, &policy) {
            Evaluation::Satisfied => {}
            Evaluation::Insufficient { missing } => {
                warn!(
                    "refusing to submit: {missing} signature(s) short of {}",
                    policy.description()
                );
                return Err(SafeError::InsufficientSignatures { missing });
            }
            Evaluation::Invalid(reason) => {
                warn!("refusing to submit: {reason}");
                return Err(SafeError::InvalidSignatures(reason));
            }
        }

        let calldata = safe_tx.exec_transaction_calldata(&packed);
        let sender_nonce = self.gateway.get_nonce(sender.address()).await?;
        // Outer gas: inner call plus overhead, doubled for headroom;
        // saturate and let the node reject an absurd limit
        let gas_limit = safe_tx
            .safe_tx_gas
            .saturating_add(safe_tx.base_gas)
            .saturating_mul(2);
        let outer = Transaction::builder()
            .nonce(sender_nonce)
            .gas_price(gas_price)
            .gas_limit(gas_limit)
            .to(self.address)
            .value(0)
            .data(calldata)
            .chain_id(self.chain_id)
            .build();
        let signature = sender.sign(&outer.sighash());
        let raw = outer.encode_signed(&signature);

        let tx_hash = self.gateway.submit(&raw).await?;
        info!(
            "executed multisig operation {} via {tx_hash}",
            hex::encode(digest)
        );
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ReceiptLookup, RejectionReason, SimulatedChain};

    const ONE_ETHER: u128 = 1_000_000_000_000_000_000;

    /// A 2-of-3 safe on a simulated chain, with owners sorted by
    /// address and a funded submitter account
    async fn setup() -> (Safe<SimulatedChain>, Vec<KeyPair>, KeyPair) {
        let _ = env_logger::builder().is_test(true).try_init();
        let chain = SimulatedChain::new(1337);
        let mut owners = chain.spawn_funded_accounts(3, ONE_ETHER).await;
        owners.sort_by_key(|k| k.address());
        let submitter = chain.spawn_funded_accounts(1, ONE_ETHER).await.remove(0);

        let addresses: Vec<Address> = owners.iter().map(|k| k.address()).collect();
        let safe_address = chain.deploy_safe(addresses, 2).await.unwrap();
        chain.fund(safe_address, ONE_ETHER).await;

        (Safe::new(safe_address, 1337, chain), owners, submitter)
    }

    #[tokio::test]
    async fn test_build_fills_nonce_and_gas() {
        let (safe, owners, _) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[0].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();

        assert_eq!(safe_tx.nonce, 0);
        assert_eq!(safe_tx.chain_id, 1337);
        assert!(safe_tx.safe_tx_gas >= 21_000);
        assert!(safe_tx.base_gas > 32_000);
    }

    #[tokio::test]
    async fn test_execute_two_of_three() {
        let (safe, owners, submitter) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();

        let digest = safe_tx.digest();
        let sigs = vec![owners[0].sign(&digest), owners[1].sign(&digest)];

        let tx_hash = safe
            .execute(&safe_tx, &sigs, &submitter, 1_000_000_000)
            .await
            .unwrap();
        match safe.gateway().get_receipt(tx_hash).await.unwrap() {
            ReceiptLookup::Mined(receipt) => assert!(receipt.status),
            other => panic!("expected mined receipt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_operation_nonce_advances_after_execute() {
        let (safe, owners, submitter) = setup().await;
        let first = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();
        let digest = first.digest();
        let sigs = vec![owners[0].sign(&digest), owners[1].sign(&digest)];
        safe.execute(&first, &sigs, &submitter, 1_000_000_000)
            .await
            .unwrap();

        // The contract nonce moved, so the next operation gets a new
        // digest and the already-spent signatures no longer authorize it
        let second = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();
        assert_eq!(second.nonce, 1);
        assert_ne!(second.digest(), digest);
        assert!(safe
            .execute(&second, &sigs, &submitter, 1_000_000_000)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_execute_refuses_insufficient_signatures() {
        let (safe, owners, submitter) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();

        let sigs = vec![owners[0].sign(&safe_tx.digest())];
        assert_eq!(
            safe.execute(&safe_tx, &sigs, &submitter, 1_000_000_000)
                .await,
            Err(SafeError::InsufficientSignatures { missing: 1 })
        );
    }

    #[tokio::test]
    async fn test_execute_refuses_outsider_signature() {
        let (safe, owners, submitter) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();

        let outsider = KeyPair::generate();
        let digest = safe_tx.digest();
        let sigs = vec![owners[0].sign(&digest), outsider.sign(&digest)];
        assert_eq!(
            safe.execute(&safe_tx, &sigs, &submitter, 1_000_000_000)
                .await,
            Err(SafeError::InvalidSignatures(InvalidReason::UnknownSigner(
                outsider.address()
            )))
        );
    }

    #[tokio::test]
    async fn test_policy_change_between_snapshot_and_execute() {
        let (safe, owners, submitter) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();
        let digest = safe_tx.digest();
        let sigs = vec![owners[0].sign(&digest), owners[1].sign(&digest)];

        // Threshold is raised on-chain after the signatures were
        // collected; the fresh snapshot must catch it
        let raised = PolicySnapshot::new(
            owners.iter().map(|k| k.address()).collect(),
            3,
        )
        .unwrap();
        safe.gateway().set_policy(safe.address(), raised).await;

        assert_eq!(
            safe.execute(&safe_tx, &sigs, &submitter, 1_000_000_000)
                .await,
            Err(SafeError::InsufficientSignatures { missing: 1 })
        );
    }

    #[tokio::test]
    async fn test_check_signatures_round_trip() {
        let (safe, owners, _) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();
        let digest = safe_tx.digest();
        let packed = pack_signatures(&[owners[1].sign(&digest), owners[0].sign(&digest)]);

        assert_eq!(
            safe.check_signatures(&safe_tx, &packed).await.unwrap(),
            Evaluation::Satisfied
        );
        assert!(matches!(
            safe.check_signatures(&safe_tx, &packed[..64]).await,
            Err(SafeError::SignatureData(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_safe_rejected_locally() {
        let (safe, owners, submitter) = setup().await;
        let mut safe_tx = safe
            .build_transaction(owners[0].address(), 0, vec![], Operation::Call, None)
            .await
            .unwrap();
        safe_tx.safe = Address::ZERO;

        assert!(matches!(
            safe.execute(&safe_tx, &[], &submitter, 1).await,
            Err(SafeError::WrongSafe { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_funds_for_tx_gas() {
        let (safe, owners, _) = setup().await;
        let mut safe_tx = safe
            .build_transaction(owners[0].address(), 0, vec![], Operation::Call, None)
            .await
            .unwrap();

        safe_tx.gas_price = 1; // refund paid in ether, tiny price
        assert!(safe.check_funds_for_tx_gas(&safe_tx).await.unwrap());
        safe_tx.gas_price = u128::MAX / (safe_tx.safe_tx_gas as u128 + safe_tx.base_gas as u128);
        assert!(!safe.check_funds_for_tx_gas(&safe_tx).await.unwrap());
    }

    #[test]
    fn test_from_config_requires_safe_address() {
        let mut config = EngineConfig::default();
        assert!(Safe::from_config(&config, SimulatedChain::new(config.chain_id)).is_none());

        let address: Address = "0x3535353535353535353535353535353535353535"
            .parse()
            .unwrap();
        config.safe_address = Some(address);
        let safe = Safe::from_config(&config, SimulatedChain::new(config.chain_id)).unwrap();
        assert_eq!(safe.address(), address);
    }

    #[tokio::test]
    async fn test_adversarial_gas_values_do_not_overflow() {
        let (safe, owners, submitter) = setup().await;
        let mut safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();
        safe_tx.safe_tx_gas = u64::MAX;
        safe_tx.base_gas = u64::MAX;
        safe_tx.gas_price = u128::MAX;
        assert!(!safe.check_funds_for_tx_gas(&safe_tx).await.unwrap());

        let digest = safe_tx.digest();
        let sigs = vec![owners[0].sign(&digest), owners[1].sign(&digest)];
        assert_eq!(
            safe.execute(&safe_tx, &sigs, &submitter, 1).await,
            Err(SafeError::Gateway(GatewayError::ChainRejected(
                RejectionReason::GasLimitExceeded
            )))
        );
    }

    #[tokio::test]
    async fn test_chain_rejection_surfaces_unretried() {
        let (safe, owners, submitter) = setup().await;
        let safe_tx = safe
            .build_transaction(owners[2].address(), 1_000, vec![], Operation::Call, None)
            .await
            .unwrap();
        let digest = safe_tx.digest();
        let sigs = vec![owners[0].sign(&digest), owners[1].sign(&digest)];

        safe.execute(&safe_tx, &sigs, &submitter, 1_000_000_000)
            .await
            .unwrap();
        // Rebuild the outer transaction with the stale submitter
        // nonce (and a different gas price, so the raw bytes differ)
        // to provoke a rejection the engine must surface unchanged.
        let sender_nonce = 0;
        let packed = pack_signatures(&sigs);
        let calldata = safe_tx.exec_transaction_calldata(&packed);
        let outer = Transaction::builder()
            .nonce(sender_nonce)
            .gas_price(2_000_000_000)
            .gas_limit((safe_tx.safe_tx_gas + safe_tx.base_gas) * 2)
            .to(safe.address())
            .data(calldata)
            .chain_id(1337)
            .build();
        let sig = submitter.sign(&outer.sighash());
        assert_eq!(
            safe.gateway().submit(&outer.encode_signed(&sig)).await,
            Err(GatewayError::ChainRejected(RejectionReason::NonceTooLow))
        );
    }
}
