//! Multisig policy evaluation
//!
//! Decides, off-chain, whether a set of signatures over one operation
//! digest satisfies an on-chain owner/threshold policy. The evaluation
//! is advisory: the contract re-validates at execution time, so the
//! point here is to fail fast and avoid wasting a submission.

use log::debug;
use thiserror::Error;

use crate::crypto::keys::{recover, VerificationError, SIGNATURE_LEN};
use crate::types::Address;

/// Errors raised when constructing a policy snapshot
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Owner set is empty")]
    EmptyOwnerSet,
    #[error("Invalid threshold: {threshold} (owner set has {owners} members)")]
    InvalidThreshold { threshold: usize, owners: usize },
    #[error("Duplicate owner: {0}")]
    DuplicateOwner(Address),
}

/// The owner set and signature threshold of a multisig contract
///
/// Read from the chain at evaluation time. Owners and threshold can
/// change on-chain between operations, so a snapshot is never cached
/// across calls by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySnapshot {
    owners: Vec<Address>,
    threshold: usize,
}

impl PolicySnapshot {
    /// Validate and build a snapshot
    pub fn new(owners: Vec<Address>, threshold: usize) -> Result<Self, PolicyError> {
        if owners.is_empty() {
            return Err(PolicyError::EmptyOwnerSet);
        }
        if threshold == 0 || threshold > owners.len() {
            return Err(PolicyError::InvalidThreshold {
                threshold,
                owners: owners.len(),
            });
        }
        let mut sorted = owners.clone();
        sorted.sort();
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                return Err(PolicyError::DuplicateOwner(pair[0]));
            }
        }
        Ok(PolicySnapshot { owners, threshold })
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }

    /// Human-readable form like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.owners.len())
    }
}

/// Why an evaluation was rejected outright
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    #[error("Signature {index} is malformed: {source}")]
    BadSignature {
        index: usize,
        source: VerificationError,
    },
    #[error("Unknown signer: {0}")]
    UnknownSigner(Address),
    #[error("Duplicate signer: {0}")]
    DuplicateSigner(Address),
    #[error("Signatures are not in ascending signer-address order")]
    Unordered,
}

/// Outcome of evaluating a signature set against a policy
#[derive(Debug, PartialEq, Eq)]
pub enum Evaluation {
    /// Enough distinct valid owner signatures
    Satisfied,
    /// Valid so far, but `missing` more owner signatures are needed
    Insufficient { missing: usize },
    /// The set can never satisfy the policy as supplied
    Invalid(InvalidReason),
}

/// Evaluate packed signatures over `digest` against `policy`
///
/// Each signature is recovered to its signer address. The set is
/// rejected as [`Evaluation::Invalid`] when a signature is malformed,
/// a recovered address is not an owner, the same owner appears twice
/// (regardless of threshold), or the signatures are not supplied in
/// strictly ascending address order — the order the contract relies on
/// for cheap on-chain duplicate detection.
pub fn evaluate(
    digest: &[u8; 32],
    signatures: &[[u8; SIGNATURE_LEN]],
    policy: &PolicySnapshot,
) -> Evaluation {
    let mut previous: Option<Address> = None;
    let mut count = 0usize;

    for (index, bytes) in signatures.iter().enumerate() {
        let signer = match recover(digest, bytes) {
            Ok(signer) => signer,
            Err(source) => return Evaluation::Invalid(InvalidReason::BadSignature { index, source }),
        };
        if !policy.is_owner(&signer) {
            return Evaluation::Invalid(InvalidReason::UnknownSigner(signer));
        }
        if let Some(prev) = previous {
            if signer == prev {
                return Evaluation::Invalid(InvalidReason::DuplicateSigner(signer));
            }
            if signer < prev {
                return Evaluation::Invalid(InvalidReason::Unordered);
            }
        }
        previous = Some(signer);
        count += 1;
    }

    debug!(
        "policy {} evaluated with {} valid signature(s)",
        policy.description(),
        count
    );
    if count >= policy.threshold {
        Evaluation::Satisfied
    } else {
        Evaluation::Insufficient {
            missing: policy.threshold - count,
        }
    }
}
