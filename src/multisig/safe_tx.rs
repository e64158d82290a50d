//! Multisig operation hashing and signature packing
//!
//! A [`SafeTransaction`] is the logical operation the owners sign: the
//! inner call plus the gas-refund parameters and the contract nonce.
//! Its digest is the EIP-712 typed-data hash the Safe contract itself
//! computes, so signatures collected off-chain are exactly the ones
//! `execTransaction` verifies on-chain.

use thiserror::Error;

use crate::crypto::hash::{keccak256, keccak256_concat, selector};
use crate::crypto::keys::{Signature, SIGNATURE_LEN};
use crate::types::Address;

/// Gas cost per non-zero calldata byte (EIP-2028)
pub const GAS_CALL_DATA_BYTE: u64 = 16;
/// Gas cost per zero calldata byte
pub const GAS_CALL_DATA_ZERO_BYTE: u64 = 4;

/// How the multisig contract performs the inner call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    Call = 0,
    DelegateCall = 1,
    Create = 2,
}

/// A multisig operation awaiting owner signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTransaction {
    /// The multisig contract executing the operation
    pub safe: Address,
    /// Destination of the inner call
    pub to: Address,
    /// Ether value of the inner call, in wei
    pub value: u128,
    /// Data payload of the inner call
    pub data: Vec<u8>,
    /// Operation type of the inner call
    pub operation: Operation,
    /// Gas reserved for the inner call
    pub safe_tx_gas: u64,
    /// Gas costs independent of the inner call (signature checking,
    /// calldata, refund payment)
    pub base_gas: u64,
    /// Gas price used for the refund calculation
    pub gas_price: u128,
    /// Token used for the refund, or the zero address for ether
    pub gas_token: Address,
    /// Receiver of the refund, or the zero address for `tx.origin`
    pub refund_receiver: Address,
    /// Contract nonce at signing time
    pub nonce: u64,
    /// Chain the operation is bound to
    pub chain_id: u64,
}

fn abi_u256(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn abi_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

/// `keccak256("EIP712Domain(uint256 chainId,address verifyingContract)")`
fn domain_typehash() -> [u8; 32] {
    keccak256(b"EIP712Domain(uint256 chainId,address verifyingContract)")
}

/// `keccak256("SafeTx(address to,uint256 value,bytes data,...)")`
fn safe_tx_typehash() -> [u8; 32] {
    keccak256(
        b"SafeTx(address to,uint256 value,bytes data,uint8 operation,\
uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,\
address refundReceiver,uint256 nonce)",
    )
}

/// Selector of the contract's `execTransaction` entry point
pub fn exec_transaction_selector() -> [u8; 4] {
    selector(
        "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
    )
}

impl SafeTransaction {
    /// EIP-712 domain separator binding the digest to one chain and
    /// one contract address
    pub fn domain_separator(&self) -> [u8; 32] {
        keccak256_concat(&[
            &domain_typehash(),
            &abi_u256(self.chain_id as u128),
            &abi_address(self.safe),
        ])
    }

    /// The deterministic operation digest the owners sign
    ///
    /// `keccak256(0x19 || 0x01 || domainSeparator || structHash)`;
    /// identical logical input always yields the identical digest, so
    /// parties can collect signatures independently.
    pub fn digest(&self) -> [u8; 32] {
        let struct_hash = keccak256_concat(&[
            &safe_tx_typehash(),
            &abi_address(self.to),
            &abi_u256(self.value),
            &keccak256(&self.data),
            &abi_u256(self.operation as u128),
            &abi_u256(self.safe_tx_gas as u128),
            &abi_u256(self.base_gas as u128),
            &abi_u256(self.gas_price),
            &abi_address(self.gas_token),
            &abi_address(self.refund_receiver),
            &abi_u256(self.nonce as u128),
        ]);
        keccak256_concat(&[&[0x19, 0x01], &self.domain_separator(), &struct_hash])
    }

    /// Calldata for `execTransaction` with the packed signatures
    ///
    /// Selector plus ABI-encoded arguments; `data` and `signatures`
    /// are the two dynamic fields.
    pub fn exec_transaction_calldata(&self, packed_signatures: &[u8]) -> Vec<u8> {
        let sig = exec_transaction_selector();
        // 10 head slots, then the two dynamic tails
        let head_len = 10 * 32;
        let data_tail = abi_encode_dynamic_bytes(&self.data);
        let data_offset = head_len;
        let sigs_offset = head_len + data_tail.len();

        let mut out = Vec::with_capacity(4 + head_len + data_tail.len() + 64);
        out.extend_from_slice(&sig);
        out.extend_from_slice(&abi_address(self.to));
        out.extend_from_slice(&abi_u256(self.value));
        out.extend_from_slice(&abi_u256(data_offset as u128));
        out.extend_from_slice(&abi_u256(self.operation as u128));
        out.extend_from_slice(&abi_u256(self.safe_tx_gas as u128));
        out.extend_from_slice(&abi_u256(self.base_gas as u128));
        out.extend_from_slice(&abi_u256(self.gas_price));
        out.extend_from_slice(&abi_address(self.gas_token));
        out.extend_from_slice(&abi_address(self.refund_receiver));
        out.extend_from_slice(&abi_u256(sigs_offset as u128));
        out.extend_from_slice(&data_tail);
        out.extend_from_slice(&abi_encode_dynamic_bytes(packed_signatures));
        out
    }

    /// Deterministic model of the gas overhead that is independent of
    /// the inner call: signature checking, calldata cost, nonce
    /// storage and the base transaction fee
    pub fn estimate_base_gas(&self, threshold: usize) -> u64 {
        // ecrecover is ~4k gas on-chain, padded to 6k
        let ecrecover_gas = 6_000u64;
        let signature_gas =
            threshold as u64 * (GAS_CALL_DATA_BYTE + 2 * 32 * GAS_CALL_DATA_BYTE + ecrecover_gas);

        let calldata = self.exec_transaction_calldata(&[]);
        let data_gas: u64 = calldata
            .iter()
            .map(|&b| {
                if b == 0 {
                    GAS_CALL_DATA_ZERO_BYTE
                } else {
                    GAS_CALL_DATA_BYTE
                }
            })
            .sum();

        // First write to the nonce slot is a fresh storage store
        let nonce_gas = if self.nonce == 0 { 20_000 } else { 5_000 };
        let hash_generation_gas = 1_500;

        let mut base_gas = signature_gas + data_gas + nonce_gas + hash_generation_gas;
        base_gas += if base_gas > 65_536 { 64 } else { 128 };
        base_gas + 32_000
    }
}

/// ABI tail of a `bytes` value: length word plus right-padded payload
fn abi_encode_dynamic_bytes(data: &[u8]) -> Vec<u8> {
    let padded_len = (data.len() + 31) / 32 * 32;
    let mut out = Vec::with_capacity(32 + padded_len);
    out.extend_from_slice(&abi_u256(data.len() as u128));
    out.extend_from_slice(data);
    out.resize(32 + padded_len, 0);
    out
}

/// Errors raised when splitting packed signature data
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureDataError {
    #[error("Signature data length {got} is not a multiple of {SIGNATURE_LEN}")]
    BadLength { got: usize },
}

/// Pack signatures into the on-chain calldata form: 65-byte blobs
/// concatenated in ascending signer-address order
pub fn pack_signatures(signatures: &[Signature]) -> Vec<u8> {
    let mut sorted: Vec<&Signature> = signatures.iter().collect();
    sorted.sort_by_key(|sig| sig.signer);
    let mut out = Vec::with_capacity(sorted.len() * SIGNATURE_LEN);
    for sig in sorted {
        out.extend_from_slice(&sig.bytes);
    }
    out
}

/// Split packed signature data back into 65-byte blobs
pub fn split_signatures(packed: &[u8]) -> Result<Vec<[u8; SIGNATURE_LEN]>, SignatureDataError> {
    if packed.len() % SIGNATURE_LEN != 0 {
        return Err(SignatureDataError::BadLength { got: packed.len() });
    }
    Ok(packed
        .chunks_exact(SIGNATURE_LEN)
        .map(|chunk| {
            let mut bytes = [0u8; SIGNATURE_LEN];
            bytes.copy_from_slice(chunk);
            bytes
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn sample_safe_tx() -> SafeTransaction {
        SafeTransaction {
            safe: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap(),
            to: "0x3535353535353535353535353535353535353535".parse().unwrap(),
            value: 1_000_000_000_000_000_000,
            data: vec![],
            operation: Operation::Call,
            safe_tx_gas: 50_000,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce: 0,
            chain_id: 1,
        }
    }

    #[test]
    fn test_typehash_constants() {
        // The Safe v1.3.0 contract constants
        assert_eq!(
            hex::encode(domain_typehash()),
            "47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218"
        );
        assert_eq!(
            hex::encode(safe_tx_typehash()),
            "bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8"
        );
    }

    #[test]
    fn test_digest_determinism() {
        let tx = sample_safe_tx();
        assert_eq!(tx.digest(), sample_safe_tx().digest());
    }

    #[test]
    fn test_digest_binds_chain_and_contract() {
        let tx = sample_safe_tx();
        let base = tx.digest();

        let mut other_chain = tx.clone();
        other_chain.chain_id = 5;
        assert_ne!(other_chain.digest(), base);

        let mut other_safe = tx.clone();
        other_safe.safe = "0x3535353535353535353535353535353535353535".parse().unwrap();
        assert_ne!(other_safe.digest(), base);

        let mut other_nonce = tx;
        other_nonce.nonce = 1;
        assert_ne!(other_nonce.digest(), base);
    }

    #[test]
    fn test_pack_sorts_by_signer() {
        let mut keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        keys.sort_by_key(|k| k.address());
        let digest = sample_safe_tx().digest();

        // Sign in reverse owner order; packing must restore ascending
        let sigs: Vec<_> = keys.iter().rev().map(|k| k.sign(&digest)).collect();
        let packed = pack_signatures(&sigs);
        assert_eq!(packed.len(), 3 * SIGNATURE_LEN);

        let split = split_signatures(&packed).unwrap();
        let recovered: Vec<_> = split
            .iter()
            .map(|b| crate::crypto::recover(&digest, b).unwrap())
            .collect();
        let mut expected: Vec<_> = keys.iter().map(|k| k.address()).collect();
        expected.sort();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn test_split_rejects_partial_signature() {
        assert_eq!(
            split_signatures(&[0u8; 64]),
            Err(SignatureDataError::BadLength { got: 64 })
        );
    }

    #[test]
    fn test_exec_transaction_calldata_layout() {
        let tx = sample_safe_tx();
        let packed = [0xaau8; 65];
        let calldata = tx.exec_transaction_calldata(&packed);

        assert_eq!(&calldata[..4], &exec_transaction_selector());
        // Head is 10 words after the selector
        assert_eq!(&calldata[4 + 2 * 32 + 12..4 + 3 * 32], &abi_u256(320)[12..]);
        // Empty data tail is a single zero length word, signatures
        // follow at offset 352
        let sigs_offset_word = &calldata[4 + 9 * 32..4 + 10 * 32];
        assert_eq!(sigs_offset_word, abi_u256(352).as_ref());
        // Signature tail: length word then padded payload
        let sig_len_word = &calldata[4 + 11 * 32..4 + 12 * 32];
        assert_eq!(sig_len_word, abi_u256(65).as_ref());
        assert_eq!(calldata.len(), 4 + 12 * 32 + 96);
    }

    #[test]
    fn test_base_gas_grows_with_threshold_and_data() {
        let tx = sample_safe_tx();
        assert!(tx.estimate_base_gas(3) > tx.estimate_base_gas(1));

        let mut with_data = sample_safe_tx();
        with_data.data = vec![0xff; 100];
        assert!(with_data.estimate_base_gas(1) > tx.estimate_base_gas(1));
    }

    #[test]
    fn test_fresh_nonce_costs_more_base_gas() {
        let fresh = sample_safe_tx();
        let mut warmed = sample_safe_tx();
        warmed.nonce = 7;
        assert!(fresh.estimate_base_gas(1) > warmed.estimate_base_gas(1));
    }
}
