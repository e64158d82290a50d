//! Legacy Ethereum transaction encoding
//!
//! Canonical wire form of a transaction, its EIP-155 signing preimage
//! and the signed encoding submitted to a node. `decode` is the exact
//! inverse of `encode`: any byte sequence that is not the canonical
//! encoding of some transaction is rejected with a [`CodecError`].

use crate::codec::rlp::{self, CodecError, Decoder};
use crate::crypto::hash::keccak256;
use crate::crypto::keys::{recover, Signature, VerificationError, SIGNATURE_LEN};
use crate::types::{Address, TxHash};

/// Semantic fields of an Ethereum transaction
///
/// `to == None` means contract creation. Integer widths bound every
/// field; the decoder rejects wider on-wire values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Sender account nonce
    pub nonce: u64,
    /// Price per gas unit, in wei
    pub gas_price: u128,
    /// Gas limit for execution
    pub gas_limit: u64,
    /// Destination address, or `None` for contract creation
    pub to: Option<Address>,
    /// Value transferred, in wei
    pub value: u128,
    /// Call data payload
    pub data: Vec<u8>,
    /// Chain identifier (EIP-155 replay protection)
    pub chain_id: u64,
}

impl Transaction {
    pub fn builder() -> TransactionBuilder {
        TransactionBuilder::default()
    }

    /// Canonical unsigned wire form: the EIP-155 signing preimage
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`
    pub fn encode_unsigned(&self) -> Vec<u8> {
        rlp::encode_list(&[
            rlp::encode_u64(self.nonce),
            rlp::encode_u128(self.gas_price),
            rlp::encode_u64(self.gas_limit),
            encode_to(self.to),
            rlp::encode_u128(self.value),
            rlp::encode_bytes(&self.data),
            rlp::encode_u64(self.chain_id),
            rlp::encode_u64(0),
            rlp::encode_u64(0),
        ])
    }

    /// Deterministic digest signed by the sender
    ///
    /// The chain identifier is part of the hashed material, so a
    /// signature over this digest cannot be replayed on another chain.
    pub fn sighash(&self) -> [u8; 32] {
        keccak256(&self.encode_unsigned())
    }

    /// Exact inverse of [`Transaction::encode_unsigned`]
    pub fn decode_unsigned(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut outer = Decoder::new(bytes);
        let mut list = outer.next_list("transaction")?;
        check_field_count(&list)?;

        let tx = Transaction {
            nonce: list.next_u64("nonce")?,
            gas_price: list.next_u128("gas_price")?,
            gas_limit: list.next_u64("gas_limit")?,
            to: decode_to(&mut list)?,
            value: list.next_u128("value")?,
            data: list.next_bytes("data")?.to_vec(),
            chain_id: list.next_u64("chain_id")?,
        };
        // EIP-155 preimage carries two zero placeholders after chain id
        for field in ["placeholder_r", "placeholder_s"] {
            if list.next_u64(field)? != 0 {
                return Err(CodecError::NonCanonical {
                    at: 0,
                    reason: "EIP-155 placeholder must be zero",
                });
            }
        }
        list.finish()?;
        outer.finish()?;
        Ok(tx)
    }

    /// Signed wire form submitted to the node:
    /// `rlp([nonce, gasPrice, gasLimit, to, value, data, v, r, s])`
    /// with `v = chain_id * 2 + 35 + recovery_id`
    pub fn encode_signed(&self, signature: &Signature) -> Vec<u8> {
        let recovery_id = (signature.v() - 27) as u64;
        let v = self.chain_id * 2 + 35 + recovery_id;
        rlp::encode_list(&[
            rlp::encode_u64(self.nonce),
            rlp::encode_u128(self.gas_price),
            rlp::encode_u64(self.gas_limit),
            encode_to(self.to),
            rlp::encode_u128(self.value),
            rlp::encode_bytes(&self.data),
            rlp::encode_u64(v),
            rlp::encode_bytes(trim_leading_zeros(signature.r())),
            rlp::encode_bytes(trim_leading_zeros(signature.s())),
        ])
    }
}

fn encode_to(to: Option<Address>) -> Vec<u8> {
    match to {
        Some(addr) => rlp::encode_bytes(addr.as_bytes()),
        None => rlp::encode_bytes(&[]),
    }
}

fn decode_to(list: &mut Decoder<'_>) -> Result<Option<Address>, CodecError> {
    let bytes = list.next_bytes("to")?;
    match bytes.len() {
        0 => Ok(None),
        20 => Ok(Some(
            Address::from_slice(bytes).map_err(|_| CodecError::InvalidFieldLength {
                field: "to",
                got: bytes.len(),
            })?,
        )),
        got => Err(CodecError::InvalidFieldLength { field: "to", got }),
    }
}

/// Both wire forms are nine-item lists
fn check_field_count(list: &Decoder<'_>) -> Result<(), CodecError> {
    let got = list.item_count()?;
    if got != 9 {
        return Err(CodecError::WrongItemCount { expected: 9, got });
    }
    Ok(())
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

/// A decoded signed transaction: the semantic fields plus the
/// signature components carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl SignedTransaction {
    /// Exact inverse of [`Transaction::encode_signed`]
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut outer = Decoder::new(bytes);
        let mut list = outer.next_list("transaction")?;
        check_field_count(&list)?;

        let nonce = list.next_u64("nonce")?;
        let gas_price = list.next_u128("gas_price")?;
        let gas_limit = list.next_u64("gas_limit")?;
        let to = decode_to(&mut list)?;
        let value = list.next_u128("value")?;
        let data = list.next_bytes("data")?.to_vec();
        let v = list.next_u64("v")?;
        let r = decode_scalar(&mut list, "r")?;
        let s = decode_scalar(&mut list, "s")?;
        list.finish()?;
        outer.finish()?;

        if v < 35 {
            return Err(CodecError::MissingReplayProtection { v });
        }
        let chain_id = (v - 35) / 2;
        let recovery_id = (v - 35 - chain_id * 2) as u8;

        Ok(SignedTransaction {
            tx: Transaction {
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                data,
                chain_id,
            },
            r,
            s,
            recovery_id,
        })
    }

    /// The packed 65-byte signature carried by this transaction
    pub fn raw_signature(&self) -> [u8; SIGNATURE_LEN] {
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = 27 + self.recovery_id;
        bytes
    }

    /// Recover the sender address from the signature
    pub fn sender(&self) -> Result<Address, VerificationError> {
        recover(&self.tx.sighash(), &self.raw_signature())
    }
}

fn decode_scalar(list: &mut Decoder<'_>, field: &'static str) -> Result<[u8; 32], CodecError> {
    let bytes = list.next_bytes(field)?;
    if bytes.len() > 32 {
        return Err(CodecError::IntegerOverflow {
            field,
            max_bytes: 32,
        });
    }
    if !bytes.is_empty() && bytes[0] == 0 {
        return Err(CodecError::NonCanonical {
            at: 0,
            reason: "integer has leading zero bytes",
        });
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

/// Hash of the raw signed bytes: the transaction identifier
pub fn tx_hash(raw: &[u8]) -> TxHash {
    TxHash::from_bytes(keccak256(raw))
}

/// Builder for [`Transaction`] values
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    nonce: u64,
    gas_price: u128,
    gas_limit: u64,
    to: Option<Address>,
    value: u128,
    data: Vec<u8>,
    chain_id: u64,
}

impl TransactionBuilder {
    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn value(mut self, value: u128) -> Self {
        self.value = value;
        self
    }

    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to,
            value: self.value,
            data: self.data,
            chain_id: self.chain_id,
        }
    }
}
