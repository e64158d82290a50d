//! Live JSON-RPC client
//!
//! HTTP transport to a real Ethereum node. Each call is a single POST
//! with the caller-configured timeout; a connect or timeout failure
//! surfaces as [`GatewayError::NodeUnavailable`] and leaves no local
//! state behind.

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::crypto::hash::selector;
use crate::gateway::{
    CallRequest, GatewayError, NodeGateway, Receipt, ReceiptLookup, RejectionReason,
};
use crate::multisig::PolicySnapshot;
use crate::types::{Address, TxHash};

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// JSON-RPC client over HTTP
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
}

impl RpcClient {
    /// Build a client from the engine configuration
    pub fn new(config: &EngineConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::NodeUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: config.node_url.clone(),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        debug!("rpc call {method} -> {}", self.url);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NodeUnavailable(e.to_string()))?;
        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        parsed
            .result
            .ok_or_else(|| GatewayError::InvalidResponse("missing result".to_string()))
    }

    /// `eth_call` against a contract, returning the raw return data
    async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let result = self
            .call(
                "eth_call",
                json!([
                    {"to": format!("0x{}", hex::encode(to.as_bytes())), "data": format!("0x{}", hex::encode(data))},
                    "latest",
                ]),
            )
            .await?;
        let hex_str = result
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse("eth_call result is not a string".to_string()))?;
        decode_hex(hex_str)
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>, GatewayError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(stripped).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn value_as_hex_str(value: &Value, context: &str) -> Result<String, GatewayError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GatewayError::InvalidResponse(format!("{context} is not a string")))
}

fn parse_hex_u64(value: &str) -> Result<u64, GatewayError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(stripped, 16).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn parse_hex_u128(value: &str) -> Result<u128, GatewayError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    u128::from_str_radix(stripped, 16).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

/// Decode an ABI-encoded `address[]` return value
fn decode_address_array(data: &[u8]) -> Result<Vec<Address>, GatewayError> {
    let word = |i: usize| -> Result<&[u8], GatewayError> {
        data.get(i * 32..(i + 1) * 32)
            .ok_or_else(|| GatewayError::InvalidResponse("truncated address array".to_string()))
    };
    let count_word = word(1)?;
    let count = u64::from_be_bytes(
        count_word[24..]
            .try_into()
            .map_err(|_| GatewayError::InvalidResponse("bad array length".to_string()))?,
    ) as usize;
    let mut owners = Vec::with_capacity(count);
    for i in 0..count {
        let slot = word(2 + i)?;
        let address = Address::from_slice(&slot[12..])
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        owners.push(address);
    }
    Ok(owners)
}

/// Decode an ABI-encoded `uint256` return value that fits a usize
fn decode_uint_word(data: &[u8]) -> Result<usize, GatewayError> {
    if data.len() < 32 || data[..24].iter().any(|&b| b != 0) {
        return Err(GatewayError::InvalidResponse(
            "unexpected uint256 return value".to_string(),
        ));
    }
    let value = u64::from_be_bytes(
        data[24..32]
            .try_into()
            .map_err(|_| GatewayError::InvalidResponse("bad uint word".to_string()))?,
    );
    Ok(value as usize)
}

#[async_trait]
impl NodeGateway for RpcClient {
    async fn get_nonce(&self, address: Address) -> Result<u64, GatewayError> {
        // `pending` is the only block tag where queued transactions
        // count towards the nonce on both geth and parity
        let result = self
            .call(
                "eth_getTransactionCount",
                json!([format!("0x{}", hex::encode(address.as_bytes())), "pending"]),
            )
            .await?;
        parse_hex_u64(&value_as_hex_str(&result, "nonce")?)
    }

    async fn get_balance(&self, address: Address) -> Result<u128, GatewayError> {
        let result = self
            .call(
                "eth_getBalance",
                json!([format!("0x{}", hex::encode(address.as_bytes())), "latest"]),
            )
            .await?;
        parse_hex_u128(&value_as_hex_str(&result, "balance")?)
    }

    async fn get_policy(&self, safe: Address) -> Result<PolicySnapshot, GatewayError> {
        let owners_data = self.eth_call(safe, &selector("getOwners()")).await?;
        let owners = decode_address_array(&owners_data)?;
        let threshold_data = self.eth_call(safe, &selector("getThreshold()")).await?;
        let threshold = decode_uint_word(&threshold_data)?;
        PolicySnapshot::new(owners, threshold)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn get_safe_nonce(&self, safe: Address) -> Result<u64, GatewayError> {
        let data = self.eth_call(safe, &selector("nonce()")).await?;
        Ok(decode_uint_word(&data)? as u64)
    }

    async fn estimate_gas(&self, call: &CallRequest) -> Result<u64, GatewayError> {
        let mut params = serde_json::Map::new();
        if let Some(from) = call.from {
            params.insert(
                "from".to_string(),
                json!(format!("0x{}", hex::encode(from.as_bytes()))),
            );
        }
        if let Some(to) = call.to {
            params.insert(
                "to".to_string(),
                json!(format!("0x{}", hex::encode(to.as_bytes()))),
            );
        }
        // No leading zeroes in quantity encodings
        params.insert("value".to_string(), json!(format!("0x{:x}", call.value)));
        params.insert(
            "data".to_string(),
            json!(format!("0x{}", hex::encode(&call.data))),
        );
        let result = self
            .call("eth_estimateGas", json!([Value::Object(params), "latest"]))
            .await?;
        parse_hex_u64(&value_as_hex_str(&result, "gas estimate")?)
    }

    async fn submit(&self, raw_tx: &[u8]) -> Result<TxHash, GatewayError> {
        let result = self
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw_tx))]),
            )
            .await
            .map_err(|e| match e {
                // Any node-side error on the submit path is the chain
                // refusing the transaction
                GatewayError::Rpc { message, .. } => {
                    GatewayError::ChainRejected(RejectionReason::classify(&message))
                }
                other => other,
            })?;
        let hash: TxHash = value_as_hex_str(&result, "transaction hash")?
            .parse()
            .map_err(|e: crate::types::ParseError| GatewayError::InvalidResponse(e.to_string()))?;
        info!("submitted transaction {hash}");
        Ok(hash)
    }

    async fn get_receipt(&self, tx_hash: TxHash) -> Result<ReceiptLookup, GatewayError> {
        let result = self
            .call("eth_getTransactionReceipt", json!([tx_hash.to_hex()]))
            .await?;
        if result.is_null() {
            // Distinguish queued from unknown
            let tx = self
                .call("eth_getTransactionByHash", json!([tx_hash.to_hex()]))
                .await?;
            return Ok(if tx.is_null() {
                ReceiptLookup::NotFound
            } else {
                ReceiptLookup::Pending
            });
        }
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s == "0x1")
            .unwrap_or(false);
        let block_number = parse_hex_u64(&value_as_hex_str(
            result
                .get("blockNumber")
                .ok_or_else(|| GatewayError::InvalidResponse("receipt missing blockNumber".to_string()))?,
            "blockNumber",
        )?)?;
        let gas_used = parse_hex_u64(&value_as_hex_str(
            result
                .get("gasUsed")
                .ok_or_else(|| GatewayError::InvalidResponse("receipt missing gasUsed".to_string()))?,
            "gasUsed",
        )?)?;
        Ok(ReceiptLookup::Mined(Receipt {
            tx_hash,
            status,
            block_number,
            gas_used,
        }))
    }
}
