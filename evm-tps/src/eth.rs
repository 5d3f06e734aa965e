//! Typed wrappers over the standard `eth_*` methods the benchmark relies on.

use alloy::primitives::{hex, Address, Bytes, TxHash, U256, U64};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::rpc::{JsonRpc, RpcError};

/// Block tag or number for the `eth_*` methods that take one.
#[derive(Debug, Clone, Copy)]
pub enum BlockId {
    Latest,
    Pending,
    Number(u64),
}

impl BlockId {
    fn to_param(self) -> Value {
        match self {
            BlockId::Latest => json!("latest"),
            BlockId::Pending => json!("pending"),
            BlockId::Number(n) => json!(format!("0x{n:x}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U256>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub number: U64,
    pub gas_limit: U64,
    #[serde(default)]
    pub transactions: Vec<TxHash>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub block_number: Option<U64>,
    pub gas_used: U64,
    #[serde(default)]
    pub status: Option<U64>,
}

impl Receipt {
    /// Pre-byzantium receipts carry no status and are treated as successful.
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |status| status == U64::from(1))
    }
}

async fn request<R: JsonRpc, T: DeserializeOwned>(rpc: &R, method: &str, params: Value) -> Result<T, RpcError> {
    let result = rpc.call(method, params).await?;
    Ok(serde_json::from_value(result)?)
}

pub async fn chain_id<R: JsonRpc>(rpc: &R) -> Result<u64, RpcError> {
    let id: U64 = request(rpc, "eth_chainId", json!([])).await?;
    Ok(id.to())
}

pub async fn gas_price<R: JsonRpc>(rpc: &R) -> Result<u128, RpcError> {
    let price: U256 = request(rpc, "eth_gasPrice", json!([])).await?;
    Ok(price.saturating_to())
}

/// The next nonce for `address`, counting transactions already in the pool.
pub async fn transaction_count<R: JsonRpc>(rpc: &R, address: Address) -> Result<u64, RpcError> {
    let count: U64 = request(rpc, "eth_getTransactionCount", json!([address, BlockId::Pending.to_param()])).await?;
    Ok(count.to())
}

pub async fn estimate_gas<R: JsonRpc>(rpc: &R, call: &CallRequest) -> Result<u64, RpcError> {
    let gas: U64 = request(rpc, "eth_estimateGas", json!([call])).await?;
    Ok(gas.to())
}

pub async fn block<R: JsonRpc>(rpc: &R, id: BlockId) -> Result<Option<Block>, RpcError> {
    request(rpc, "eth_getBlockByNumber", json!([id.to_param(), false])).await
}

pub async fn balance<R: JsonRpc>(rpc: &R, address: Address) -> Result<U256, RpcError> {
    request(rpc, "eth_getBalance", json!([address, BlockId::Latest.to_param()])).await
}

pub async fn call<R: JsonRpc>(rpc: &R, call: &CallRequest) -> Result<Bytes, RpcError> {
    request(rpc, "eth_call", json!([call, BlockId::Latest.to_param()])).await
}

pub async fn transaction_receipt<R: JsonRpc>(rpc: &R, hash: TxHash) -> Result<Option<Receipt>, RpcError> {
    request(rpc, "eth_getTransactionReceipt", json!([hash])).await
}

/// Every receipt of one block in a single call. Only parity-style nodes serve this.
pub async fn parity_block_receipts<R: JsonRpc>(rpc: &R, id: BlockId) -> Result<Vec<Receipt>, RpcError> {
    request(rpc, "parity_getBlockReceipts", json!([id.to_param()])).await
}

/// Submit an EIP-2718 encoded transaction, returning the hash reported by the node.
pub async fn send_raw_transaction<R: JsonRpc>(rpc: &R, raw: &[u8]) -> Result<TxHash, RpcError> {
    request(rpc, "eth_sendRawTransaction", json!([hex::encode_prefixed(raw)])).await
}
