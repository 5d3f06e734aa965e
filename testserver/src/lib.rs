//! In-memory Ethereum JSON-RPC node for load-generator tests and local smoke runs.
//!
//! Accepts signed legacy transactions, enforces per-sender nonce order, and mines a
//! bounded number of pending transactions every block interval. Mined transactions move
//! native value and balances of any contract called with the token ABI.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::consensus::transaction::SignerRecoverable;
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::{Decodable2718, Encodable2718};
use alloy::primitives::{hex, Address, Bytes, TxHash, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes as BodyBytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

sol! {
    interface SimpleToken {
        function mintTo(address to, uint256 amount) external;
        function transfer(address to, uint256 amount) external returns (bool);
        function transferLoop(uint256 n, address to, uint256 amount) external;
        function balanceOf(address owner) external view returns (uint256);
    }
}

const TRANSFER_GAS: u64 = 21_000;
const CALL_GAS: u64 = 52_000;

const INVALID_PARAMS: i64 = -32602;
const METHOD_NOT_FOUND: i64 = -32601;
const SERVER_ERROR: i64 = -32000;

#[derive(Debug, Clone)]
pub struct MockNodeConfig {
    pub chain_id: u64,
    pub gas_price: u128,
    pub block_gas_limit: u64,
    /// Answer to every `eth_estimateGas`.
    pub estimate_gas: u64,
    pub block_interval: Duration,
    /// Pending transactions mined per block.
    pub block_capacity: usize,
    /// Reject every Nth submission with a pool-full error.
    pub reject_every: Option<u64>,
    /// Answer every Nth `eth_sendRawTransaction` request with HTTP 503 without
    /// looking at it.
    pub unavailable_every: Option<u64>,
    /// Native balances present at genesis.
    pub alloc: Vec<(Address, U256)>,
}

impl Default for MockNodeConfig {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            gas_price: 1_000_000_000,
            block_gas_limit: 30_000_000,
            estimate_gas: TRANSFER_GAS,
            block_interval: Duration::from_millis(100),
            block_capacity: 1_000,
            reject_every: None,
            unavailable_every: None,
            alloc: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTx {
    hash: TxHash,
    from: Address,
    envelope: TxEnvelope,
}

#[derive(Debug, Clone)]
struct MinedReceipt {
    hash: TxHash,
    from: Address,
    to: Option<Address>,
    block: u64,
    gas_used: u64,
    success: bool,
}

#[derive(Debug, Default)]
struct Chain {
    /// Next nonce per sender, counting pending transactions.
    nonces: HashMap<Address, u64>,
    /// Next nonce per sender, counting mined transactions only.
    mined_nonces: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    /// Token balances keyed by (contract, owner).
    tokens: HashMap<(Address, Address), U256>,
    pending: VecDeque<PendingTx>,
    receipts: HashMap<TxHash, MinedReceipt>,
    /// Transaction hashes per block, block 0 is genesis.
    blocks: Vec<Vec<TxHash>>,
}

impl Chain {
    fn credit(&mut self, owner: Address, amount: U256) {
        *self.balances.entry(owner).or_default() += amount;
    }

    fn debit(&mut self, owner: Address, amount: U256) -> bool {
        let balance = self.balances.entry(owner).or_default();
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        true
    }

    fn move_tokens(&mut self, token: Address, from: Address, to: Address, amount: U256) -> bool {
        let balance = self.tokens.entry((token, from)).or_default();
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        *self.tokens.entry((token, to)).or_default() += amount;
        true
    }

    /// Apply a transaction's effects, returning whether it succeeded.
    fn execute(&mut self, from: Address, envelope: &TxEnvelope) -> bool {
        let Some(to) = envelope.to() else { return false };
        let input = envelope.input();

        if !envelope.value().is_zero() {
            if !self.debit(from, envelope.value()) {
                return false;
            }
            self.credit(to, envelope.value());
        }

        if input.len() < 4 {
            return true;
        }
        let selector = &input[..4];
        if selector == SimpleToken::mintToCall::SELECTOR {
            match SimpleToken::mintToCall::abi_decode(input) {
                Ok(call) => {
                    *self.tokens.entry((to, call.to)).or_default() += call.amount;
                    true
                }
                Err(_) => false,
            }
        } else if selector == SimpleToken::transferCall::SELECTOR {
            SimpleToken::transferCall::abi_decode(input)
                .is_ok_and(|call| self.move_tokens(to, from, call.to, call.amount))
        } else if selector == SimpleToken::transferLoopCall::SELECTOR {
            SimpleToken::transferLoopCall::abi_decode(input)
                .is_ok_and(|call| self.move_tokens(to, from, call.to, call.amount.saturating_mul(call.n)))
        } else {
            true
        }
    }

    fn mine(&mut self, capacity: usize) -> usize {
        let number = self.blocks.len() as u64;
        let take = capacity.min(self.pending.len());
        let mut hashes = Vec::with_capacity(take);

        for tx in self.pending.drain(..take).collect::<Vec<_>>() {
            let success = self.execute(tx.from, &tx.envelope);
            *self.mined_nonces.entry(tx.from).or_default() += 1;
            let gas_used = if tx.envelope.input().is_empty() { TRANSFER_GAS } else { CALL_GAS };
            self.receipts.insert(
                tx.hash,
                MinedReceipt { hash: tx.hash, from: tx.from, to: tx.envelope.to(), block: number, gas_used, success },
            );
            hashes.push(tx.hash);
        }

        self.blocks.push(hashes);
        take
    }
}

#[derive(Debug)]
struct State {
    config: MockNodeConfig,
    chain: Mutex<Chain>,
    submissions: AtomicU64,
    requests: AtomicU64,
    /// `eth_sendRawTransaction` requests received, including ones answered with 503.
    send_requests: AtomicU64,
}

type RpcResult = Result<Value, (i64, String)>;

impl State {
    fn chain(&self) -> MutexGuard<'_, Chain> {
        self.chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, method: &str, params: &Value) -> RpcResult {
        match method {
            "eth_chainId" => Ok(quantity(self.config.chain_id)),
            "eth_gasPrice" => Ok(json!(format!("{:#x}", self.config.gas_price))),
            "eth_blockNumber" => Ok(quantity(self.chain().blocks.len() as u64 - 1)),
            "eth_estimateGas" => Ok(quantity(self.config.estimate_gas)),
            "eth_getTransactionCount" => {
                let address = address_param(params, 0)?;
                let chain = self.chain();
                let nonces = if params[1] == "pending" { &chain.nonces } else { &chain.mined_nonces };
                Ok(quantity(nonces.get(&address).copied().unwrap_or(0)))
            }
            "eth_getBalance" => {
                let address = address_param(params, 0)?;
                Ok(json!(self.chain().balances.get(&address).copied().unwrap_or_default()))
            }
            "eth_call" => self.call(&params[0]),
            "eth_sendRawTransaction" => self.send_raw_transaction(params),
            "eth_getBlockByNumber" => self.block(&params[0]),
            "eth_getTransactionReceipt" => {
                let hash: TxHash = serde_json::from_value(params[0].clone()).map_err(invalid_params)?;
                Ok(self.chain().receipts.get(&hash).map_or(Value::Null, receipt_json))
            }
            "author_pendingExtrinsics" => {
                let chain = self.chain();
                Ok(chain.pending.iter().map(|tx| json!(hex::encode_prefixed(tx.envelope.encoded_2718()))).collect())
            }
            "txpool_content" => {
                let chain = self.chain();
                let mut pending = serde_json::Map::new();
                for tx in &chain.pending {
                    let by_nonce = pending.entry(tx.from.to_string()).or_insert_with(|| json!({}));
                    by_nonce[tx.envelope.nonce().to_string()] = json!({ "hash": tx.hash });
                }
                Ok(json!({ "pending": pending, "queued": {} }))
            }
            "parity_getBlockReceipts" => {
                let number = self.resolve_block(&params[0])?;
                let chain = self.chain();
                Ok(chain.blocks.get(number as usize).map_or(Value::Null, |hashes| {
                    hashes.iter().filter_map(|hash| chain.receipts.get(hash)).map(receipt_json).collect()
                }))
            }
            "parity_pendingTransactions" => {
                let chain = self.chain();
                Ok(chain
                    .pending
                    .iter()
                    .map(|tx| json!({ "hash": tx.hash, "from": tx.from, "nonce": quantity(tx.envelope.nonce()) }))
                    .collect())
            }
            other => Err((METHOD_NOT_FOUND, format!("the method {other} does not exist/is not available"))),
        }
    }

    fn send_raw_transaction(&self, params: &Value) -> RpcResult {
        let index = self.submissions.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.reject_every.is_some_and(|n| n > 0 && index % n == 0) {
            return Err((SERVER_ERROR, "txpool is full".to_string()));
        }

        let raw: Bytes = serde_json::from_value(params[0].clone()).map_err(invalid_params)?;
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref()).map_err(|e| invalid_params(e.to_string()))?;
        let from = envelope.recover_signer().map_err(|e| invalid_params(e.to_string()))?;
        let hash = *envelope.tx_hash();

        if envelope.chain_id().is_some_and(|id| id != self.config.chain_id) {
            return Err((SERVER_ERROR, "invalid chain id".to_string()));
        }

        let mut chain = self.chain();
        let expected = chain.nonces.get(&from).copied().unwrap_or(0);
        match envelope.nonce() {
            nonce if nonce < expected => return Err((SERVER_ERROR, "nonce too low".to_string())),
            nonce if nonce > expected => return Err((SERVER_ERROR, "nonce too high".to_string())),
            _ => {}
        }
        chain.nonces.insert(from, expected + 1);
        chain.pending.push_back(PendingTx { hash, from, envelope });
        Ok(json!(hash))
    }

    fn call(&self, request: &Value) -> RpcResult {
        let to = address_param(request, "to")?;
        let data: Bytes = match request.get("data").or_else(|| request.get("input")) {
            Some(data) => serde_json::from_value(data.clone()).map_err(invalid_params)?,
            None => Bytes::new(),
        };

        match SimpleToken::balanceOfCall::abi_decode(&data) {
            Ok(call) => {
                let balance = self.chain().tokens.get(&(to, call.owner)).copied().unwrap_or_default();
                Ok(json!(Bytes::from(balance.abi_encode())))
            }
            Err(_) => Ok(json!(Bytes::new())),
        }
    }

    fn resolve_block(&self, id: &Value) -> Result<u64, (i64, String)> {
        match id.as_str() {
            Some("latest" | "pending" | "safe" | "finalized") | None => Ok(self.chain().blocks.len() as u64 - 1),
            Some("earliest") => Ok(0),
            Some(hex) => u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(invalid_params),
        }
    }

    fn block(&self, id: &Value) -> RpcResult {
        let number = self.resolve_block(id)?;
        let chain = self.chain();
        Ok(chain.blocks.get(number as usize).map_or(Value::Null, |hashes| {
            json!({
                "number": quantity(number),
                "gasLimit": quantity(self.config.block_gas_limit),
                "transactions": hashes,
            })
        }))
    }

    /// The JSON-RPC response for one request body, or `None` when the request should be
    /// answered with 503.
    fn handle_body(&self, body: &[u8]) -> Option<Value> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let request: Value = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(err) => return Some(error_response(Value::Null, -32700, format!("parse error: {err}"))),
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = request.get("params").cloned().unwrap_or_else(|| json!([]));

        if method == "eth_sendRawTransaction" {
            let index = self.send_requests.fetch_add(1, Ordering::Relaxed) + 1;
            if self.config.unavailable_every.is_some_and(|n| n > 0 && index % n == 0) {
                return None;
            }
        }

        Some(match self.dispatch(method, &params) {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => error_response(id, code, message),
        })
    }
}

fn quantity(n: u64) -> Value {
    json!(format!("{n:#x}"))
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

fn invalid_params(err: impl ToString) -> (i64, String) {
    (INVALID_PARAMS, err.to_string())
}

fn address_param<I: serde_json::value::Index>(params: &Value, index: I) -> Result<Address, (i64, String)> {
    serde_json::from_value(params[index].clone()).map_err(invalid_params)
}

fn receipt_json(receipt: &MinedReceipt) -> Value {
    json!({
        "transactionHash": receipt.hash,
        "from": receipt.from,
        "to": receipt.to,
        "blockNumber": quantity(receipt.block),
        "gasUsed": quantity(receipt.gas_used),
        "status": if receipt.success { "0x1" } else { "0x0" },
    })
}

async fn handler(state: Arc<State>, req: Request<Incoming>) -> Result<Response<Full<BodyBytes>>, Infallible> {
    let body = match req.into_body().collect().await {
        Ok(body) => body.to_bytes(),
        Err(_) => BodyBytes::new(),
    };
    let Some(response) = state.handle_body(&body) else {
        let mut response = Response::new(Full::new(BodyBytes::from_static(b"service unavailable")));
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        return Ok(response);
    };
    let mut response = Response::new(Full::new(BodyBytes::from(response.to_string())));
    response.headers_mut().insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    Ok(response)
}

/// A running mock node. Background tasks stop when this is dropped.
pub struct MockNode {
    addr: SocketAddr,
    state: Arc<State>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockNode {
    /// Listen on an ephemeral localhost port.
    pub async fn spawn(config: MockNodeConfig) -> io::Result<Self> {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), config).await
    }

    pub async fn bind(addr: SocketAddr, config: MockNodeConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        let mut chain = Chain { blocks: vec![Vec::new()], ..Default::default() };
        for &(owner, amount) in &config.alloc {
            chain.credit(owner, amount);
        }
        let state = Arc::new(State {
            config,
            chain: Mutex::new(chain),
            submissions: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            send_requests: AtomicU64::new(0),
        });

        let miner = tokio::spawn({
            let state = state.clone();
            async move {
                let mut interval = tokio::time::interval(state.config.block_interval);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    state.chain().mine(state.config.block_capacity);
                }
            }
        });

        let server = tokio::spawn({
            let state = state.clone();
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else { continue };
                    let state = state.clone();
                    tokio::spawn(async move {
                        let service = service_fn(move |req| handler(state.clone(), req));
                        if let Err(err) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
                            eprintln!("Error serving connection: {err:?}");
                        }
                    });
                }
            }
        });

        Ok(Self { addr, state, tasks: vec![miner, server] })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn nonce_of(&self, address: Address) -> u64 {
        self.state.chain().nonces.get(&address).copied().unwrap_or(0)
    }

    pub fn balance_of(&self, address: Address) -> U256 {
        self.state.chain().balances.get(&address).copied().unwrap_or_default()
    }

    pub fn token_balance_of(&self, token: Address, owner: Address) -> U256 {
        self.state.chain().tokens.get(&(token, owner)).copied().unwrap_or_default()
    }

    pub fn mint_tokens(&self, token: Address, owner: Address, amount: U256) {
        *self.state.chain().tokens.entry((token, owner)).or_default() += amount;
    }

    pub fn pending_len(&self) -> usize {
        self.state.chain().pending.len()
    }

    pub fn block_number(&self) -> u64 {
        self.state.chain().blocks.len() as u64 - 1
    }

    /// `eth_sendRawTransaction` calls seen, accepted or not.
    pub fn submissions(&self) -> u64 {
        self.state.submissions.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.state.requests.load(Ordering::Relaxed)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
