use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::rpc::JsonRpc;

/// RPC dialect of the target node, deciding how pending-pool depth is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// `author_pendingExtrinsics`, an array of encoded extrinsics.
    Substrate,
    /// `txpool_content`, pending transactions keyed by sender then nonce.
    Geth,
    /// `parity_pendingTransactions`, an array of transaction objects.
    Parity,
}

impl Variant {
    pub fn method(self) -> &'static str {
        match self {
            Variant::Substrate => "author_pendingExtrinsics",
            Variant::Geth => "txpool_content",
            Variant::Parity => "parity_pendingTransactions",
        }
    }

    /// Normalise a pool response to a pending transaction count.
    pub fn decode_depth(self, result: &Value) -> Option<u64> {
        match self {
            Variant::Substrate | Variant::Parity => result.as_array().map(|pending| pending.len() as u64),
            Variant::Geth => {
                let by_sender = result.get("pending").unwrap_or(result).as_object()?;
                by_sender.values().map(|by_nonce| by_nonce.as_object().map(|txs| txs.len() as u64)).sum()
            }
        }
    }
}

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "substrate" => Ok(Variant::Substrate),
            "geth" => Ok(Variant::Geth),
            "parity" => Ok(Variant::Parity),
            other => Err(format!("unknown node variant {other:?}, expected substrate, geth or parity")),
        }
    }
}

/// Anything that can report the node's current pending-pool depth.
pub trait DepthSource: Send + Sync {
    fn depth(&self) -> impl Future<Output = u64> + Send;
}

/// Polls the node's pending pool on demand.
#[derive(Debug, Clone)]
pub struct PoolMonitor<R> {
    rpc: R,
    variant: Variant,
}

impl<R: JsonRpc> PoolMonitor<R> {
    pub fn new(rpc: R, variant: Variant) -> Self {
        Self { rpc, variant }
    }

    /// Keep `shared` refreshed with the latest depth, for handlers that must not poll themselves.
    pub async fn start_checker(self, shared: Arc<AtomicU64>, interval: Duration) {
        let mut interval = tokio::time::interval(interval);
        let mut last = 0;
        loop {
            interval.tick().await;
            let depth = self.depth().await;
            shared.store(depth, Ordering::Relaxed);
            if depth != last {
                debug!(depth, "txpool depth changed");
                last = depth;
            }
        }
    }
}

impl<R: JsonRpc> DepthSource for PoolMonitor<R> {
    /// Fails open: transport errors and unrecognised shapes read as an empty pool, so a
    /// broken monitor never stalls submission.
    async fn depth(&self) -> u64 {
        match self.rpc.call(self.variant.method(), json!([])).await {
            Ok(result) => self.variant.decode_depth(&result).unwrap_or_else(|| {
                info!(method = self.variant.method(), "unrecognised txpool response, assuming empty pool");
                0
            }),
            Err(err) => {
                debug!(method = self.variant.method(), %err, "txpool poll failed, assuming empty pool");
                0
            }
        }
    }
}
