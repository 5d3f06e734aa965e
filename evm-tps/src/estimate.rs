use thousands::Separable;
use tracing::info;

use crate::eth::{self, BlockId, CallRequest};
use crate::rpc::{JsonRpc, RpcError};

/// Above this many transactions the derived ceiling is rounded to the nearest thousand.
const ROUNDING_THRESHOLD: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("gas estimation failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("node estimated zero gas for the probe transaction")]
    ZeroGas,
    #[error("node returned no latest block")]
    NoBlock,
}

/// Gas limit and pool ceiling derived for one transaction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub estimated_gas: u64,
    /// The configured limit, raised to `estimated_gas` if that is larger.
    pub gas_limit: u64,
    pub block_gas_limit: u64,
    pub max_txn_per_block: u64,
    pub pool_ceiling: u64,
}

/// `max_txn_per_block * multiplier`, rounded to the nearest thousand when above 5000.
pub fn shape_ceiling(max_txn_per_block: u64, multiplier: u64) -> u64 {
    let raw = max_txn_per_block.saturating_mul(multiplier);
    if raw > ROUNDING_THRESHOLD {
        raw.saturating_add(500) / 1000 * 1000
    } else {
        raw
    }
}

/// Never lower the configured limit; an underestimate makes transactions fail silently.
pub fn effective_gas_limit(configured: u64, estimated: u64) -> u64 {
    configured.max(estimated)
}

pub async fn estimate<R: JsonRpc>(
    rpc: &R,
    probe: &CallRequest,
    configured_gas_limit: u64,
    multiplier: u64,
) -> Result<Estimate, EstimateError> {
    let estimated_gas = eth::estimate_gas(rpc, probe).await?;
    if estimated_gas == 0 {
        return Err(EstimateError::ZeroGas);
    }

    let gas_limit = effective_gas_limit(configured_gas_limit, estimated_gas);
    if gas_limit != configured_gas_limit {
        info!(estimated_gas, configured_gas_limit, "estimateGas exceeds configured gas limit, raising it");
    }

    let block = eth::block(rpc, BlockId::Latest).await?.ok_or(EstimateError::NoBlock)?;
    let block_gas_limit: u64 = block.gas_limit.to();
    let max_txn_per_block = block_gas_limit / estimated_gas;
    let pool_ceiling = shape_ceiling(max_txn_per_block, multiplier);

    info!(
        block_gas_limit = %block_gas_limit.separate_with_commas(),
        estimated_gas,
        max_txn_per_block = %max_txn_per_block.separate_with_commas(),
        pool_ceiling = %pool_ceiling.separate_with_commas(),
        "derived txpool ceiling"
    );

    Ok(Estimate { estimated_gas, gas_limit, block_gas_limit, max_txn_per_block, pool_ceiling })
}
