use std::fmt;
use std::time::Duration;

use alloy::primitives::{Address, TxHash, U256};
use alloy::sol_types::SolValue;
use thousands::Separable;
use tracing::debug;

use crate::eth::{self, Receipt};
use crate::payload::balance_of_call;
use crate::rpc::{JsonRpc, RpcError};
use crate::throttle::Sleep;

/// Which balance the end-of-run assertion compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceKind {
    Native,
    Token(Address),
}

pub async fn balance_of<R: JsonRpc>(rpc: &R, kind: BalanceKind, owner: Address) -> Result<U256, RpcError> {
    match kind {
        BalanceKind::Native => eth::balance(rpc, owner).await,
        BalanceKind::Token(token) => {
            let output = eth::call(rpc, &balance_of_call(token, owner)).await?;
            U256::abi_decode(&output).map_err(|e| RpcError::InvalidResult(format!("balanceOf returned {output}: {e}")))
        }
    }
}

pub async fn balances_of<R: JsonRpc>(rpc: &R, kind: BalanceKind, owners: &[Address]) -> Result<Vec<U256>, RpcError> {
    let mut balances = Vec::with_capacity(owners.len());
    for &owner in owners {
        balances.push(balance_of(rpc, kind, owner).await?);
    }
    Ok(balances)
}

/// Poll until the node has a receipt for `hash`. No deadline: a hung node stalls the caller.
pub async fn wait_for_receipt<R: JsonRpc, S: Sleep>(
    rpc: &R,
    hash: TxHash,
    poll: Duration,
    sleeper: &S,
) -> Result<Receipt, RpcError> {
    loop {
        if let Some(receipt) = eth::transaction_receipt(rpc, hash).await? {
            return Ok(receipt);
        }
        debug!(%hash, "receipt not available yet");
        sleeper.sleep(poll).await;
    }
}

/// Transactions per second over `elapsed`, with sub-millisecond runs counted as one millisecond.
pub fn throughput(transactions: u64, elapsed: Duration) -> f64 {
    let elapsed_ms = elapsed.as_millis().max(1) as f64;
    transactions as f64 * 1000.0 / elapsed_ms
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceAssertion {
    pub account: Address,
    pub before: U256,
    pub expected_delta: U256,
    pub after: U256,
}

impl BalanceAssertion {
    pub fn passed(&self) -> bool {
        self.before.saturating_add(self.expected_delta) == self.after
    }
}

pub fn assert_balances(
    accounts: &[Address],
    before: &[U256],
    after: &[U256],
    per_account: &[u64],
    delta_per_tx: U256,
) -> Vec<BalanceAssertion> {
    accounts
        .iter()
        .zip(before)
        .zip(after)
        .zip(per_account)
        .map(|(((&account, &before), &after), &count)| BalanceAssertion {
            account,
            before,
            expected_delta: delta_per_tx.saturating_mul(U256::from(count)),
            after,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Report {
    pub transactions: u64,
    pub failures: u64,
    pub elapsed: Duration,
    pub receipts: Vec<Receipt>,
    pub assertions: Vec<BalanceAssertion>,
}

impl Report {
    pub fn tps(&self) -> f64 {
        throughput(self.transactions, self.elapsed)
    }

    pub fn all_passed(&self) -> bool {
        self.assertions.iter().all(BalanceAssertion::passed)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for receipt in &self.receipts {
            writeln!(f, "\nLast transaction:")?;
            writeln!(f, "\ttransactionHash: {}", receipt.transaction_hash)?;
            writeln!(f, "\tfrom:            {}", receipt.from)?;
            match receipt.to {
                Some(to) => writeln!(f, "\tto:              {to}")?,
                None => writeln!(f, "\tto:              (contract creation)")?,
            }
            match receipt.block_number {
                Some(number) => writeln!(f, "\tblockNumber:     {number}")?,
                None => writeln!(f, "\tblockNumber:     (pending)")?,
            }
            writeln!(f, "\tgasUsed:         {}", receipt.gas_used)?;
            writeln!(f, "\tstatus:          {}", if receipt.succeeded() { "success" } else { "reverted" })?;
        }

        writeln!(f)?;
        for assertion in &self.assertions {
            writeln!(
                f,
                "Assert(balance) {}: {} + {} == {} [{}]",
                assertion.account,
                assertion.before,
                assertion.expected_delta,
                assertion.after,
                if assertion.passed() { "OK" } else { "FAIL" }
            )?;
        }

        writeln!(f)?;
        writeln!(f, "Failed submissions: {}", self.failures.separate_with_commas())?;
        write!(
            f,
            "Execution time: {} ms -> {:.2} TPS",
            self.elapsed.as_millis().separate_with_commas(),
            self.tps()
        )
    }
}
