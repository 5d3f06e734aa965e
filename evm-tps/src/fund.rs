use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy_consensus::TxLegacy;
use eyre::Context;
use thousands::Separable;
use tracing::info;

use crate::accounts::AccountPool;
use crate::config::Config;
use crate::eth;
use crate::payload::{mint_to_call, Workload};
use crate::report::{balance_of, wait_for_receipt, BalanceKind};
use crate::rpc::JsonRpc;
use crate::submit::submit;
use crate::throttle::Sleep;

/// Funding transactions sent before the node gets a breather.
const FUNDING_BATCH: usize = 500;
const FUNDING_PAUSE: Duration = Duration::from_secs(6);
const FUNDING_GAS_LIMIT: u64 = 1_000_000;

/// Give every sender what its submissions spend, using the deployer key.
///
/// Sender 0 stands in for the whole pool: if it already holds a balance the step is
/// skipped, so rerunning against the same key files does not fund twice.
pub async fn fund_senders<R: JsonRpc, S: Sleep>(
    rpc: &R,
    config: &Config,
    accounts: &AccountPool,
    workload: &Workload,
    chain_id: u64,
    gas_price: u128,
    sleeper: &S,
) -> eyre::Result<()> {
    let deployer: PrivateKeySigner = config.deployer_key()?.parse().wrap_err("invalid deployer private key")?;
    let first = accounts.sender(0).address();
    let poll = config.run.receipt_poll();

    if eth::balance(rpc, first).await?.is_zero() {
        let amount = U256::from(config.accounts.fund_amount);
        info!(
            senders = %accounts.len().separate_with_commas(),
            %amount,
            deployer = %deployer.address(),
            "funding senders with native balance"
        );
        let calls = accounts.senders().iter().map(|s| (s.address(), Bytes::new(), amount));
        batch_send(rpc, &deployer, calls, chain_id, gas_price, poll, sleeper).await?;
    }

    if let Some(token) = workload.token().filter(|_| workload.spends_sender_tokens()) {
        if balance_of(rpc, BalanceKind::Token(token), first).await?.is_zero() {
            let amount = U256::from(config.token.amount_to_mint);
            info!(senders = %accounts.len().separate_with_commas(), %amount, %token, "minting tokens to senders");
            let calls = accounts.senders().iter().map(|s| (token, mint_to_call(s.address(), amount), U256::ZERO));
            batch_send(rpc, &deployer, calls, chain_id, gas_price, poll, sleeper).await?;
        }
    }

    Ok(())
}

async fn batch_send<R: JsonRpc, S: Sleep>(
    rpc: &R,
    deployer: &PrivateKeySigner,
    calls: impl Iterator<Item = (Address, Bytes, U256)>,
    chain_id: u64,
    gas_price: u128,
    poll: Duration,
    sleeper: &S,
) -> eyre::Result<()> {
    let mut nonce = eth::transaction_count(rpc, deployer.address()).await?;
    let mut last = None;

    for (sent, (to, input, value)) in calls.enumerate() {
        let tx = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            gas_limit: FUNDING_GAS_LIMIT,
            to: TxKind::Call(to),
            value,
            input,
        };
        let hash = submit(rpc, deployer, tx).await.wrap_err_with(|| format!("funding transaction to {to} failed"))?;
        info!(%to, %hash, nonce, "funding transaction sent");
        last = Some(hash);
        nonce += 1;

        if (sent + 1) % FUNDING_BATCH == 0 {
            sleeper.sleep(FUNDING_PAUSE).await;
        }
    }

    if let Some(hash) = last {
        let receipt = wait_for_receipt(rpc, hash, poll, sleeper).await?;
        eyre::ensure!(receipt.succeeded(), "funding transaction {hash} reverted");
    }
    Ok(())
}
