use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::Context;
use thousands::Separable;
use tracing::info;

use crate::accounts::AccountPool;
use crate::config::Config;
use crate::dispatch::{DispatchOptions, Dispatcher};
use crate::estimate::{estimate, Estimate};
use crate::eth;
use crate::fund::fund_senders;
use crate::nonce::NonceTracker;
use crate::payload::{FeeParams, TxTemplate, Workload};
use crate::report::{assert_balances, balances_of, wait_for_receipt, BalanceKind, Report};
use crate::rpc::{HttpClient, JsonRpc};
use crate::stats::Stats;
use crate::throttle::{Sleep, Throttle, TokioSleep};
use crate::txpool::PoolMonitor;

/// Everything fixed before the first benchmark submission: accounts, fees, starting
/// nonces and the pool ceiling.
pub struct Session<R> {
    pub config: Config,
    pub rpc: R,
    pub accounts: AccountPool,
    pub nonces: NonceTracker,
    pub workload: Workload,
    pub fees: FeeParams,
    pub estimate: Estimate,
    /// Pending-pool ceiling in effect, `0` when throttling is off.
    pub ceiling: u64,
}

impl Session<HttpClient> {
    pub async fn connect(config: Config) -> eyre::Result<Self> {
        let rpc = HttpClient::new(&config.node.endpoint)
            .wrap_err_with(|| format!("invalid node endpoint {}", config.node.endpoint))?;
        Self::setup(config, rpc, &TokioSleep).await
    }
}

impl<R: JsonRpc> Session<R> {
    pub async fn setup<S: Sleep>(config: Config, rpc: R, sleeper: &S) -> eyre::Result<Self> {
        std::fs::create_dir_all(&config.accounts.root_dir)
            .wrap_err_with(|| format!("failed to create {}", config.accounts.root_dir.display()))?;

        let chain_id = match config.node.chain_id {
            Some(chain_id) => chain_id,
            None => eth::chain_id(&rpc).await.wrap_err("failed to read chain id from node")?,
        };
        let gas_price = match config.node.gas_price {
            Some(gas_price) => gas_price,
            None => eth::gas_price(&rpc).await.wrap_err("failed to read gas price from node")?,
        };
        info!(endpoint = %config.node.endpoint, variant = ?config.node.variant, chain_id, gas_price, "connected");

        let accounts = AccountPool::load_or_generate(&config)?;
        let workload = Workload::from_config(&config);

        if config.accounts.fund_senders && config.accounts.deployer_private_key.is_some() {
            fund_senders(&rpc, &config, &accounts, &workload, chain_id, gas_price, sleeper).await?;
        }

        let senders: Vec<_> = accounts.senders().iter().map(|s| s.address()).collect();
        let nonces = NonceTracker::fetch(&rpc, &senders).await.wrap_err("failed to fetch sender nonces")?;

        let probe = workload.probe(senders[0], accounts.receiver(0).address(), gas_price);
        let estimate = estimate(&rpc, &probe, config.gas.gas_limit, config.txpool.multiplier).await?;
        let ceiling = config.fixed_pool_ceiling().unwrap_or(estimate.pool_ceiling);
        info!(gas_limit = estimate.gas_limit, ceiling = %ceiling.separate_with_commas(), "setup complete");

        let fees = FeeParams { chain_id, gas_price, gas_limit: estimate.gas_limit };
        Ok(Self { config, rpc, accounts, nonces, workload, fees, estimate, ceiling })
    }

    /// One template per sender/receiver pair, indexed by sender id.
    pub fn templates(&self) -> Vec<TxTemplate> {
        (0..self.accounts.len())
            .map(|id| self.workload.template(id, self.accounts.receiver(id).address(), self.fees))
            .collect()
    }

    /// Which receiver balance the run asserts on, if any.
    pub fn balance_kind(&self) -> Option<BalanceKind> {
        match &self.workload {
            Workload::Native { .. } => Some(BalanceKind::Native),
            Workload::Token { address, .. } if self.config.token.assert_balance => Some(BalanceKind::Token(*address)),
            _ => None,
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            target: self.config.run.transactions,
            delay: self.config.run.delay(),
            log_every: self.config.run.log_every,
            max_retries: self.config.run.max_retries,
        }
    }

    /// Run the benchmark on the tokio runtime and clock.
    pub async fn run(&mut self, stats: Arc<Stats>) -> eyre::Result<Report> {
        let reporter = tokio::spawn({
            let stats = stats.clone();
            async move { stats.start_reporter(Duration::from_secs(1)).await }
        });
        let report = self.run_with(&stats, &TokioSleep).await;
        reporter.abort();
        report
    }

    /// Submit the configured number of transactions, wait for them to land, and check
    /// the receivers' balances.
    pub async fn run_with<S: Sleep>(&mut self, stats: &Stats, sleeper: &S) -> eyre::Result<Report> {
        let templates = self.templates();
        let receivers = self.accounts.receiver_addresses();
        let kind = self.balance_kind();

        let before = match kind {
            Some(kind) => balances_of(&self.rpc, kind, &receivers).await.wrap_err("failed to read starting balances")?,
            None => Vec::new(),
        };

        let pool = PoolMonitor::new(&self.rpc, self.config.node.variant);
        let mut throttle = Throttle::new(self.ceiling, self.config.txpool.check_delay());

        let start = Instant::now();
        let outcome = Dispatcher {
            rpc: &self.rpc,
            accounts: &self.accounts,
            templates: &templates,
            pool: &pool,
            sleeper,
            stats,
            options: self.dispatch_options(),
        }
        .run(&mut self.nonces, &mut throttle)
        .await?;

        info!("waiting for the last transaction of every sender");
        let mut receipts = Vec::new();
        for hash in outcome.last_hashes.iter().flatten() {
            receipts.push(wait_for_receipt(&self.rpc, *hash, self.config.run.receipt_poll(), sleeper).await?);
        }
        let elapsed = start.elapsed();

        let assertions = match (kind, self.workload.delta_per_tx()) {
            (Some(kind), Some(delta)) => {
                let after =
                    balances_of(&self.rpc, kind, &receivers).await.wrap_err("failed to read final balances")?;
                assert_balances(&receivers, &before, &after, &outcome.per_sender, delta)
            }
            _ => Vec::new(),
        };

        Ok(Report { transactions: outcome.accepted, failures: outcome.failures, elapsed, receipts, assertions })
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;

    use super::*;
    use crate::dispatch::testing::FakeNode;
    use crate::throttle::testing::RecordingSleep;

    #[tokio::test]
    async fn native_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load(None).unwrap();
        config.accounts.count = 3;
        config.accounts.root_dir = dir.path().join("keys");
        config.run.transactions = 30;

        let fake = Arc::new(FakeNode::default());
        let rpc = fake.rpc();
        let sleeper = RecordingSleep::default();

        let mut session = Session::setup(config, rpc, &sleeper).await.unwrap();
        assert_eq!(session.fees.chain_id, 1337);
        assert_eq!(session.fees.gas_limit, 200_000);
        // 30M / 21k * 2
        assert_eq!(session.ceiling, 2856);
        assert!(dir.path().join("keys/senders.json").exists());

        let stats = Stats::new();
        let report = session.run_with(&stats, &sleeper).await.unwrap();

        assert_eq!(report.transactions, 30);
        assert_eq!(report.receipts.len(), 3);
        assert_eq!(report.assertions.len(), 3);
        assert!(report.all_passed(), "{report}");
        assert_eq!(session.nonces.snapshot(), vec![10, 10, 10]);
        for receiver in session.accounts.receiver_addresses() {
            assert_eq!(fake.balance_of(receiver), U256::from(10));
        }
    }

    #[tokio::test]
    async fn fixed_ceiling_overrides_derived_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load(None).unwrap();
        config.accounts.count = 1;
        config.accounts.root_dir = dir.path().to_path_buf();
        config.txpool.max_length = 0;

        let fake = Arc::new(FakeNode::default());
        let session = Session::setup(config, fake.rpc(), &RecordingSleep::default()).await.unwrap();

        assert_eq!(session.ceiling, 0);
        assert_eq!(session.estimate.pool_ceiling, 2856);
    }
}
