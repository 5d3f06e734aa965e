use std::time::Duration;

use alloy::primitives::TxHash;
use thousands::Separable;
use tracing::{debug, info, warn};

use crate::accounts::AccountPool;
use crate::nonce::NonceTracker;
use crate::payload::TxTemplate;
use crate::rpc::JsonRpc;
use crate::stats::Stats;
use crate::submit::{submit, SubmitError};
use crate::throttle::{Sleep, Throttle};
use crate::txpool::DepthSource;

#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Accepted submissions to reach before stopping.
    pub target: u64,
    /// Pause after every submission attempt, independent of pool throttling.
    pub delay: Duration,
    pub log_every: u64,
    /// Consecutive failures on one slot before giving up, `0` for never.
    pub max_retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("sender {id} failed {attempts} consecutive submissions: {source}")]
    RetriesExhausted {
        id: usize,
        attempts: u32,
        #[source]
        source: SubmitError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub accepted: u64,
    pub failures: u64,
    /// Accepted submissions per sender id.
    pub per_sender: Vec<u64>,
    /// Hash of the most recent accepted submission per sender id.
    pub last_hashes: Vec<Option<TxHash>>,
}

impl DispatchOutcome {
    fn new(senders: usize) -> Self {
        Self { accepted: 0, failures: 0, per_sender: vec![0; senders], last_hashes: vec![None; senders] }
    }

    fn record(&mut self, id: usize, hash: TxHash) {
        self.accepted += 1;
        self.per_sender[id] += 1;
        self.last_hashes[id] = Some(hash);
    }
}

/// Round-robin submission across all sender/receiver pairs.
///
/// Senders are visited strictly one at a time, so no two submissions ever race on a
/// nonce. A rejected submission invalidates the sender's nonce and the same slot is
/// retried without advancing the counter.
pub struct Dispatcher<'a, R, D, S> {
    pub rpc: &'a R,
    pub accounts: &'a AccountPool,
    pub templates: &'a [TxTemplate],
    pub pool: &'a D,
    pub sleeper: &'a S,
    pub stats: &'a Stats,
    pub options: DispatchOptions,
}

impl<R: JsonRpc, D: DepthSource, S: Sleep> Dispatcher<'_, R, D, S> {
    pub async fn run(&self, nonces: &mut NonceTracker, throttle: &mut Throttle) -> Result<DispatchOutcome, DispatchError> {
        let senders = self.accounts.len();
        debug_assert_eq!(senders, self.templates.len());
        debug_assert_eq!(senders, nonces.len());

        let DispatchOptions { target, delay, log_every, max_retries } = self.options;
        let mut outcome = DispatchOutcome::new(senders);
        let mut next_slot = 0usize;
        let mut consecutive_failures = 0u32;

        info!(
            transactions = %target.separate_with_commas(),
            senders,
            ceiling = throttle.ceiling(),
            "sending transactions"
        );

        while outcome.accepted < target {
            let id = next_slot % senders;
            let signer = self.accounts.sender(id);
            let slot = nonces.slot_mut(id);

            let attempt = async {
                let nonce = slot.ready(self.rpc, signer.address()).await?;
                let hash = submit(self.rpc, signer, self.templates[id].with_nonce(nonce)).await?;
                Ok::<_, SubmitError>((nonce, hash))
            }
            .await;

            if !delay.is_zero() {
                self.sleeper.sleep(delay).await;
            }

            match attempt {
                Ok((nonce, hash)) => {
                    slot.advance();
                    outcome.record(id, hash);
                    self.stats.inc_submitted();
                    consecutive_failures = 0;
                    next_slot += 1;
                    debug!(id, nonce, %hash, "submitted");

                    if outcome.accepted % log_every == 0 {
                        info!(
                            "submitted {} / {}",
                            outcome.accepted.separate_with_commas(),
                            target.separate_with_commas()
                        );
                    }

                    throttle.checkpoint(outcome.accepted, self.pool, self.sleeper).await;
                }
                Err(err) => {
                    slot.invalidate();
                    outcome.failures += 1;
                    self.stats.inc_errors();
                    consecutive_failures += 1;
                    warn!(id, address = %signer.address(), %err, "eth_sendRawTransaction failed, resyncing nonce");

                    if max_retries > 0 && consecutive_failures >= max_retries {
                        return Err(DispatchError::RetriesExhausted { id, attempts: consecutive_failures, source: err });
                    }
                }
            }
        }

        Ok(outcome)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use alloy::primitives::{Address, U256};

    use super::testing::FakeNode;
    use super::*;
    use crate::payload::{FeeParams, Workload};
    use crate::throttle::testing::{RecordingSleep, ScriptedDepth};

    const FEES: FeeParams = FeeParams { chain_id: 1337, gas_price: 1, gas_limit: 21_000 };

    struct Fixture {
        accounts: AccountPool,
        templates: Vec<TxTemplate>,
        stats: Stats,
        sleeper: RecordingSleep,
    }

    impl Fixture {
        fn new(senders: usize) -> Self {
            let accounts = AccountPool::generate(senders).unwrap();
            let workload = Workload::Native { value: U256::from(1) };
            let templates =
                (0..senders).map(|id| workload.template(id, accounts.receiver(id).address(), FEES)).collect();
            Self { accounts, templates, stats: Stats::new(), sleeper: RecordingSleep::default() }
        }

        fn dispatcher<'a, R: JsonRpc, D: DepthSource>(
            &'a self,
            rpc: &'a R,
            pool: &'a D,
            options: DispatchOptions,
        ) -> Dispatcher<'a, R, D, RecordingSleep> {
            Dispatcher {
                rpc,
                accounts: &self.accounts,
                templates: &self.templates,
                pool,
                sleeper: &self.sleeper,
                stats: &self.stats,
                options,
            }
        }

        fn addresses(&self) -> Vec<Address> {
            self.accounts.senders().iter().map(|s| s.address()).collect()
        }
    }

    fn options(target: u64) -> DispatchOptions {
        DispatchOptions { target, delay: Duration::ZERO, log_every: 1000, max_retries: 0 }
    }

    #[tokio::test]
    async fn distributes_round_robin() {
        let fixture = Fixture::new(3);
        let node = Arc::new(FakeNode::default());
        let rpc = node.rpc();
        let mut nonces = NonceTracker::new([0, 0, 0]);
        let mut throttle = Throttle::new(0, Duration::ZERO);

        let outcome = fixture
            .dispatcher(&rpc, &ScriptedDepth::new([0]), options(9))
            .run(&mut nonces, &mut throttle)
            .await
            .unwrap();

        assert_eq!(outcome.accepted, 9);
        assert_eq!(outcome.failures, 0);
        assert_eq!(outcome.per_sender, vec![3, 3, 3]);
        assert!(outcome.last_hashes.iter().all(Option::is_some));
        assert_eq!(nonces.snapshot(), vec![3, 3, 3]);
        for address in fixture.addresses() {
            assert_eq!(node.nonce_of(address), 3);
        }
        assert_eq!(rpc.calls_to("eth_getTransactionCount"), 0);
        assert_eq!(fixture.stats.submitted(), 9);
    }

    #[tokio::test]
    async fn rejected_submission_resyncs_and_retries_same_slot() {
        let fixture = Fixture::new(2);
        let node = Arc::new(FakeNode::default());
        node.reject.lock().unwrap().extend([1, 2]);
        let rpc = node.rpc();
        let mut nonces = NonceTracker::new([0, 0]);
        let mut throttle = Throttle::new(0, Duration::ZERO);

        let outcome = fixture
            .dispatcher(&rpc, &ScriptedDepth::new([0]), options(4))
            .run(&mut nonces, &mut throttle)
            .await
            .unwrap();

        assert_eq!(outcome.accepted, 4);
        assert_eq!(outcome.failures, 2);
        assert_eq!(outcome.per_sender, vec![2, 2]);
        assert_eq!(node.submissions.load(Ordering::Relaxed), 6);
        // One resync per failure, both for sender 1.
        let resyncs = rpc.params_of("eth_getTransactionCount");
        assert_eq!(resyncs.len(), 2);
        assert_eq!(resyncs[0][0], serde_json::json!(fixture.addresses()[1]));
        assert_eq!(fixture.stats.errors(), 2);
    }

    #[tokio::test]
    async fn stale_local_nonce_is_recovered() {
        let fixture = Fixture::new(1);
        let node = Arc::new(FakeNode::default());
        node.nonces.lock().unwrap().insert(fixture.addresses()[0], 5);
        let rpc = node.rpc();
        // Local cache lags the chain by five.
        let mut nonces = NonceTracker::new([0]);
        let mut throttle = Throttle::new(0, Duration::ZERO);

        let outcome = fixture
            .dispatcher(&rpc, &ScriptedDepth::new([0]), options(3))
            .run(&mut nonces, &mut throttle)
            .await
            .unwrap();

        assert_eq!(outcome.accepted, 3);
        assert_eq!(outcome.failures, 1);
        assert_eq!(nonces.snapshot(), vec![8]);
    }

    #[tokio::test]
    async fn bounded_retries_give_up() {
        let fixture = Fixture::new(1);
        let node = Arc::new(FakeNode::default());
        node.reject_all.store(true, Ordering::Relaxed);
        let rpc = node.rpc();
        let mut nonces = NonceTracker::new([0]);
        let mut throttle = Throttle::new(0, Duration::ZERO);

        let err = fixture
            .dispatcher(&rpc, &ScriptedDepth::new([0]), DispatchOptions { max_retries: 3, ..options(10) })
            .run(&mut nonces, &mut throttle)
            .await
            .unwrap_err();

        let DispatchError::RetriesExhausted { id, attempts, .. } = err;
        assert_eq!((id, attempts), (0, 3));
        assert_eq!(node.submissions.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn throttles_at_checkpoints() {
        let fixture = Fixture::new(2);
        let node = Arc::new(FakeNode::default());
        let rpc = node.rpc();
        let mut nonces = NonceTracker::new([0, 0]);
        let check_delay = Duration::from_millis(250);
        let mut throttle = Throttle::new(4, check_delay);
        // First checkpoint (after 4) sees a full pool that drains over two polls.
        let depth = ScriptedDepth::new([4, 4, 3, 0]);

        let outcome =
            fixture.dispatcher(&rpc, &depth, options(8)).run(&mut nonces, &mut throttle).await.unwrap();

        assert_eq!(outcome.accepted, 8);
        // depth 4 holds, depth 3 is below 3.2 and releases.
        assert_eq!(fixture.sleeper.count(), 2);
        assert_eq!(fixture.sleeper.total(), check_delay * 2);
    }

    #[tokio::test]
    async fn fixed_delay_after_every_attempt() {
        let fixture = Fixture::new(1);
        let node = Arc::new(FakeNode::default());
        let rpc = node.rpc();
        let mut nonces = NonceTracker::new([0]);
        let mut throttle = Throttle::new(0, Duration::ZERO);
        let delay = Duration::from_millis(10);

        fixture
            .dispatcher(&rpc, &ScriptedDepth::new([0]), DispatchOptions { delay, ..options(5) })
            .run(&mut nonces, &mut throttle)
            .await
            .unwrap();

        assert_eq!(fixture.sleeper.count(), 5);
        assert_eq!(fixture.sleeper.total(), delay * 5);
    }
}
