use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy_consensus::TxLegacy;
use evm_tps::accounts::AccountPool;
use evm_tps::config::TokenMethod;
use evm_tps::submit::SubmitError;
use evm_tps::txpool::{DepthSource, PoolMonitor};
use evm_tps::{Config, HttpClient, RpcError, Session, Stats, Variant};
use testserver::{MockNode, MockNodeConfig};

const WEI: u128 = 1_000_000_000_000_000_000;

/// Write key files where the session expects them, so it reuses these accounts.
fn write_accounts(config: &Config, accounts: &AccountPool) {
    std::fs::create_dir_all(&config.accounts.root_dir).unwrap();
    accounts.save(&config.senders_path(), &config.receivers_path()).unwrap();
}

fn base_config(node: &MockNode, dir: &tempfile::TempDir) -> Config {
    let mut config = Config::load(None).unwrap();
    config.node.endpoint = node.url();
    config.accounts.root_dir = dir.path().join("data");
    config.accounts.count = 5;
    config.txpool.check_delay_ms = 10;
    config.run.receipt_poll_ms = 20;
    config.run.transactions = 500;
    config
}

fn prefund(accounts: &AccountPool) -> Vec<(Address, U256)> {
    accounts.senders().iter().map(|s| (s.address(), U256::from(WEI))).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn native_transfers_are_spread_evenly() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = AccountPool::generate(5).unwrap();
    let node = MockNode::spawn(MockNodeConfig {
        alloc: prefund(&accounts),
        block_interval: Duration::from_millis(20),
        ..Default::default()
    })
    .await
    .unwrap();

    let config = base_config(&node, &dir);
    write_accounts(&config, &accounts);

    let mut session = Session::connect(config).await.unwrap();
    // 30M block gas limit over 21k per transfer, doubled.
    assert_eq!(session.ceiling, 2856);

    let report = session.run(Arc::new(Stats::new())).await.unwrap();

    assert_eq!(report.transactions, 500);
    assert_eq!(report.failures, 0);
    assert_eq!(report.receipts.len(), 5);
    assert!(report.receipts.iter().all(|r| r.succeeded()));
    assert_eq!(report.assertions.len(), 5);
    assert!(report.all_passed(), "{report}");
    for (sender, receiver) in accounts.senders().iter().zip(accounts.receivers()) {
        assert_eq!(node.nonce_of(sender.address()), 100);
        assert_eq!(node.balance_of(receiver.address()), U256::from(100));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn throttled_run_survives_rejections() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = AccountPool::generate(5).unwrap();
    let node = MockNode::spawn(MockNodeConfig {
        alloc: prefund(&accounts),
        block_interval: Duration::from_millis(20),
        block_capacity: 20,
        reject_every: Some(7),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut config = base_config(&node, &dir);
    config.node.variant = Variant::Geth;
    config.txpool.max_length = 50;
    config.run.transactions = 300;
    write_accounts(&config, &accounts);

    let mut session = Session::connect(config).await.unwrap();
    assert_eq!(session.ceiling, 50);

    let report = session.run(Arc::new(Stats::new())).await.unwrap();

    assert_eq!(report.transactions, 300);
    assert!(report.failures > 0);
    assert!(report.all_passed(), "{report}");
    for sender in accounts.senders() {
        assert_eq!(node.nonce_of(sender.address()), 60);
    }
}

fn transfer(nonce: u64) -> TxLegacy {
    TxLegacy {
        chain_id: Some(1337),
        nonce,
        gas_price: 1,
        gas_limit: 21_000,
        to: TxKind::Call(Address::ZERO),
        value: U256::ZERO,
        input: Default::default(),
    }
}

#[tokio::test]
async fn unavailable_node_is_a_submission_failure() {
    let node = MockNode::spawn(MockNodeConfig { unavailable_every: Some(1), ..Default::default() }).await.unwrap();
    let rpc = HttpClient::new(&node.url()).unwrap();

    let err = evm_tps::submit::submit(&rpc, &PrivateKeySigner::random(), transfer(0)).await.unwrap_err();

    match err {
        SubmitError::Rpc(RpcError::Status(status)) => assert_eq!(status.as_u16(), 503),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(node.submissions(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_resyncs_after_unavailable_responses() {
    let dir = tempfile::tempdir().unwrap();
    let accounts = AccountPool::generate(5).unwrap();
    let node = MockNode::spawn(MockNodeConfig {
        alloc: prefund(&accounts),
        block_interval: Duration::from_millis(20),
        unavailable_every: Some(5),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut config = base_config(&node, &dir);
    config.run.transactions = 100;
    write_accounts(&config, &accounts);

    let mut session = Session::connect(config).await.unwrap();
    let report = session.run(Arc::new(Stats::new())).await.unwrap();

    assert_eq!(report.transactions, 100);
    // One in five send requests never reaches the pool.
    assert!(report.failures >= 20, "{report}");
    assert!(report.all_passed(), "{report}");
    for (sender, receiver) in accounts.senders().iter().zip(accounts.receivers()) {
        assert_eq!(node.nonce_of(sender.address()), 20);
        assert_eq!(node.balance_of(receiver.address()), U256::from(20));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn token_run_funds_senders_first() {
    let dir = tempfile::tempdir().unwrap();
    let deployer = PrivateKeySigner::random();
    let token = Address::repeat_byte(0x70);
    let node = MockNode::spawn(MockNodeConfig {
        alloc: vec![(deployer.address(), U256::from(WEI) * U256::from(1_000))],
        block_interval: Duration::from_millis(20),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut config = base_config(&node, &dir);
    config.accounts.deployer_private_key = Some(alloy::primitives::hex::encode_prefixed(deployer.to_bytes()));
    config.token.address = Some(token);
    config.token.method = TokenMethod::TransferLoop;
    config.token.transfer_multiplier = 2;
    let accounts = AccountPool::generate(5).unwrap();
    write_accounts(&config, &accounts);

    let mut session = Session::connect(config).await.unwrap();
    for sender in accounts.senders() {
        assert_eq!(node.balance_of(sender.address()), U256::from(WEI));
        assert_eq!(node.token_balance_of(token, sender.address()), U256::from(1_000_000_000u64));
    }

    let report = session.run(Arc::new(Stats::new())).await.unwrap();

    assert_eq!(report.transactions, 500);
    assert!(report.all_passed(), "{report}");
    for receiver in accounts.receivers() {
        // 100 transfers of 1 token, looped twice.
        assert_eq!(node.token_balance_of(token, receiver.address()), U256::from(200));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_variant_reads_the_same_depth() {
    let node = MockNode::spawn(MockNodeConfig { block_interval: Duration::from_secs(3600), ..Default::default() })
        .await
        .unwrap();
    let rpc = HttpClient::new(&node.url()).unwrap();

    let (a, b) = (PrivateKeySigner::random(), PrivateKeySigner::random());
    for (signer, nonce) in [(&a, 0), (&a, 1), (&b, 0)] {
        evm_tps::submit::submit(&rpc, signer, transfer(nonce)).await.unwrap();
    }

    for variant in [Variant::Substrate, Variant::Geth, Variant::Parity] {
        let monitor = PoolMonitor::new(rpc.clone(), variant);
        assert_eq!(monitor.depth().await, 3, "{variant:?}");
    }
}

#[tokio::test]
async fn estimate_only_does_not_submit() {
    let dir = tempfile::tempdir().unwrap();
    let node = MockNode::spawn(MockNodeConfig { estimate_gas: 100_000, ..Default::default() }).await.unwrap();

    let mut config = base_config(&node, &dir);
    config.gas.gas_limit = 50_000;
    let session = Session::connect(config).await.unwrap();

    assert_eq!(session.estimate.gas_limit, 100_000);
    assert_eq!(session.estimate.max_txn_per_block, 300);
    assert_eq!(session.ceiling, 600);
    assert_eq!(node.submissions(), 0);
}
