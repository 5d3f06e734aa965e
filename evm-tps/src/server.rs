use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eyre::Context;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::accounts::AccountPool;
use crate::eth::{self, Block, BlockId};
use crate::nonce::SharedNonces;
use crate::payload::TxTemplate;
use crate::rpc::JsonRpc;
use crate::session::Session;
use crate::stats::Stats;
use crate::submit::{submit, SubmitError};
use crate::txpool::{PoolMonitor, Variant};
use crate::utils::zero_pad;

/// Poll interval for requests parked behind a full pool.
const POOL_WAIT: Duration = Duration::from_millis(5);
/// Requests slower than this get flagged in the log.
const SLOW_REQUEST: Duration = Duration::from_secs(12);

/// Request-driven submission: every `GET /sendRawTransaction` sends one transfer from
/// the next account in round-robin order.
pub struct Frontend<R> {
    rpc: R,
    accounts: AccountPool,
    templates: Vec<TxTemplate>,
    nonces: SharedNonces,
    next_key: AtomicUsize,
    requests: AtomicU64,
    /// Kept fresh by the background pool checker.
    pool_depth: Arc<AtomicU64>,
    ceiling: u64,
    stats: Arc<Stats>,
}

impl<R: JsonRpc> Frontend<R> {
    pub fn new(session: Session<R>, pool_depth: Arc<AtomicU64>, stats: Arc<Stats>) -> Self {
        let templates = session.templates();
        Self {
            rpc: session.rpc,
            accounts: session.accounts,
            templates,
            nonces: session.nonces.into_shared(),
            next_key: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            pool_depth,
            ceiling: session.ceiling,
            stats,
        }
    }

    async fn wait_for_pool(&self) {
        if self.ceiling == 0 {
            return;
        }
        while self.pool_depth.load(Ordering::Relaxed) >= self.ceiling {
            tokio::time::sleep(POOL_WAIT).await;
        }
    }

    pub async fn send_raw_transaction(&self) -> (StatusCode, String) {
        self.wait_for_pool().await;

        let key = self.next_key.fetch_add(1, Ordering::Relaxed) % self.accounts.len();
        let signer = self.accounts.sender(key);
        let start = Instant::now();

        // Holding the slot is the right to submit from this sender.
        let mut slot = self.nonces.acquire(key).await;
        let attempt = async {
            let nonce = slot.ready(&self.rpc, signer.address()).await?;
            let hash = submit(&self.rpc, signer, self.templates[key].with_nonce(nonce)).await?;
            Ok::<_, SubmitError>((nonce, hash))
        }
        .await;

        match attempt {
            Ok((nonce, hash)) => {
                slot.advance();
                drop(slot);
                self.stats.inc_submitted();

                let request = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
                let elapsed = start.elapsed();
                let line = format!(
                    "[req: {}][key: {}] sendRawTransaction: {hash} [nonce: {nonce} | pool: {} | time: {} ms]{}",
                    zero_pad(request, 6),
                    zero_pad(key as u64, 5),
                    self.pool_depth.load(Ordering::Relaxed),
                    elapsed.as_millis(),
                    if elapsed > SLOW_REQUEST { " ***" } else { "" }
                );
                info!("{line}");
                (StatusCode::OK, line)
            }
            Err(err) => {
                slot.invalidate();
                drop(slot);
                self.stats.inc_errors();
                error!(key, address = %signer.address(), %err, "sendRawTransaction failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}"))
            }
        }
    }

    pub async fn get_block(&self) -> (StatusCode, String) {
        match eth::block(&self.rpc, BlockId::Latest).await {
            Ok(Some(block)) => (StatusCode::OK, block.number.to_string()),
            Ok(None) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error: no latest block".to_string()),
            Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {err}")),
        }
    }

    pub async fn route(&self, method: &Method, path: &str) -> (StatusCode, String) {
        match (method, path) {
            (&Method::GET, "/sendRawTransaction") => self.send_raw_transaction().await,
            (&Method::GET, "/getBlock") => self.get_block().await,
            (_, "/sendRawTransaction" | "/getBlock") => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
            }
            _ => (StatusCode::NOT_FOUND, "Not found".to_string()),
        }
    }

    async fn handle(self: Arc<Self>, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let (status, body) = self.route(req.method(), req.uri().path()).await;
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        Ok(response)
    }
}

/// Succeeded and reverted receipts of `block`. Parity nodes return the whole block in
/// one call, everything else is fetched per transaction.
pub async fn count_receipts<R: JsonRpc>(rpc: &R, variant: Variant, block: &Block) -> (usize, usize) {
    let receipts = match variant {
        Variant::Parity => match eth::parity_block_receipts(rpc, BlockId::Number(block.number.to())).await {
            Ok(receipts) => receipts,
            Err(err) => {
                debug!(%err, block = %block.number, "failed to fetch block receipts");
                Vec::new()
            }
        },
        Variant::Substrate | Variant::Geth => {
            let mut receipts = Vec::with_capacity(block.transactions.len());
            for hash in &block.transactions {
                if let Ok(Some(receipt)) = eth::transaction_receipt(rpc, *hash).await {
                    receipts.push(receipt);
                }
            }
            receipts
        }
    };

    let succeeded = receipts.iter().filter(|r| r.succeeded()).count();
    (succeeded, receipts.len() - succeeded)
}

/// Log how many receipts each new block produced.
pub async fn watch_blocks<R: JsonRpc>(rpc: R, variant: Variant, poll: Duration) {
    let mut interval = tokio::time::interval(poll);
    let mut last = None;
    loop {
        interval.tick().await;
        let block = match eth::block(&rpc, BlockId::Latest).await {
            Ok(Some(block)) => block,
            Ok(None) => continue,
            Err(err) => {
                debug!(%err, "failed to fetch latest block");
                continue;
            }
        };
        if last == Some(block.number) {
            continue;
        }
        last = Some(block.number);

        let (succeeded, reverted) = count_receipts(&rpc, variant, &block).await;
        info!(block = %block.number, transactions = block.transactions.len(), succeeded, reverted, "block receipts");
    }
}

/// Serve the front-end until the listener fails.
pub async fn serve<R: JsonRpc + Clone + 'static>(session: Session<R>, stats: Arc<Stats>) -> eyre::Result<()> {
    let addr = format!("{}:{}", session.config.server.host, session.config.server.port);
    let listener = TcpListener::bind(&addr).await.wrap_err_with(|| format!("failed to bind {addr}"))?;

    let pool_depth = Arc::new(AtomicU64::new(0));
    let monitor = PoolMonitor::new(session.rpc.clone(), session.config.node.variant);
    tokio::spawn(monitor.start_checker(pool_depth.clone(), session.config.txpool.checker_interval()));
    tokio::spawn(watch_blocks(session.rpc.clone(), session.config.node.variant, session.config.run.receipt_poll()));
    tokio::spawn({
        let stats = stats.clone();
        async move { stats.start_reporter(Duration::from_secs(1)).await }
    });

    info!(ceiling = session.ceiling, senders = session.accounts.len(), "listening on http://{addr}");
    let frontend = Arc::new(Frontend::new(session, pool_depth, stats));

    loop {
        let (stream, _) = listener.accept().await?;
        let frontend = frontend.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| frontend.clone().handle(req));
            if let Err(err) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
                debug!(?err, "error serving connection");
            }
        });
    }
}
