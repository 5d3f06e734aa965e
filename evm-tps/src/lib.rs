//! Sustained transaction load against an EVM JSON-RPC node, with back-pressure from the
//! node's pending pool.

pub mod accounts;
pub mod config;
pub mod dispatch;
pub mod estimate;
pub mod eth;
pub mod fund;
pub mod nonce;
pub mod payload;
pub mod report;
pub mod rpc;
pub mod server;
pub mod session;
pub mod stats;
pub mod submit;
pub mod throttle;
pub mod txpool;
pub mod utils;

pub use config::Config;
pub use report::Report;
pub use rpc::{HttpClient, JsonRpc, RpcError};
pub use session::Session;
pub use stats::Stats;
pub use txpool::Variant;
