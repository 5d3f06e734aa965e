use std::net::SocketAddr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use testserver::{MockNode, MockNodeConfig};
use thousands::Separable;
use tokio::time::interval;

/// Usage: `testserver [listen-addr] [block-capacity] [prefunded-address...]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut args = std::env::args().skip(1);
    let addr: SocketAddr = args.next().as_deref().unwrap_or("127.0.0.1:9944").parse()?;
    let block_capacity: usize = args.next().as_deref().unwrap_or("2000").parse()?;
    let mut alloc = Vec::new();
    for address in args {
        alloc.push((address.parse::<Address>()?, U256::from(10).pow(U256::from(24))));
    }

    let node = MockNode::bind(addr, MockNodeConfig { block_capacity, alloc, ..Default::default() }).await?;
    println!("Mock node listening on {}", node.url());

    let mut interval = interval(Duration::from_secs(1));
    let mut last_total = 0u64;
    interval.tick().await;
    loop {
        interval.tick().await;
        let total = node.requests();
        println!(
            "RPS: {}, Total requests: {}, Submissions: {}, Pending: {}, Block: {}",
            (total - last_total).separate_with_commas(),
            total.separate_with_commas(),
            node.submissions().separate_with_commas(),
            node.pending_len().separate_with_commas(),
            node.block_number()
        );
        last_total = total;
    }
}
