use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use alloy::primitives::U256;
use clap::Parser;
use evm_tps::accounts::AccountPool;
use serde::Serialize;

/// Derive sender and receiver key files plus a genesis alloc that prefunds the senders.
#[derive(Debug, Parser)]
#[command(about, long_about = None)]
struct Args {
    /// Number of sender/receiver pairs.
    #[arg(short, long, default_value_t = 50_000)]
    count: u32,

    #[arg(long, default_value = "test test test test test test test test test test test junk")]
    mnemonic: String,

    /// Directory for senders.json, receivers.json and genesis-alloc.json.
    #[arg(short, long, default_value = "data")]
    out: PathBuf,

    /// Wei granted to every sender in the alloc.
    #[arg(long, default_value = "0xD3C21BCECCEDA1000000")]
    balance: U256,
}

#[derive(Debug, Serialize)]
struct AccountBalance {
    balance: String,
}

fn main() -> eyre::Result<()> {
    let args = Args::parse();
    fs::create_dir_all(&args.out)?;

    println!("Generating {} sender/receiver pairs...", args.count);
    let pool = AccountPool::from_mnemonic(&args.mnemonic, args.count as usize)?;
    pool.save(&args.out.join("senders.json"), &args.out.join("receivers.json"))?;

    let genesis_alloc: BTreeMap<String, AccountBalance> = pool
        .senders()
        .iter()
        .map(|signer| (format!("{:?}", signer.address()), AccountBalance { balance: format!("{:#x}", args.balance) }))
        .collect();

    let alloc_path = args.out.join("genesis-alloc.json");
    fs::write(&alloc_path, serde_json::to_string_pretty(&genesis_alloc)?)?;

    println!("\nSuccessfully generated {} accounts!", args.count * 2);
    println!("Key files and genesis alloc saved to: {}", args.out.display());

    Ok(())
}
