use clap::Parser;
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

mod cli;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    cli::Cli::parse().cmd.run().await
}
