use anyhow::Result;
use clap::Parser;
use media_ingest_core::{cli::Cli, run};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
