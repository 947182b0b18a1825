use clap::Parser;
use outline_mirror::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(Cli::parse()).await?;
    Ok(())
}
