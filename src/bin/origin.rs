use anyhow::Result;
use clap::Parser;

use relaycache::{cli::OriginCli, logging, origin};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = OriginCli::parse();
    logging::init_logger(cli.log)?;
    origin::run(cli.listen).await
}
