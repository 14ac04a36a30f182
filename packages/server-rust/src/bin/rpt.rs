//! `rpt` binary: parses configuration from flags and `RPT_*` variables,
//! installs logging, then runs until the lifecycle coordinator releases.

use clap::Parser;
use rpt_server::{logging, Rpt, RptArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = RptArgs::parse();
    logging::init(args.log_format)?;

    let config = args.into_config()?;
    tracing::debug!(?config, "configuration loaded");
    if let Some(addr) = config.metrics_listen_addr {
        logging::init_metrics(addr)?;
    }

    Rpt::from_config(&config).await?.run().await
}
