use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use replica_probe::{
    cli::Cli, driver::Driver, pool::ConnectionPool, store::mongo::MongoConnector,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Cli::parse().into_config()?;
    info!(
        nodes = config.nodes.len(),
        key = %config.key,
        read_concern = %config.read_level,
        write_concern = %config.write_ack,
        "starting replica probe"
    );

    let connector = Arc::new(MongoConnector::new(&config));
    let pool = Arc::new(ConnectionPool::new(
        connector,
        &config.nodes,
        config.timeouts.connect,
    ));
    pool.connect_all(config.timeouts.socket).await;

    let mut driver = Driver::start(pool, config).await;
    let mut stdout = tokio::io::stdout();
    let iterations = driver.run_until_ctrl_c(&mut stdout).await?;
    info!(iterations, "replica probe stopped");

    Ok(())
}
