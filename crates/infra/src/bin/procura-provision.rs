//! Startup migration phase: connect, provision the schema, report readiness.

use anyhow::Context;
use tracing::info;

use procura_infra::{Config, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    procura_observability::init();

    let config = Config::from_env().context("loading configuration")?;
    db::provision(&config)
        .await
        .context("provisioning the database schema")?;

    info!(
        max_connections = config.max_connections,
        procurement_recipients = config.procurement_recipients.len(),
        "procura store ready"
    );
    Ok(())
}
