//! Apply the ledger schema migrations.
//!
//! Usage: `tally-migrate [MIGRATIONS_DIR]` (defaults to `./migrations`).
//! Connection settings come from `config/tally.toml` and `TALLY__*` variables.

use std::path::PathBuf;

use anyhow::Context;

use tally_infra::LedgerConfig;
use tally_infra::store::postgres::run_migrations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tally_observability::init();

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("migrations"));

    let config = LedgerConfig::load().context("loading configuration")?;
    let pool = config.connect().await.context("connecting to the database")?;

    run_migrations(&pool, &dir)
        .await
        .with_context(|| format!("applying migrations from {}", dir.display()))?;

    tracing::info!(dir = %dir.display(), "ledger migrations applied");
    Ok(())
}
