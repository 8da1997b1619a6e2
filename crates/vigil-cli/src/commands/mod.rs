//! CLI command implementations for the `vigil` binary.

pub mod ledger;
pub mod serve;
pub mod token;
pub mod zones;

use std::path::Path;

use anyhow::{Context, Result};

use vigil_ledger::LedgerStore;
use vigil_types::VigilConfig;

/// Load the configuration from `path` (if given) plus `VIGIL_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<VigilConfig> {
    VigilConfig::load(path).context("failed to load configuration")
}

/// Open the ledger named by the configuration.
pub fn open_ledger(config: &VigilConfig) -> Result<LedgerStore> {
    LedgerStore::open(&config.ledger_path)
        .with_context(|| format!("failed to open ledger {}", config.ledger_path.display()))
}
