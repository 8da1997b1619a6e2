use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use vigil_control::{server, ControlPlane};

use crate::commands::load_config;

/// Run `vigil serve`: open the ledger and serve until interrupted.
pub fn run(config_path: Option<&Path>, listen: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    config.validate().context("configuration is not servable")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    rt.block_on(async move {
        let listener = server::bind(&config.server.listen).await?;
        let plane = ControlPlane::open(config).context("failed to open control plane")?;
        info!(
            ledger = %plane.config().ledger_path.display(),
            "ledger opened"
        );

        let interrupted = Arc::clone(&plane);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => {
                    warn!("failed to listen for interrupt: {e}");
                    return;
                }
            }
            interrupted.shutdown();
        });

        server::serve(listener, plane).await?;
        Ok(())
    })
}
