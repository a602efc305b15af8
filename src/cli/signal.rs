//! Interrupt handling
//!
//! The first Ctrl-C cancels the run between steps: the step in flight still
//! commits or rolls back as a whole. A second Ctrl-C exits immediately.

use std::thread;

use tracing::{error, warn};

use crate::migrations::CancellationToken;

use super::errors::{CliError, CliResult};

/// Exit status for an interrupted run
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Listen for Ctrl-C on a background thread and cancel `token` when it arrives
pub fn install_interrupt_handler(token: CancellationToken) -> CliResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CliError::io_error(format!("Failed to start signal listener: {}", e)))?;

    thread::Builder::new()
        .name("aeromigrate-signal".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for Ctrl-C");
                    return;
                }
                warn!("interrupt received, stopping after the current step");
                token.cancel();

                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("second interrupt received, exiting");
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            })
        })
        .map_err(|e| CliError::io_error(format!("Failed to spawn signal listener: {}", e)))?;

    Ok(())
}
