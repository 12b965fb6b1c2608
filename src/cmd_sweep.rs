//! Lease sweeper service.

use std::sync::Arc;

use tracing::{info, warn};

use annoqueue_workqueue::{LeaseSweeper, SweepReport, SweeperConfig};

use crate::app::{App, CmdResult};

/// Run one sweep, or the sweeper service until Ctrl-C.
pub(crate) async fn handle_sweep_command(app: &App, once: bool) -> CmdResult {
    let sweeper = LeaseSweeper::new(
        app.store.clone(),
        app.store.clone(),
        SweeperConfig::from_config(&app.config),
    );

    if once {
        let report = sweeper.run_once().await?;
        return app.emit(&report, print_report);
    }

    if !app.config.sweeper.enabled {
        warn!("Sweeper is disabled in configuration; nothing to do");
        return Ok(());
    }

    let sweeper = Arc::new(sweeper);
    let handle = sweeper.clone().spawn();
    info!(
        "Sweeper running every {}s (Ctrl-C to stop)",
        app.config.sweeper.interval_secs
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for the current sweep");
    handle.stop().await;

    info!(
        "Sweeper stopped after {} ticks, {} locks released",
        sweeper.tick_count(),
        sweeper.released_total()
    );
    Ok(())
}

fn print_report(report: &SweepReport) {
    println!("Queues scanned: {}", report.queues_scanned);
    println!("Locks released: {}", report.locks_released);
    for (queue, error) in &report.failures {
        println!("Failed:         {} ({})", queue, error);
    }
}
