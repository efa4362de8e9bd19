use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::catalog::FilterCatalog;
use crate::config::DaemonConfig;
use crate::error::Result;
use crate::ipc::IpcServer;
use crate::ledger::BudgetLedger;
use crate::scheduler::{Scheduler, SchedulerEvent};

/// The daemon: one control task owning the scheduler, one accept loop
/// feeding it events, and one runner task per admitted job.
pub struct Daemon {
    config: DaemonConfig,
    catalog: Arc<FilterCatalog>,
}

impl Daemon {
    /// Validates the filter directory against the budgets. Startup fails
    /// here if any filter binary is missing.
    pub fn new(config: DaemonConfig) -> Result<Self> {
        let catalog = FilterCatalog::build(&config.budgets, &config.filter_dir)?;
        for entry in catalog.entries() {
            tracing::debug!(kind = %entry.kind, max = entry.max_concurrent, "filter registered");
        }
        Ok(Self { config, catalog: Arc::new(catalog) })
    }

    /// Run until shutdown: either the token fires (signal) or a client
    /// sends a shutdown frame. Returns once every running job has drained.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let ledger = Arc::new(BudgetLedger::from_catalog(&self.catalog));
        let (events_tx, events_rx) = mpsc::channel::<SchedulerEvent>(64);

        let scheduler = Scheduler::new(Arc::clone(&self.catalog), ledger, events_tx.clone());
        let control = tokio::spawn(scheduler.run(events_rx));

        let server = IpcServer::bind(&self.config.socket_path, events_tx.clone())?;
        let server_task = tokio::spawn(server.run(shutdown.clone()));

        // A signal becomes a shutdown event like any client frame.
        let signal_events = events_tx.clone();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            signal_token.cancelled().await;
            let _ = signal_events.send(SchedulerEvent::Shutdown).await;
        });
        drop(events_tx);

        if control.await.is_err() {
            tracing::error!("scheduler task panicked");
        }

        // The scheduler drained on its own after a shutdown frame; stop
        // accepting either way.
        shutdown.cancel();
        let _ = server_task.await;
        let _ = std::fs::remove_file(&self.config.socket_path);

        tracing::info!("daemon stopped");
        Ok(())
    }
}
