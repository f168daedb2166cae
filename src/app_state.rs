// Application state shared by every HTTP handler

use std::sync::Arc;

use tracing::info;

use crate::error::LedgerResult;
use crate::scheduler::Scheduler;
use crate::service::WageringService;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub service: WageringService,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(service: WageringService) -> Self {
        let scheduler = Scheduler::new(service.clone());
        info!(
            base_currency = %service.config().base_currency,
            snapshot = service.config().server.snapshot_path.as_deref().unwrap_or("none"),
            "✅ wager ledger initialized"
        );
        Self { service, scheduler }
    }

    pub fn shared(service: WageringService) -> SharedState {
        Arc::new(Self::new(service))
    }

    /// Write the snapshot to the configured path, if any
    pub fn save_to_disk(&self) -> LedgerResult<bool> {
        match &self.service.config().server.snapshot_path {
            Some(path) => {
                self.service.save_snapshot(path)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
