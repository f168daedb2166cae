/// Wager Ledger - double-entry-style wallet ledger with escrow, risk &
/// compliance gating, wager lifecycle and reconciliation
/// Exports all modules for use as a library crate

pub mod error;
pub mod clock;
pub mod config;
pub mod store;
pub mod ledger;
pub mod escrow;
pub mod compliance;
pub mod wagers;
pub mod audit;
pub mod rates;
pub mod scheduler;
pub mod service;

pub mod app_state;
pub mod handlers;
pub mod models;
pub mod routes;

use tracing_subscriber::EnvFilter;

// Re-export the error taxonomy and configuration
pub use error::{LedgerError, LedgerResult, Severity};
pub use config::LedgerConfig;
pub use clock::{Clock, ManualClock, SystemClock};

// Re-export the core
pub use store::{Store, StoreSnapshot};
pub use ledger::{AtomicUnit, LedgerCore, Transaction, TransactionFilter, TxMetadata, TxStatus, TxType, Wallet};
pub use escrow::{EscrowAccount, EscrowKind, EscrowReference, EscrowService, EscrowTransaction};
pub use compliance::{ComplianceDesk, ComplianceGate, ComplianceKind, ComplianceState, Decision, DenyReason, RiskFlag, RiskLimits};
pub use wagers::{CreateWager, Dispute, Resolution, Wager, WagerManager, WagerOutcome, WagerStats, WagerStatus};
pub use audit::{ChargebackDesk, ChargebackOutcome, Discrepancy, DiscrepancyKind, ReconciliationReport, Reconciler};
pub use rates::{Currency, ExchangeRateCache, HttpRateProvider, RateProvider, StaticRateProvider};
pub use scheduler::{JobKind, JobStatus, Scheduler};
pub use service::WageringService;

// Re-export the HTTP surface
pub use app_state::{AppState, SharedState};
pub use routes::build_router;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wager_ledger=info,tower_http=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
