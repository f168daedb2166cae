//! Reconciliation & Audit Engine
//!
//! Recomputes every stored balance from its journal and reports drift. Runs
//! out of band: each wallet and escrow row is read under its own lock for a
//! moment, never all at once, so live traffic keeps flowing. Findings are
//! logged and kept as the latest report; nothing here ever fails a request.

pub mod chargeback;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::error::{LedgerError, Severity};
use crate::escrow::{EscrowKind, WAGER_STAKES_PREFIX};
use crate::ledger::Transaction;
use crate::store::Store;
use crate::wagers::WagerStats;

pub use chargeback::{ChargebackDesk, ChargebackOutcome};

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// Stored balance differs from the sum of completed transaction effects
    WalletBalance,
    /// Stored pending balance differs from the sum of pending debit holds
    PendingHold,
    /// Stored escrow balance differs from the sum of escrow movements
    EscrowBalance,
    NegativeEscrow,
    /// Stake escrow differs from the stakes of the wagers it backs
    EscrowBacking,
    WagerStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    /// Wallet id or escrow account id
    pub subject: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub expected: Decimal,
    pub actual: Decimal,
    pub difference: Decimal,
    pub severity: Severity,
}

impl Discrepancy {
    fn new(kind: DiscrepancyKind, subject: &str, expected: Decimal, actual: Decimal) -> Self {
        let difference = actual.saturating_sub(expected);
        Self {
            kind,
            subject: subject.to_string(),
            user_id: None,
            expected,
            actual,
            difference,
            severity: Severity::from_magnitude(difference),
        }
    }

    fn for_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossCheckStatus {
    Consistent,
    /// Live traffic kept moving the snapshot; the check was not attempted
    SkippedUnstable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub wallets_checked: usize,
    pub escrow_accounts_checked: usize,
    pub wagers_checked: usize,
    /// Rows that could not be locked within the timeout
    pub rows_skipped: usize,
    pub cross_check: CrossCheckStatus,
    pub discrepancies: Vec<Discrepancy>,
    /// SHA-256 over the serialized discrepancy list
    pub fingerprint: String,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.discrepancies.iter().map(|d| d.severity).max()
    }

    /// Audit signal for operators; never raised into a request path
    pub fn as_error(&self) -> Option<LedgerError> {
        self.worst_severity().map(LedgerError::ReconciliationDiscrepancy)
    }
}

fn fingerprint(run_id: &str, discrepancies: &[Discrepancy]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(serde_json::to_vec(discrepancies).unwrap_or_default());
    hex::encode(hasher.finalize())
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    config: AuditConfig,
    last_report: Arc<RwLock<Option<ReconciliationReport>>>,
}

impl Reconciler {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, config: AuditConfig) -> Self {
        Self {
            store,
            clock,
            config,
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    pub fn last_report(&self) -> Option<ReconciliationReport> {
        self.last_report.read().clone()
    }

    pub fn reconcile(&self) -> ReconciliationReport {
        let started_at = self.clock.now();
        let run_id = format!("recon_{}", Uuid::new_v4().simple());
        let epsilon = self.config.epsilon;
        let mut discrepancies = Vec::new();
        let mut rows_skipped = 0;

        // ===== WALLETS =====
        let wallet_cells = self.store.wallet_cells();
        let mut wallets_checked = 0;
        let mut wagers_checked = 0;
        for (wallet_id, cell) in &wallet_cells {
            let Ok(row) = self.store.lock_wallet(cell, wallet_id) else {
                warn!(wallet = %wallet_id, "⏳ wallet busy, skipped this run");
                rows_skipped += 1;
                continue;
            };
            wallets_checked += 1;
            wagers_checked += row.wagers.len();
            let user = row.wallet.user_id.as_str();

            let expected = row.journal.iter().map(Transaction::applied_effect).fold(Decimal::ZERO, Decimal::saturating_add);
            if row.wallet.balance.saturating_sub(expected).abs() > epsilon {
                discrepancies.push(
                    Discrepancy::new(DiscrepancyKind::WalletBalance, wallet_id, expected, row.wallet.balance).for_user(user),
                );
            }

            let held = row.journal.iter().map(Transaction::held_amount).fold(Decimal::ZERO, Decimal::saturating_add);
            if row.wallet.pending_balance.saturating_sub(held).abs() > epsilon {
                discrepancies.push(
                    Discrepancy::new(DiscrepancyKind::PendingHold, wallet_id, held, row.wallet.pending_balance).for_user(user),
                );
            }

            let derived = WagerStats::derive(row.wagers.values(), &row.disputes);
            if !row.stats.matches(&derived) {
                discrepancies.push(
                    Discrepancy::new(
                        DiscrepancyKind::WagerStats,
                        wallet_id,
                        derived.total_wagered,
                        row.stats.total_wagered,
                    )
                    .for_user(user),
                );
            }
        }

        // ===== ESCROW =====
        let mut escrow_accounts_checked = 0;
        for (account_id, cell) in self.store.escrow_cells() {
            let Ok(record) = self.store.lock_escrow(&cell, &account_id) else {
                warn!(account = %account_id, "⏳ escrow account busy, skipped this run");
                rows_skipped += 1;
                continue;
            };
            escrow_accounts_checked += 1;

            let expected = record.journal_balance();
            if record.account.balance.saturating_sub(expected).abs() > epsilon {
                discrepancies.push(Discrepancy::new(
                    DiscrepancyKind::EscrowBalance,
                    &account_id,
                    expected,
                    record.account.balance,
                ));
            }
            if record.account.balance < Decimal::ZERO {
                discrepancies.push(Discrepancy::new(
                    DiscrepancyKind::NegativeEscrow,
                    &account_id,
                    Decimal::ZERO,
                    record.account.balance,
                ));
            }
        }

        // ===== BACKING CROSS-CHECK =====
        let cross_check = match self.backing_snapshot() {
            Some((balances, stakes)) => {
                let accounts: std::collections::BTreeSet<&String> = balances.keys().chain(stakes.keys()).collect();
                for account_id in accounts {
                    let balance = balances.get(account_id).copied().unwrap_or(Decimal::ZERO);
                    let backed = stakes.get(account_id).copied().unwrap_or(Decimal::ZERO);
                    if balance.saturating_sub(backed).abs() > epsilon {
                        discrepancies.push(Discrepancy::new(DiscrepancyKind::EscrowBacking, account_id, backed, balance));
                    }
                }
                CrossCheckStatus::Consistent
            }
            None => {
                warn!(attempts = self.config.max_snapshot_attempts, "🌊 ledger kept moving; escrow backing check skipped");
                CrossCheckStatus::SkippedUnstable
            }
        };

        for d in &discrepancies {
            match d.severity {
                Severity::Low | Severity::Medium => warn!(
                    kind = ?d.kind,
                    subject = %d.subject,
                    expected = %d.expected,
                    actual = %d.actual,
                    severity = %d.severity,
                    "⚠️ reconciliation discrepancy"
                ),
                Severity::High | Severity::Critical => error!(
                    kind = ?d.kind,
                    subject = %d.subject,
                    expected = %d.expected,
                    actual = %d.actual,
                    severity = %d.severity,
                    "🚨 reconciliation discrepancy"
                ),
            }
        }

        let report = ReconciliationReport {
            fingerprint: fingerprint(&run_id, &discrepancies),
            run_id,
            started_at,
            finished_at: self.clock.now(),
            wallets_checked,
            escrow_accounts_checked,
            wagers_checked,
            rows_skipped,
            cross_check,
            discrepancies,
        };

        info!(
            run = %report.run_id,
            wallets = report.wallets_checked,
            escrow_accounts = report.escrow_accounts_checked,
            discrepancies = report.discrepancies.len(),
            cross_check = ?report.cross_check,
            "🔍 reconciliation finished"
        );
        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Stake escrow balances and the wager stakes backing them, read while no
    /// commit landed. `None` if every attempt raced a commit.
    fn backing_snapshot(&self) -> Option<(BTreeMap<String, Decimal>, BTreeMap<String, Decimal>)> {
        for _ in 0..self.config.max_snapshot_attempts.max(1) {
            let before = self.store.commit_seq();

            let mut balances = BTreeMap::new();
            let mut complete = true;
            for (account_id, cell) in self.store.escrow_cells() {
                if EscrowKind::of(&account_id) != EscrowKind::WagerStakes {
                    continue;
                }
                match self.store.lock_escrow(&cell, &account_id) {
                    Ok(record) => {
                        balances.insert(account_id, record.account.balance);
                    }
                    Err(_) => complete = false,
                }
            }

            let mut stakes: BTreeMap<String, Decimal> = BTreeMap::new();
            for (wallet_id, cell) in self.store.wallet_cells() {
                match self.store.lock_wallet(&cell, &wallet_id) {
                    Ok(row) => {
                        for wager in row.escrowed_wagers() {
                            if wager.escrow_account.starts_with(WAGER_STAKES_PREFIX) {
                                let backed = stakes.entry(wager.escrow_account.clone()).or_insert(Decimal::ZERO);
                                *backed = backed.saturating_add(wager.amount);
                            }
                        }
                    }
                    Err(_) => complete = false,
                }
            }

            if complete && self.store.commit_seq() == before {
                return Some((balances, stakes));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::compliance::ComplianceGate;
    use crate::config::RiskConfig;
    use crate::ledger::{LedgerCore, TxMetadata, TxStatus, TxType};
    use crate::wagers::{CreateWager, WagerManager};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn setup() -> (LedgerCore, WagerManager, Reconciler) {
        let store = Arc::new(Store::new(Duration::from_millis(200)));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = LedgerCore::new(store.clone(), clock.clone());
        let wagers = WagerManager::new(ledger.clone(), Arc::new(ComplianceGate::new(RiskConfig::default())));
        let reconciler = Reconciler::new(store, clock, AuditConfig::default());
        (ledger, wagers, reconciler)
    }

    fn busy_ledger(ledger: &LedgerCore, wagers: &WagerManager) -> String {
        let wallet = ledger.get_or_create_wallet("alice").unwrap();
        ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(500), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();
        ledger
            .record_transaction(&wallet.id, TxType::Withdrawal, dec!(50), TxStatus::Pending, TxMetadata::default(), None)
            .unwrap();
        for game in ["g1", "g2"] {
            wagers
                .create_wager(CreateWager {
                    user_id: "alice".into(),
                    game_id: game.into(),
                    amount: dec!(40),
                    potential_win: dec!(80),
                    gameplay: false,
                    metadata: Default::default(),
                })
                .unwrap();
        }
        wallet.id
    }

    #[test]
    fn test_clean_ledger_reconciles() {
        let (ledger, wagers, reconciler) = setup();
        busy_ledger(&ledger, &wagers);

        let report = reconciler.reconcile();
        assert!(report.is_clean(), "{:?}", report.discrepancies);
        assert_eq!(report.cross_check, CrossCheckStatus::Consistent);
        assert_eq!(report.wallets_checked, 1);
        assert_eq!(report.wagers_checked, 2);
        assert_eq!(report.fingerprint.len(), 64);
        assert!(reconciler.last_report().is_some());
    }

    #[test]
    fn test_corrupted_wallet_flagged_low() {
        let (ledger, wagers, reconciler) = setup();
        let wallet_id = busy_ledger(&ledger, &wagers);

        // Corrupt the stored balance behind the ledger's back
        let cell = ledger.store().wallet_cell(&wallet_id).unwrap();
        cell.lock().wallet.balance += dec!(5.00);

        let report = reconciler.reconcile();
        assert_eq!(report.discrepancies.len(), 1);
        let finding = &report.discrepancies[0];
        assert_eq!(finding.kind, DiscrepancyKind::WalletBalance);
        assert_eq!(finding.subject, wallet_id);
        assert_eq!(finding.severity, Severity::Low);
        assert_eq!(finding.difference, dec!(5.00));
        assert_eq!(report.as_error(), Some(LedgerError::ReconciliationDiscrepancy(Severity::Low)));
    }

    #[test]
    fn test_escrow_drift_detected() {
        let (ledger, wagers, reconciler) = setup();
        busy_ledger(&ledger, &wagers);

        let cell = ledger.store().escrow_cell("wager_stakes:g1");
        cell.lock().account.balance += dec!(2500);

        let report = reconciler.reconcile();
        let kinds: Vec<DiscrepancyKind> = report.discrepancies.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiscrepancyKind::EscrowBalance, DiscrepancyKind::EscrowBacking]);
        assert!(report.discrepancies.iter().all(|d| d.severity == Severity::High));
    }

    #[test]
    fn test_sub_epsilon_ignored() {
        let (ledger, wagers, reconciler) = setup();
        let wallet_id = busy_ledger(&ledger, &wagers);
        let cell = ledger.store().wallet_cell(&wallet_id).unwrap();
        cell.lock().wallet.balance += dec!(0.005);
        assert!(reconciler.reconcile().is_clean());
    }
}
