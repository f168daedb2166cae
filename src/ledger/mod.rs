//! Ledger Core
//!
//! Sole authority for wallet balances and the append-only transaction journal.
//! Every mutation goes through an [`AtomicUnit`] scoped to one wallet row, so a
//! balance check and the debit it guards can never interleave with another
//! writer on the same wallet.

pub mod types;
pub mod unit;

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::store::Store;

pub use types::{Transaction, TransactionFilter, TxMetadata, TxStatus, TxType, Wallet};
pub use unit::AtomicUnit;

#[derive(Clone)]
pub struct LedgerCore {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl LedgerCore {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // ATOMIC UNITS
    // ========================================================================

    /// Run `f` inside one atomic unit on `wallet_id` (and optionally one escrow
    /// account). `Ok` commits every staged change; `Err` discards all of them.
    pub fn atomically<T>(
        &self,
        wallet_id: &str,
        escrow_account: Option<&str>,
        f: impl FnOnce(&mut AtomicUnit<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let wallet_cell = self.store.wallet_cell(wallet_id)?;
        let escrow_cell = escrow_account.map(|id| (id, self.store.escrow_cell(id)));

        let mut unit = AtomicUnit::begin(
            &self.store,
            wallet_id,
            &wallet_cell,
            escrow_cell.as_ref().map(|(id, cell)| (*id, cell)),
            self.clock.now(),
        )?;
        let value = f(&mut unit)?;
        unit.commit();
        Ok(value)
    }

    // ========================================================================
    // WALLETS
    // ========================================================================

    /// Idempotent; the first call creates a zero-balance wallet
    pub fn get_or_create_wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        let (wallet_id, created) = self.store.ensure_wallet(user_id, self.clock.now());
        if created {
            info!(user = user_id, wallet = %wallet_id, "👛 wallet created");
        }
        self.get_wallet_by_id(&wallet_id)
    }

    pub fn get_wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        let wallet_id = self
            .store
            .wallet_id_for_user(user_id)
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;
        self.get_wallet_by_id(&wallet_id)
    }

    pub fn get_wallet_by_id(&self, wallet_id: &str) -> LedgerResult<Wallet> {
        let cell = self.store.wallet_cell(wallet_id)?;
        let row = self.store.lock_wallet(&cell, wallet_id)?;
        Ok(row.wallet.clone())
    }

    // ========================================================================
    // JOURNAL
    // ========================================================================

    /// Journal a money-moving event. A `completed` entry applies its balance
    /// effect in the same unit as the insert.
    pub fn record_transaction(
        &self,
        wallet_id: &str,
        tx_type: TxType,
        amount: Decimal,
        status: TxStatus,
        metadata: TxMetadata,
        external_ref: Option<String>,
    ) -> LedgerResult<Transaction> {
        let result = self.atomically(wallet_id, None, |unit| {
            unit.post(tx_type, amount, status, metadata, external_ref)
        });

        match &result {
            Ok(tx) => info!(
                wallet = wallet_id,
                tx = %tx.id,
                kind = tx_type.as_str(),
                %amount,
                status = status.as_str(),
                "📝 transaction recorded"
            ),
            Err(e) => warn!(wallet = wallet_id, kind = tx_type.as_str(), %amount, error = %e, "⛔ transaction rejected"),
        }
        result
    }

    /// Move a pending transaction to a terminal status. The balance effect is
    /// applied exactly once, on the first transition to `completed`.
    pub fn settle_transaction(&self, tx_id: &str, new_status: TxStatus) -> LedgerResult<Transaction> {
        let wallet_id = self.store.wallet_of_transaction(tx_id)?;
        let result = self.atomically(&wallet_id, None, |unit| unit.settle(tx_id, new_status));

        match &result {
            Ok(tx) => info!(
                wallet = %wallet_id,
                tx = tx_id,
                kind = tx.tx_type.as_str(),
                amount = %tx.amount,
                status = new_status.as_str(),
                "✅ transaction settled"
            ),
            Err(e) => warn!(tx = tx_id, status = new_status.as_str(), error = %e, "⛔ settlement rejected"),
        }
        result
    }

    pub fn get_transaction(&self, tx_id: &str) -> LedgerResult<Transaction> {
        let wallet_id = self.store.wallet_of_transaction(tx_id)?;
        let cell = self.store.wallet_cell(&wallet_id)?;
        let row = self.store.lock_wallet(&cell, &wallet_id)?;
        row.transaction(tx_id)
            .cloned()
            .ok_or_else(|| LedgerError::TransactionNotFound(tx_id.to_string()))
    }

    /// Newest first
    pub fn get_transaction_history(&self, filter: &TransactionFilter) -> LedgerResult<Vec<Transaction>> {
        let wallet_ids = match (&filter.wallet_id, &filter.user_id) {
            (Some(wallet_id), _) => vec![wallet_id.clone()],
            (None, Some(user_id)) => match self.store.wallet_id_for_user(user_id) {
                Some(wallet_id) => vec![wallet_id],
                None => return Ok(Vec::new()),
            },
            (None, None) => self.store.wallet_cells().into_iter().map(|(id, _)| id).collect(),
        };

        let mut history = Vec::new();
        for wallet_id in wallet_ids {
            let cell = self.store.wallet_cell(&wallet_id)?;
            let row = self.store.lock_wallet(&cell, &wallet_id)?;
            history.extend(row.journal.iter().rev().filter(|tx| filter.matches(tx)).cloned());
        }

        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            history.truncate(limit);
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn core() -> (LedgerCore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Store::new(Duration::from_millis(200)));
        (LedgerCore::new(store, clock.clone()), clock)
    }

    #[test]
    fn test_wallet_created_once() {
        let (ledger, _) = core();
        let first = ledger.get_or_create_wallet("alice").unwrap();
        let second = ledger.get_or_create_wallet("alice").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.balance, Decimal::ZERO);
        assert!(matches!(ledger.get_wallet("nobody"), Err(LedgerError::WalletNotFound(_))));
    }

    #[test]
    fn test_completed_deposit_applies_effect() {
        let (ledger, _) = core();
        let wallet = ledger.get_or_create_wallet("alice").unwrap();
        ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(100), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();

        let wallet = ledger.get_wallet("alice").unwrap();
        assert_eq!(wallet.balance, dec!(100));
        assert_eq!(wallet.lifetime_deposits, dec!(100));
        assert_eq!(wallet.version, 1);
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let (ledger, _) = core();
        let wallet = ledger.get_or_create_wallet("alice").unwrap();
        let err = ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(-5), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert!(ledger.get_transaction_history(&TransactionFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_pending_withdrawal_holds_funds() {
        let (ledger, _) = core();
        let wallet = ledger.get_or_create_wallet("bob").unwrap();
        ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(100), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();
        let hold = ledger
            .record_transaction(&wallet.id, TxType::Withdrawal, dec!(80), TxStatus::Pending, TxMetadata::default(), None)
            .unwrap();

        let wallet_now = ledger.get_wallet_by_id(&wallet.id).unwrap();
        assert_eq!(wallet_now.balance, dec!(100));
        assert_eq!(wallet_now.available(), dec!(20));

        // Second withdrawal cannot spend the held funds
        let err = ledger
            .record_transaction(&wallet.id, TxType::Withdrawal, dec!(30), TxStatus::Pending, TxMetadata::default(), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        ledger.settle_transaction(&hold.id, TxStatus::Failed).unwrap();
        let wallet_now = ledger.get_wallet_by_id(&wallet.id).unwrap();
        assert_eq!(wallet_now.balance, dec!(100));
        assert_eq!(wallet_now.pending_balance, Decimal::ZERO);
    }

    #[test]
    fn test_settle_completed_twice_applies_once() {
        let (ledger, _) = core();
        let wallet = ledger.get_or_create_wallet("carol").unwrap();
        let tx = ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(50), TxStatus::Pending, TxMetadata::default(), None)
            .unwrap();

        let settled = ledger.settle_transaction(&tx.id, TxStatus::Completed).unwrap();
        assert_eq!(settled.status, TxStatus::Completed);
        assert!(settled.processed_at.is_some());

        let again = ledger.settle_transaction(&tx.id, TxStatus::Completed);
        assert!(matches!(again, Err(LedgerError::InvalidStateTransition(_))));
        assert_eq!(ledger.get_wallet("carol").unwrap().balance, dec!(50));
    }

    #[test]
    fn test_history_newest_first_with_limit() {
        let (ledger, clock) = core();
        let wallet = ledger.get_or_create_wallet("dave").unwrap();
        for amount in [dec!(10), dec!(20), dec!(30)] {
            ledger
                .record_transaction(&wallet.id, TxType::Deposit, amount, TxStatus::Completed, TxMetadata::default(), None)
                .unwrap();
            clock.advance(ChronoDuration::seconds(1));
        }

        let filter = TransactionFilter { user_id: Some("dave".into()), limit: Some(2), ..Default::default() };
        let history = ledger.get_transaction_history(&filter).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].amount, dec!(30));
        assert_eq!(history[1].amount, dec!(20));
    }

    #[test]
    fn test_atomically_rolls_back_on_error() {
        let (ledger, _) = core();
        let wallet = ledger.get_or_create_wallet("erin").unwrap();
        let result: LedgerResult<()> = ledger.atomically(&wallet.id, Some("wager_stakes:g1"), |unit| {
            unit.post(TxType::Deposit, dec!(40), TxStatus::Completed, TxMetadata::default(), None)?;
            unit.escrow_credit(dec!(40), None)?;
            Err(LedgerError::Storage("injected".into()))
        });
        assert!(result.is_err());

        assert_eq!(ledger.get_wallet("erin").unwrap().balance, Decimal::ZERO);
        let cell = ledger.store().escrow_cell("wager_stakes:g1");
        assert_eq!(cell.lock().account.balance, Decimal::ZERO);
        assert!(ledger.get_transaction_history(&TransactionFilter::default()).unwrap().is_empty());
    }
}
