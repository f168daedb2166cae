//! Scoped atomic unit.
//!
//! An `AtomicUnit` holds the row lock of one wallet and, optionally, one escrow
//! account. Every mutation is staged against working copies; nothing touches
//! the rows until `commit()`. Dropping a unit without committing discards all
//! staged work, so an error anywhere between `begin` and `commit` leaves the
//! wallet, escrow and wagers exactly as they were.
//!
//! Raising a risk flag takes the flag queue lock on first use and keeps it
//! until the unit ends, so flags land in the same commit as the money.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::MutexGuard;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::compliance::{ComplianceState, RiskFlag};
use crate::error::{checked_sum, ensure_positive, LedgerError, LedgerResult};
use crate::escrow::{plan_movement, EscrowAccount, EscrowEntryType, EscrowRecord, EscrowReference, EscrowTransaction};
use crate::ledger::types::{Transaction, TxMetadata, TxStatus, TxType, Wallet};
use crate::store::{EscrowCell, Store, WalletCell, WalletRecord};
use crate::wagers::{Dispute, Wager, WagerStats};

pub struct AtomicUnit<'a> {
    store: &'a Store,
    now: DateTime<Utc>,
    row: MutexGuard<'a, WalletRecord>,
    escrow_row: Option<MutexGuard<'a, EscrowRecord>>,
    flag_queue: Option<MutexGuard<'a, Vec<RiskFlag>>>,

    // ===== STAGED STATE =====
    wallet: Wallet,
    new_transactions: Vec<Transaction>,
    /// Status changes to transactions already in the journal
    settled: BTreeMap<String, (TxStatus, DateTime<Utc>)>,
    wagers: BTreeMap<String, Wager>,
    disputes: BTreeMap<String, Dispute>,
    stats: Option<WagerStats>,
    compliance: Option<ComplianceState>,
    escrow_account: Option<EscrowAccount>,
    escrow_entries: Vec<EscrowTransaction>,
    flags: Vec<RiskFlag>,
}

impl<'a> AtomicUnit<'a> {
    /// Lock the wallet row, then the escrow row if one is named
    pub fn begin(
        store: &'a Store,
        wallet_id: &str,
        wallet_cell: &'a WalletCell,
        escrow: Option<(&str, &'a EscrowCell)>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let row = store.lock_wallet(wallet_cell, wallet_id)?;
        let escrow_row = match escrow {
            Some((account_id, cell)) => Some(store.lock_escrow(cell, account_id)?),
            None => None,
        };
        let wallet = row.wallet.clone();
        let escrow_account = escrow_row.as_ref().map(|r| r.account.clone());

        Ok(Self {
            store,
            now,
            row,
            escrow_row,
            flag_queue: None,
            wallet,
            new_transactions: Vec::new(),
            settled: BTreeMap::new(),
            wagers: BTreeMap::new(),
            disputes: BTreeMap::new(),
            stats: None,
            compliance: None,
            escrow_account,
            escrow_entries: Vec::new(),
            flags: Vec::new(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// Committed state of the row, as of `begin`
    pub fn record(&self) -> &WalletRecord {
        &self.row
    }

    /// Wallet including staged changes
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    // ========================================================================
    // JOURNAL
    // ========================================================================

    /// Insert a journal entry. A `completed` entry applies its balance effect
    /// here; a `pending` debit places a hold.
    pub fn post(
        &mut self,
        tx_type: TxType,
        amount: Decimal,
        status: TxStatus,
        metadata: TxMetadata,
        external_ref: Option<String>,
    ) -> LedgerResult<Transaction> {
        ensure_positive(amount)?;

        let mut tx = Transaction::new(&self.wallet.id, tx_type, amount, status, metadata, self.now);
        tx.external_ref = external_ref;

        match status {
            TxStatus::Completed => {
                self.ensure_funds(tx_type, amount)?;
                self.wallet.apply_completion(&tx)?;
            }
            TxStatus::Pending => {
                self.ensure_funds(tx_type, amount)?;
                // A pending credit must still fit once the rail completes it
                checked_sum(self.wallet.balance, tx_type.balance_effect(amount))?;
                self.wallet.pending_balance = checked_sum(self.wallet.pending_balance, tx.held_amount())?;
            }
            TxStatus::Failed | TxStatus::Cancelled => {}
        }

        debug!(wallet = %self.wallet.id, tx = %tx.id, ?tx_type, %amount, ?status, "staged journal entry");
        self.new_transactions.push(tx.clone());
        Ok(tx)
    }

    /// Move a pending transaction to a terminal status. `completed` applies the
    /// balance effect; `failed`/`cancelled` only release a hold.
    ///
    /// Completing a held debit never re-checks funds: the hold was the check,
    /// and a chargeback may have pulled the balance under it since.
    pub fn settle(&mut self, tx_id: &str, new_status: TxStatus) -> LedgerResult<Transaction> {
        let mut tx = self
            .transaction(tx_id)
            .ok_or_else(|| LedgerError::TransactionNotFound(tx_id.to_string()))?;

        if tx.status.is_terminal() {
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} is already {}",
                tx_id,
                tx.status.as_str()
            )));
        }
        if new_status == TxStatus::Pending {
            return Err(LedgerError::InvalidStateTransition(format!(
                "transaction {} is already pending",
                tx_id
            )));
        }

        let held = tx.held_amount();
        self.wallet.pending_balance -= held;
        tx.status = new_status;
        tx.processed_at = Some(self.now);

        if new_status == TxStatus::Completed {
            if held == Decimal::ZERO {
                self.ensure_funds(tx.tx_type, tx.amount)?;
            }
            self.wallet.apply_completion(&tx)?;
        }

        if let Some(staged) = self.new_transactions.iter_mut().find(|t| t.id == tx_id) {
            *staged = tx.clone();
        } else {
            self.settled.insert(tx_id.to_string(), (new_status, self.now));
        }
        Ok(tx)
    }

    /// Transaction as it would read after commit
    pub fn transaction(&self, tx_id: &str) -> Option<Transaction> {
        if let Some(tx) = self.new_transactions.iter().find(|t| t.id == tx_id) {
            return Some(tx.clone());
        }
        let mut tx = self.row.transaction(tx_id)?.clone();
        if let Some((status, at)) = self.settled.get(tx_id) {
            tx.status = *status;
            tx.processed_at = Some(*at);
        }
        Some(tx)
    }

    /// Committed journal followed by staged entries
    pub fn journal(&self) -> impl Iterator<Item = &Transaction> {
        self.row.journal.iter().chain(self.new_transactions.iter())
    }

    fn ensure_funds(&self, tx_type: TxType, amount: Decimal) -> LedgerResult<()> {
        if tx_type.requires_funds() && self.wallet.available() < amount {
            return Err(LedgerError::InsufficientBalance {
                available: self.wallet.available(),
                requested: amount,
            });
        }
        Ok(())
    }

    // ========================================================================
    // ESCROW
    // ========================================================================

    pub fn escrow_account(&self) -> Option<&EscrowAccount> {
        self.escrow_account.as_ref()
    }

    pub fn escrow_credit(&mut self, amount: Decimal, reference: Option<EscrowReference>) -> LedgerResult<EscrowTransaction> {
        self.escrow_move(EscrowEntryType::Deposit, amount, reference)
    }

    /// Fails with `EscrowUnderflow` instead of clamping
    pub fn escrow_debit(&mut self, amount: Decimal, reference: Option<EscrowReference>) -> LedgerResult<EscrowTransaction> {
        self.escrow_move(EscrowEntryType::Withdrawal, amount, reference)
    }

    fn escrow_move(
        &mut self,
        entry_type: EscrowEntryType,
        amount: Decimal,
        reference: Option<EscrowReference>,
    ) -> LedgerResult<EscrowTransaction> {
        let account = self
            .escrow_account
            .as_mut()
            .ok_or_else(|| LedgerError::Storage("atomic unit has no escrow account".to_string()))?;
        let entry = plan_movement(account, entry_type, amount, reference, self.now)?;
        account.balance = checked_sum(account.balance, entry.delta())?;
        account.updated_at = self.now;
        self.escrow_entries.push(entry.clone());
        Ok(entry)
    }

    /// Open stakes on the locked game account
    pub fn game_exposure(&self) -> Decimal {
        self.escrow_account.as_ref().map_or(Decimal::ZERO, |a| a.open_stakes)
    }

    pub fn reserve_exposure(&mut self, amount: Decimal) -> LedgerResult<()> {
        let account = self
            .escrow_account
            .as_mut()
            .ok_or_else(|| LedgerError::Storage("atomic unit has no escrow account".to_string()))?;
        account.open_stakes = checked_sum(account.open_stakes, amount)?;
        Ok(())
    }

    pub fn release_exposure(&mut self, amount: Decimal) {
        if let Some(account) = self.escrow_account.as_mut() {
            account.open_stakes = (account.open_stakes - amount).max(Decimal::ZERO);
        }
    }

    // ========================================================================
    // RISK FLAGS
    // ========================================================================

    /// Queue a flag for review; it is published only if the unit commits
    pub fn raise_flag(&mut self, flag: RiskFlag) -> LedgerResult<()> {
        if self.flag_queue.is_none() {
            self.flag_queue = Some(self.store.lock_flags()?);
        }
        self.flags.push(flag);
        Ok(())
    }

    // ========================================================================
    // WAGERS, DISPUTES, STATS, COMPLIANCE
    // ========================================================================

    pub fn wager(&self, wager_id: &str) -> Option<Wager> {
        self.wagers
            .get(wager_id)
            .or_else(|| self.row.wagers.get(wager_id))
            .cloned()
    }

    pub fn put_wager(&mut self, wager: Wager) {
        self.wagers.insert(wager.id.clone(), wager);
    }

    pub fn dispute(&self, dispute_id: &str) -> Option<Dispute> {
        self.disputes
            .get(dispute_id)
            .or_else(|| self.row.disputes.get(dispute_id))
            .cloned()
    }

    /// Open dispute on a wager, if any
    pub fn open_dispute_for(&self, wager_id: &str) -> Option<Dispute> {
        self.disputes
            .values()
            .chain(self.row.disputes.values().filter(|d| !self.disputes.contains_key(&d.id)))
            .find(|d| d.wager_id == wager_id && d.resolved_at.is_none())
            .cloned()
    }

    pub fn put_dispute(&mut self, dispute: Dispute) {
        self.disputes.insert(dispute.id.clone(), dispute);
    }

    pub fn stats_mut(&mut self) -> &mut WagerStats {
        let row = &self.row;
        self.stats.get_or_insert_with(|| row.stats.clone())
    }

    pub fn compliance(&self) -> &ComplianceState {
        self.compliance.as_ref().unwrap_or(&self.row.compliance)
    }

    pub fn compliance_mut(&mut self) -> &mut ComplianceState {
        let row = &self.row;
        self.compliance.get_or_insert_with(|| row.compliance.clone())
    }

    // ========================================================================
    // COMMIT
    // ========================================================================

    /// Write every staged change back to the rows. Infallible by construction:
    /// all validation happened while staging.
    pub fn commit(mut self) -> u64 {
        let wallet_id = self.wallet.id.clone();
        let row = &mut *self.row;

        let touched = !self.new_transactions.is_empty()
            || !self.settled.is_empty()
            || !self.wagers.is_empty()
            || !self.disputes.is_empty()
            || self.stats.is_some()
            || self.compliance.is_some();

        let mut wallet = std::mem::replace(&mut self.wallet, row.wallet.clone());
        if touched {
            wallet.version += 1;
            wallet.updated_at = self.now;
        }
        row.wallet = wallet;

        for (tx_id, (status, at)) in std::mem::take(&mut self.settled) {
            if let Some(tx) = row.journal.iter_mut().rev().find(|t| t.id == tx_id) {
                tx.status = status;
                tx.processed_at = Some(at);
            }
        }
        for tx in std::mem::take(&mut self.new_transactions) {
            self.store.index_transaction(&tx.id, &wallet_id);
            row.journal.push(tx);
        }
        for (id, wager) in std::mem::take(&mut self.wagers) {
            self.store.index_wager(&id, &wallet_id);
            row.wagers.insert(id, wager);
        }
        for (id, dispute) in std::mem::take(&mut self.disputes) {
            self.store.index_dispute(&id, &wallet_id);
            row.disputes.insert(id, dispute);
        }
        if let Some(stats) = self.stats.take() {
            row.stats = stats;
        }
        if let Some(compliance) = self.compliance.take() {
            row.compliance = compliance;
        }

        if let (Some(escrow_row), Some(account)) = (self.escrow_row.as_mut(), self.escrow_account.take()) {
            escrow_row.account = account;
            escrow_row.entries.append(&mut self.escrow_entries);
        }

        if let Some(queue) = self.flag_queue.as_mut() {
            for flag in std::mem::take(&mut self.flags) {
                warn!(
                    user = %flag.user_id,
                    kind = ?flag.kind,
                    severity = %flag.severity,
                    reason = %flag.reason,
                    "🚩 risk flag raised"
                );
                queue.push(flag);
            }
        }

        self.store.bump_commit()
    }
}
