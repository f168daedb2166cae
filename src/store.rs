//! Shared storage handle.
//!
//! Each wallet is a row guarded by its own mutex; the row holds the wallet, its
//! journal, the owner's wagers, disputes, stats and compliance state, so every
//! money-moving operation for one user serializes on exactly one lock. Escrow
//! accounts are separate rows. There is no global lock: the maps below are only
//! held long enough to clone an `Arc` out of them.
//!
//! Lock order is always wallet → escrow → flags.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::compliance::{ComplianceState, RiskFlag};
use crate::error::{LedgerError, LedgerResult};
use crate::escrow::EscrowRecord;
use crate::ledger::{Transaction, Wallet};
use crate::wagers::{Dispute, Wager, WagerStats, WagerStatus};

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    pub wallet: Wallet,
    /// Append-only, in insertion order
    pub journal: Vec<Transaction>,
    pub wagers: BTreeMap<String, Wager>,
    pub disputes: BTreeMap<String, Dispute>,
    pub stats: WagerStats,
    pub compliance: ComplianceState,
}

impl WalletRecord {
    pub fn new(wallet: Wallet) -> Self {
        Self {
            wallet,
            journal: Vec::new(),
            wagers: BTreeMap::new(),
            disputes: BTreeMap::new(),
            stats: WagerStats::default(),
            compliance: ComplianceState::default(),
        }
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.journal.iter().rev().find(|tx| tx.id == id)
    }

    /// Stakes whose money is still sitting in escrow
    pub fn escrowed_wagers(&self) -> impl Iterator<Item = &Wager> {
        self.wagers.values().filter(move |w| match w.status {
            WagerStatus::Active => true,
            WagerStatus::Disputed => self
                .disputes
                .values()
                .any(|d| d.wager_id == w.id && d.stake_in_escrow && d.resolved_at.is_none()),
            _ => false,
        })
    }
}

pub type WalletCell = Arc<Mutex<WalletRecord>>;
pub type EscrowCell = Arc<Mutex<EscrowRecord>>;

// ============================================================================
// SNAPSHOT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub taken_at: DateTime<Utc>,
    pub commit_seq: u64,
    pub wallets: Vec<WalletRecord>,
    pub escrow: Vec<EscrowRecord>,
    pub flags: Vec<RiskFlag>,
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug)]
pub struct Store {
    wallets: RwLock<HashMap<String, WalletCell>>,
    /// user id -> wallet id
    users: RwLock<HashMap<String, String>>,
    /// transaction / wager / dispute id -> wallet id
    tx_index: RwLock<HashMap<String, String>>,
    wager_index: RwLock<HashMap<String, String>>,
    dispute_index: RwLock<HashMap<String, String>>,
    escrow: RwLock<HashMap<String, EscrowCell>>,
    flags: Mutex<Vec<RiskFlag>>,
    commit_seq: AtomicU64,
    lock_timeout: Duration,
}

impl Store {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            wallets: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            tx_index: RwLock::new(HashMap::new()),
            wager_index: RwLock::new(HashMap::new()),
            dispute_index: RwLock::new(HashMap::new()),
            escrow: RwLock::new(HashMap::new()),
            flags: Mutex::new(Vec::new()),
            commit_seq: AtomicU64::new(0),
            lock_timeout,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    // ========================================================================
    // WALLET ROWS
    // ========================================================================

    pub fn wallet_id_for_user(&self, user_id: &str) -> Option<String> {
        self.users.read().get(user_id).cloned()
    }

    /// Returns the user's wallet id, creating the row on first access
    pub fn ensure_wallet(&self, user_id: &str, now: DateTime<Utc>) -> (String, bool) {
        if let Some(id) = self.wallet_id_for_user(user_id) {
            return (id, false);
        }
        let mut users = self.users.write();
        // Another caller may have won the race between the read and write lock
        if let Some(id) = users.get(user_id) {
            return (id.clone(), false);
        }
        let wallet = Wallet::new(user_id, now);
        let wallet_id = wallet.id.clone();
        self.wallets
            .write()
            .insert(wallet_id.clone(), Arc::new(Mutex::new(WalletRecord::new(wallet))));
        users.insert(user_id.to_string(), wallet_id.clone());
        (wallet_id, true)
    }

    pub fn wallet_cell(&self, wallet_id: &str) -> LedgerResult<WalletCell> {
        self.wallets
            .read()
            .get(wallet_id)
            .cloned()
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.to_string()))
    }

    pub fn lock_wallet<'a>(&self, cell: &'a WalletCell, wallet_id: &str) -> LedgerResult<MutexGuard<'a, WalletRecord>> {
        cell.try_lock_for(self.lock_timeout)
            .ok_or_else(|| LedgerError::LockTimeout(wallet_id.to_string()))
    }

    /// All wallet rows, for batch jobs
    pub fn wallet_cells(&self) -> Vec<(String, WalletCell)> {
        let mut cells: Vec<(String, WalletCell)> = self
            .wallets
            .read()
            .iter()
            .map(|(id, cell)| (id.clone(), cell.clone()))
            .collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        cells
    }

    // ========================================================================
    // ESCROW ROWS
    // ========================================================================

    /// Escrow row, created at zero on first use
    pub fn escrow_cell(&self, account_id: &str) -> EscrowCell {
        if let Some(cell) = self.escrow.read().get(account_id) {
            return cell.clone();
        }
        self.escrow
            .write()
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EscrowRecord::new(account_id, Utc::now()))))
            .clone()
    }

    pub fn existing_escrow_cell(&self, account_id: &str) -> Option<EscrowCell> {
        self.escrow.read().get(account_id).cloned()
    }

    pub fn lock_escrow<'a>(&self, cell: &'a EscrowCell, account_id: &str) -> LedgerResult<MutexGuard<'a, EscrowRecord>> {
        cell.try_lock_for(self.lock_timeout)
            .ok_or_else(|| LedgerError::LockTimeout(account_id.to_string()))
    }

    pub fn escrow_cells(&self) -> Vec<(String, EscrowCell)> {
        let mut cells: Vec<(String, EscrowCell)> = self
            .escrow
            .read()
            .iter()
            .map(|(id, cell)| (id.clone(), cell.clone()))
            .collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        cells
    }

    // ========================================================================
    // FLAGS
    // ========================================================================

    pub fn lock_flags(&self) -> LedgerResult<MutexGuard<'_, Vec<RiskFlag>>> {
        self.flags
            .try_lock_for(self.lock_timeout)
            .ok_or_else(|| LedgerError::LockTimeout("risk flag queue".to_string()))
    }

    // ========================================================================
    // INDEXES
    // ========================================================================

    pub(crate) fn index_transaction(&self, tx_id: &str, wallet_id: &str) {
        self.tx_index.write().insert(tx_id.to_string(), wallet_id.to_string());
    }

    pub(crate) fn index_wager(&self, wager_id: &str, wallet_id: &str) {
        self.wager_index.write().insert(wager_id.to_string(), wallet_id.to_string());
    }

    pub(crate) fn index_dispute(&self, dispute_id: &str, wallet_id: &str) {
        self.dispute_index.write().insert(dispute_id.to_string(), wallet_id.to_string());
    }

    pub fn wallet_of_transaction(&self, tx_id: &str) -> LedgerResult<String> {
        self.tx_index
            .read()
            .get(tx_id)
            .cloned()
            .ok_or_else(|| LedgerError::TransactionNotFound(tx_id.to_string()))
    }

    pub fn wallet_of_wager(&self, wager_id: &str) -> LedgerResult<String> {
        self.wager_index
            .read()
            .get(wager_id)
            .cloned()
            .ok_or_else(|| LedgerError::WagerNotFound(wager_id.to_string()))
    }

    pub fn wallet_of_dispute(&self, dispute_id: &str) -> LedgerResult<String> {
        self.dispute_index
            .read()
            .get(dispute_id)
            .cloned()
            .ok_or_else(|| LedgerError::DisputeNotFound(dispute_id.to_string()))
    }

    // ========================================================================
    // COMMIT SEQUENCE
    // ========================================================================

    pub fn bump_commit(&self) -> u64 {
        self.commit_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn commit_seq(&self) -> u64 {
        self.commit_seq.load(Ordering::SeqCst)
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    /// Row-by-row copy of the store; each row is consistent on its own
    pub fn snapshot(&self, now: DateTime<Utc>) -> LedgerResult<StoreSnapshot> {
        let commit_seq = self.commit_seq();
        let mut wallets = Vec::new();
        for (id, cell) in self.wallet_cells() {
            wallets.push(self.lock_wallet(&cell, &id)?.clone());
        }
        let mut escrow = Vec::new();
        for (id, cell) in self.escrow_cells() {
            escrow.push(self.lock_escrow(&cell, &id)?.clone());
        }
        let flags = self.lock_flags()?.clone();
        Ok(StoreSnapshot { taken_at: now, commit_seq, wallets, escrow, flags })
    }

    /// Rebuild a store and its indexes from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot, lock_timeout: Duration) -> Self {
        let store = Store::new(lock_timeout);
        {
            let mut wallets = store.wallets.write();
            let mut users = store.users.write();
            let mut tx_index = store.tx_index.write();
            let mut wager_index = store.wager_index.write();
            let mut dispute_index = store.dispute_index.write();

            for record in snapshot.wallets {
                let wallet_id = record.wallet.id.clone();
                users.insert(record.wallet.user_id.clone(), wallet_id.clone());
                for tx in &record.journal {
                    tx_index.insert(tx.id.clone(), wallet_id.clone());
                }
                for wager in record.wagers.values() {
                    wager_index.insert(wager.id.clone(), wallet_id.clone());
                }
                for dispute in record.disputes.values() {
                    dispute_index.insert(dispute.id.clone(), wallet_id.clone());
                }
                wallets.insert(wallet_id, Arc::new(Mutex::new(record)));
            }
        }
        {
            let mut escrow = store.escrow.write();
            for record in snapshot.escrow {
                escrow.insert(record.account.id.clone(), Arc::new(Mutex::new(record)));
            }
        }
        *store.flags.lock() = snapshot.flags;
        store.commit_seq.store(snapshot.commit_seq, Ordering::SeqCst);
        store
    }
}
