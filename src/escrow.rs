//! Escrow Subsystem
//!
//! Pooled, purpose-tagged balances that back open obligations (active wager
//! stakes, sweepstakes prize pools). Escrow is tracked apart from every wallet
//! so reconciliation can prove solvency independently of the journal.
//!
//! Accounts are partitioned by purpose:
//! - `wager_stakes:<game_id>` holds the stakes of active wagers on one game
//! - `prize_pool:<sweepstakes_id>` holds one sweepstakes' prize pool
//! - any other bare name (e.g. `prize_pool`) is a standalone account

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{checked_sum, ensure_positive, LedgerError, LedgerResult};
use crate::store::Store;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const WAGER_STAKES_PREFIX: &str = "wager_stakes:";
pub const PRIZE_POOL_PREFIX: &str = "prize_pool:";

pub fn wager_stakes_account(game_id: &str) -> String {
    format!("{}{}", WAGER_STAKES_PREFIX, game_id)
}

pub fn prize_pool_account(sweepstakes_id: &str) -> String {
    format!("{}{}", PRIZE_POOL_PREFIX, sweepstakes_id)
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowKind {
    WagerStakes,
    PrizePool,
    General,
}

impl EscrowKind {
    pub fn of(account_id: &str) -> Self {
        if account_id.starts_with(WAGER_STAKES_PREFIX) {
            EscrowKind::WagerStakes
        } else if account_id.starts_with(PRIZE_POOL_PREFIX) || account_id == "prize_pool" {
            EscrowKind::PrizePool
        } else {
            EscrowKind::General
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowAccount {
    pub id: String,
    pub kind: EscrowKind,
    pub balance: Decimal,
    /// Stakes of escrowed wagers on this game; caps per-game exposure
    #[serde(default)]
    pub open_stakes: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowEntryType {
    Deposit,
    Withdrawal,
}

/// What an escrow movement was for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EscrowReference {
    Wager(String),
    Sweepstakes(String),
    Manual(String),
}

/// Append-only escrow movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: String,
    pub account_id: String,
    pub entry_type: EscrowEntryType,
    pub amount: Decimal,
    #[serde(default)]
    pub reference: Option<EscrowReference>,
    pub created_at: DateTime<Utc>,
}

impl EscrowTransaction {
    pub fn delta(&self) -> Decimal {
        match self.entry_type {
            EscrowEntryType::Deposit => self.amount,
            EscrowEntryType::Withdrawal => -self.amount,
        }
    }
}

/// One escrow row: the account and its movements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub account: EscrowAccount,
    pub entries: Vec<EscrowTransaction>,
}

impl EscrowRecord {
    pub fn new(account_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            account: EscrowAccount {
                id: account_id.to_string(),
                kind: EscrowKind::of(account_id),
                balance: Decimal::ZERO,
                open_stakes: Decimal::ZERO,
                created_at: now,
                updated_at: now,
            },
            entries: Vec::new(),
        }
    }

    /// Sum of movement deltas; must equal the stored balance
    pub fn journal_balance(&self) -> Decimal {
        self.entries
            .iter()
            .map(EscrowTransaction::delta)
            .fold(Decimal::ZERO, Decimal::saturating_add)
    }
}

/// Validate and build an escrow movement against a balance without applying it
pub(crate) fn plan_movement(
    account: &EscrowAccount,
    entry_type: EscrowEntryType,
    amount: Decimal,
    reference: Option<EscrowReference>,
    now: DateTime<Utc>,
) -> LedgerResult<EscrowTransaction> {
    ensure_positive(amount)?;
    if entry_type == EscrowEntryType::Withdrawal && account.balance < amount {
        return Err(LedgerError::EscrowUnderflow {
            account: account.id.clone(),
            balance: account.balance,
            requested: amount,
        });
    }
    Ok(EscrowTransaction {
        id: format!("escrow_tx_{}", Uuid::new_v4().simple()),
        account_id: account.id.clone(),
        entry_type,
        amount,
        reference,
        created_at: now,
    })
}

// ============================================================================
// ESCROW SERVICE
// ============================================================================

/// Standalone escrow operations (sweepstakes pools, manual funding).
/// Wager stakes move through the wallet's `AtomicUnit` instead.
#[derive(Clone)]
pub struct EscrowService {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
}

impl EscrowService {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn add_to_escrow(
        &self,
        account_id: &str,
        amount: Decimal,
        reference: Option<EscrowReference>,
    ) -> LedgerResult<EscrowTransaction> {
        self.move_funds(account_id, EscrowEntryType::Deposit, amount, reference)
    }

    /// Fails with `EscrowUnderflow` rather than clamping at zero
    pub fn remove_from_escrow(
        &self,
        account_id: &str,
        amount: Decimal,
        reference: Option<EscrowReference>,
    ) -> LedgerResult<EscrowTransaction> {
        self.move_funds(account_id, EscrowEntryType::Withdrawal, amount, reference)
    }

    fn move_funds(
        &self,
        account_id: &str,
        entry_type: EscrowEntryType,
        amount: Decimal,
        reference: Option<EscrowReference>,
    ) -> LedgerResult<EscrowTransaction> {
        let cell = self.store.escrow_cell(account_id);
        let mut record = self.store.lock_escrow(&cell, account_id)?;
        let now = self.clock.now();

        let planned = plan_movement(&record.account, entry_type, amount, reference, now)
            .and_then(|entry| Ok((checked_sum(record.account.balance, entry.delta())?, entry)));
        let (balance, entry) = match planned {
            Ok(planned) => planned,
            Err(e) => {
                warn!(account = account_id, %amount, error = %e, "⛔ escrow movement rejected");
                return Err(e);
            }
        };

        record.account.balance = balance;
        record.account.updated_at = now;
        record.entries.push(entry.clone());
        self.store.bump_commit();

        info!(
            account = account_id,
            %amount,
            balance = %record.account.balance,
            "🏦 escrow {:?}",
            entry_type
        );
        Ok(entry)
    }

    /// Zero for accounts that were never funded
    pub fn get_escrow_balance(&self, account_id: &str) -> LedgerResult<Decimal> {
        match self.store.existing_escrow_cell(account_id) {
            Some(cell) => Ok(self.store.lock_escrow(&cell, account_id)?.account.balance),
            None => Ok(Decimal::ZERO),
        }
    }

    pub fn get_escrow_account(&self, account_id: &str) -> LedgerResult<Option<EscrowAccount>> {
        match self.store.existing_escrow_cell(account_id) {
            Some(cell) => Ok(Some(self.store.lock_escrow(&cell, account_id)?.account.clone())),
            None => Ok(None),
        }
    }

    pub fn get_escrow_history(&self, account_id: &str) -> LedgerResult<Vec<EscrowTransaction>> {
        match self.store.existing_escrow_cell(account_id) {
            Some(cell) => Ok(self.store.lock_escrow(&cell, account_id)?.entries.clone()),
            None => Ok(Vec::new()),
        }
    }

    pub fn list_accounts(&self) -> LedgerResult<Vec<EscrowAccount>> {
        let mut accounts = Vec::new();
        for (id, cell) in self.store.escrow_cells() {
            accounts.push(self.store.lock_escrow(&cell, &id)?.account.clone());
        }
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }
}
