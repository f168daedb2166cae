// ============================================================================
// Ledger Types - Wallets and the transaction journal
// ============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{checked_sum, LedgerResult};
use crate::rates::Currency;

// ============================================================================
// TRANSACTION TYPE & STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Withdrawal,
    Wager,
    Winning,
    Refund,
    /// Reversal of a previously completed deposit
    Chargeback,
}

impl TxType {
    /// Signed balance effect of a completed transaction of this type
    pub fn balance_effect(&self, amount: Decimal) -> Decimal {
        match self {
            TxType::Deposit | TxType::Winning | TxType::Refund => amount,
            TxType::Withdrawal | TxType::Wager | TxType::Chargeback => -amount,
        }
    }

    /// Types that may not overdraw the wallet
    pub fn requires_funds(&self) -> bool {
        matches!(self, TxType::Wager | TxType::Withdrawal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
            TxType::Wager => "wager",
            TxType::Winning => "winning",
            TxType::Refund => "refund",
            TxType::Chargeback => "chargeback",
        }
    }
}

impl std::str::FromStr for TxType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deposit" => Ok(TxType::Deposit),
            "withdrawal" => Ok(TxType::Withdrawal),
            "wager" => Ok(TxType::Wager),
            "winning" => Ok(TxType::Winning),
            "refund" => Ok(TxType::Refund),
            "chargeback" => Ok(TxType::Chargeback),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
            TxStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TxStatus::Pending),
            "completed" => Ok(TxStatus::Completed),
            "failed" => Ok(TxStatus::Failed),
            "cancelled" => Ok(TxStatus::Cancelled),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

// ============================================================================
// METADATA
// ============================================================================

/// Links a journal entry to whatever caused it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wager_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweepstakes_entry_id: Option<String>,
    /// Deposit being reversed by a chargeback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverses_transaction_id: Option<String>,
    /// Currency and amount as requested before conversion to base
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl TxMetadata {
    pub fn for_wager(wager_id: &str) -> Self {
        Self { wager_id: Some(wager_id.to_string()), ..Default::default() }
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Append-only journal entry. Only `status` and `processed_at` ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub wallet_id: String,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub status: TxStatus,
    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub metadata: TxMetadata,
    pub created_at: DateTime<Utc>,
    /// Set when the status first becomes terminal
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        wallet_id: &str,
        tx_type: TxType,
        amount: Decimal,
        status: TxStatus,
        metadata: TxMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("tx_{}", Uuid::new_v4().simple()),
            wallet_id: wallet_id.to_string(),
            tx_type,
            amount,
            status,
            external_ref: None,
            metadata,
            created_at: now,
            processed_at: status.is_terminal().then_some(now),
        }
    }

    /// Contribution to the wallet balance right now
    pub fn applied_effect(&self) -> Decimal {
        if self.status == TxStatus::Completed {
            self.tx_type.balance_effect(self.amount)
        } else {
            Decimal::ZERO
        }
    }

    /// Amount reserved against the wallet while this transaction is pending
    pub fn held_amount(&self) -> Decimal {
        if self.status == TxStatus::Pending && self.tx_type.requires_funds() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }
}

// ============================================================================
// WALLET
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub balance: Decimal,
    /// Sum of pending debit holds (withdrawals and wagers awaiting completion)
    pub pending_balance: Decimal,
    pub lifetime_deposits: Decimal,
    pub lifetime_withdrawals: Decimal,
    pub lifetime_winnings: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed mutation
    pub version: u64,
}

impl Wallet {
    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("wallet_{}", Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            balance: Decimal::ZERO,
            pending_balance: Decimal::ZERO,
            lifetime_deposits: Decimal::ZERO,
            lifetime_withdrawals: Decimal::ZERO,
            lifetime_winnings: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Spendable amount: balance minus pending holds
    pub fn available(&self) -> Decimal {
        self.balance.saturating_sub(self.pending_balance)
    }

    /// Apply the completion of `tx`: balance effect plus lifetime counters.
    /// Leaves the wallet untouched if any figure would leave `Decimal` range.
    pub(crate) fn apply_completion(&mut self, tx: &Transaction) -> LedgerResult<()> {
        let balance = checked_sum(self.balance, tx.tx_type.balance_effect(tx.amount))?;
        let lifetime = match tx.tx_type {
            TxType::Deposit => Some(&mut self.lifetime_deposits),
            TxType::Withdrawal => Some(&mut self.lifetime_withdrawals),
            TxType::Winning => Some(&mut self.lifetime_winnings),
            _ => None,
        };
        if let Some(counter) = lifetime {
            *counter = checked_sum(*counter, tx.amount)?;
        }
        self.balance = balance;
        Ok(())
    }
}

// ============================================================================
// HISTORY FILTER
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionFilter {
    #[serde(default)]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tx_type: Option<TxType>,
    #[serde(default)]
    pub status: Option<TxStatus>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.tx_type.map_or(true, |t| tx.tx_type == t)
            && self.status.map_or(true, |s| tx.status == s)
            && self.created_after.map_or(true, |after| tx.created_at >= after)
            && self.created_before.map_or(true, |before| tx.created_at < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_effects() {
        assert_eq!(TxType::Deposit.balance_effect(dec!(10)), dec!(10));
        assert_eq!(TxType::Winning.balance_effect(dec!(10)), dec!(10));
        assert_eq!(TxType::Refund.balance_effect(dec!(10)), dec!(10));
        assert_eq!(TxType::Withdrawal.balance_effect(dec!(10)), dec!(-10));
        assert_eq!(TxType::Wager.balance_effect(dec!(10)), dec!(-10));
        assert_eq!(TxType::Chargeback.balance_effect(dec!(10)), dec!(-10));
    }

    #[test]
    fn test_pending_transaction_has_no_effect() {
        let tx = Transaction::new("wallet_1", TxType::Deposit, dec!(50), TxStatus::Pending, TxMetadata::default(), Utc::now());
        assert_eq!(tx.applied_effect(), Decimal::ZERO);
        assert!(tx.processed_at.is_none());

        let hold = Transaction::new("wallet_1", TxType::Withdrawal, dec!(20), TxStatus::Pending, TxMetadata::default(), Utc::now());
        assert_eq!(hold.held_amount(), dec!(20));
    }

    #[test]
    fn test_status_parsing_is_closed() {
        assert_eq!("Completed".parse::<TxStatus>(), Ok(TxStatus::Completed));
        assert!("settled".parse::<TxStatus>().is_err());
        assert!("bonus".parse::<TxType>().is_err());
    }

    #[test]
    fn test_wallet_completion_counters() {
        let now = Utc::now();
        let mut wallet = Wallet::new("alice", now);
        let deposit = Transaction::new(&wallet.id, TxType::Deposit, dec!(100), TxStatus::Completed, TxMetadata::default(), now);
        wallet.apply_completion(&deposit).unwrap();
        let win = Transaction::new(&wallet.id, TxType::Winning, dec!(40), TxStatus::Completed, TxMetadata::default(), now);
        wallet.apply_completion(&win).unwrap();
        assert_eq!(wallet.balance, dec!(140));
        assert_eq!(wallet.lifetime_deposits, dec!(100));
        assert_eq!(wallet.lifetime_winnings, dec!(40));
    }

    #[test]
    fn test_completion_out_of_range_leaves_wallet() {
        let now = Utc::now();
        let mut wallet = Wallet::new("alice", now);
        let max = Transaction::new(&wallet.id, TxType::Deposit, Decimal::MAX, TxStatus::Completed, TxMetadata::default(), now);
        wallet.apply_completion(&max).unwrap();

        let one = Transaction::new(&wallet.id, TxType::Deposit, dec!(1), TxStatus::Completed, TxMetadata::default(), now);
        assert!(matches!(wallet.apply_completion(&one), Err(crate::error::LedgerError::InvalidAmount(_))));
        assert_eq!(wallet.balance, Decimal::MAX);
        assert_eq!(wallet.lifetime_deposits, Decimal::MAX);
    }
}
