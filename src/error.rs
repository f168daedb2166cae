//! Error taxonomy for the wagering ledger.
//!
//! Expected rejections (bad amounts, insufficient funds, compliance denials,
//! illegal state transitions) are ordinary values the caller is meant to handle.
//! Only `LockTimeout` and `Storage` are real failures of the engine itself.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

// ============================================================================
// SEVERITY
// ============================================================================

/// Severity shared by reconciliation discrepancies and risk flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Bucket an absolute monetary magnitude: `< 100 low < 1000 medium < 10000 high`, else critical
    pub fn from_magnitude(magnitude: Decimal) -> Self {
        let magnitude = magnitude.abs();
        if magnitude < Decimal::from(100) {
            Severity::Low
        } else if magnitude < Decimal::from(1_000) {
            Severity::Medium
        } else if magnitude < Decimal::from(10_000) {
            Severity::High
        } else {
            Severity::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// LEDGER ERROR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Escrow underflow on {account}: balance {balance}, requested {requested}")]
    EscrowUnderflow {
        account: String,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Compliance limit exceeded: {0}")]
    ComplianceLimitExceeded(String),

    #[error("User is self-excluded until {until}")]
    SelfExcluded { until: String },

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Exchange rate unavailable for {0}")]
    ExchangeRateUnavailable(String),

    #[error("Reconciliation discrepancy ({0})")]
    ReconciliationDiscrepancy(Severity),

    #[error("Chargeback pending manual review: {0}")]
    ChargebackPendingReview(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Wager not found: {0}")]
    WagerNotFound(String),

    #[error("Dispute not found: {0}")]
    DisputeNotFound(String),

    #[error("Timed out acquiring lock on {0}")]
    LockTimeout(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable machine-readable code for API bodies
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::InvalidAmount(_) => "invalid_amount",
            LedgerError::InvalidStateTransition(_) => "invalid_state_transition",
            LedgerError::EscrowUnderflow { .. } => "escrow_underflow",
            LedgerError::ComplianceLimitExceeded(_) => "compliance_limit_exceeded",
            LedgerError::SelfExcluded { .. } => "self_excluded",
            LedgerError::UnsupportedCurrency(_) => "unsupported_currency",
            LedgerError::ExchangeRateUnavailable(_) => "exchange_rate_unavailable",
            LedgerError::ReconciliationDiscrepancy(_) => "reconciliation_discrepancy",
            LedgerError::ChargebackPendingReview(_) => "chargeback_pending_review",
            LedgerError::WalletNotFound(_) => "wallet_not_found",
            LedgerError::TransactionNotFound(_) => "transaction_not_found",
            LedgerError::WagerNotFound(_) => "wager_not_found",
            LedgerError::DisputeNotFound(_) => "dispute_not_found",
            LedgerError::LockTimeout(_) => "lock_timeout",
            LedgerError::Storage(_) => "storage_error",
        }
    }

    /// Expected rejection (true) versus a failure of the engine itself (false)
    pub fn is_rejection(&self) -> bool {
        !matches!(self, LedgerError::LockTimeout(_) | LedgerError::Storage(_))
    }

    pub fn invalid_amount(amount: Decimal) -> Self {
        LedgerError::InvalidAmount(format!("amount must be positive, got {}", amount))
    }
}

/// Reject non-positive amounts
pub fn ensure_positive(amount: Decimal) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid_amount(amount));
    }
    Ok(())
}

/// `a + b`, or `InvalidAmount` when the result does not fit in a `Decimal`
pub fn checked_sum(a: Decimal, b: Decimal) -> LedgerResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{} + {} is out of range", a, b)))
}

/// `a × b`, or `InvalidAmount` on overflow
pub fn checked_product(a: Decimal, b: Decimal) -> LedgerResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{} × {} is out of range", a, b)))
}
