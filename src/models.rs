// Request and response bodies for the wager ledger API

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::compliance::ComplianceKind;
use crate::escrow::EscrowReference;
use crate::ledger::{TxMetadata, TxStatus, TxType, Wallet};
use crate::rates::Currency;

// ===== WALLETS =====

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub success: bool,
    pub wallet: Wallet,
    /// Balance minus pending holds
    pub available: Decimal,
}

impl From<Wallet> for WalletResponse {
    fn from(wallet: Wallet) -> Self {
        Self {
            success: true,
            available: wallet.available(),
            wallet,
        }
    }
}

// ===== JOURNAL =====

#[derive(Debug, Deserialize)]
pub struct RecordTransactionRequest {
    pub wallet_id: String,
    pub tx_type: TxType,
    pub amount: Decimal,
    pub status: TxStatus,
    #[serde(default)]
    pub metadata: TxMetadata,
    #[serde(default)]
    pub external_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub status: TxStatus,
}

// ===== CASHIER =====

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub user_id: String,
    pub amount: Decimal,
    /// Defaults to the ledger's base currency
    #[serde(default)]
    pub currency: Option<Currency>,
    #[serde(default)]
    pub external_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub user_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub external_ref: Option<String>,
}

/// Callback from a payment rail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Pending deposit or withdrawal reached a final status
    Settled { transaction_id: String, status: TxStatus },
    /// Completed deposit reversed by the card network or bank
    Chargeback { transaction_id: String },
}

// ===== WAGERS =====

#[derive(Debug, Deserialize)]
pub struct CreateDisputeRequest {
    pub note: String,
}

// ===== COMPLIANCE =====

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub user_id: String,
    pub amount: Decimal,
    #[serde(flatten)]
    pub kind: ComplianceKind,
}

#[derive(Debug, Deserialize)]
pub struct UntilRequest {
    pub until: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct EligibilityRequest {
    pub eligible: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlagsQuery {
    #[serde(default)]
    pub open_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub operator: String,
}

// ===== ESCROW =====

#[derive(Debug, Deserialize)]
pub struct EscrowMovementRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub reference: Option<EscrowReference>,
}

// ===== ERRORS =====

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: String,
    pub error: String,
}
