// ============================================================================
// Wager Types - Wagers, per-user stats and disputes
// ============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// WAGER STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerStatus {
    Active,
    Won,
    Lost,
    Cancelled,
    /// Frozen pending manual review (player dispute or chargeback)
    Disputed,
    /// Dispute closed by an operator
    Resolved,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Active => "active",
            WagerStatus::Won => "won",
            WagerStatus::Lost => "lost",
            WagerStatus::Cancelled => "cancelled",
            WagerStatus::Disputed => "disputed",
            WagerStatus::Resolved => "resolved",
        }
    }

    /// Legal edges of the wager state machine
    pub fn can_transition_to(&self, next: WagerStatus) -> bool {
        use WagerStatus::*;
        matches!(
            (self, next),
            (Active, Won)
                | (Active, Lost)
                | (Active, Cancelled)
                | (Active, Disputed)
                | (Won, Disputed)
                | (Lost, Disputed)
                | (Disputed, Resolved)
        )
    }
}

/// How a wager finished
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WagerOutcome {
    Won { actual_win: Decimal },
    Lost,
}

// ============================================================================
// WAGER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub user_id: String,
    pub wallet_id: String,
    pub game_id: String,
    pub amount: Decimal,
    pub potential_win: Decimal,
    #[serde(default)]
    pub actual_win: Option<Decimal>,
    pub status: WagerStatus,
    /// Escrow account backing the stake
    pub escrow_account: String,
    /// Counts toward play-time limits
    #[serde(default)]
    pub gameplay: bool,
    /// Journal entry that debited the stake
    pub stake_transaction_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Wager {
    pub fn new_id() -> String {
        format!("wager_{}", Uuid::new_v4().simple())
    }
}

// ============================================================================
// WAGER STATS
// ============================================================================

/// Derived per-user counters, updated when a wager completes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WagerStats {
    pub total_wagers: u64,
    pub wagers_won: u64,
    pub wagers_lost: u64,
    pub total_wagered: Decimal,
    pub total_won: Decimal,
    pub total_lost: Decimal,
    pub biggest_win: Decimal,
    pub biggest_loss: Decimal,
    pub win_rate: f64,
}

impl WagerStats {
    /// Increment counters for one completion and recompute win rate in the same step.
    /// Money totals saturate; they are reporting figures, not balances.
    pub fn record(&mut self, stake: Decimal, outcome: WagerOutcome) {
        self.total_wagers += 1;
        self.total_wagered = self.total_wagered.saturating_add(stake);
        match outcome {
            WagerOutcome::Won { actual_win } => {
                self.wagers_won += 1;
                self.total_won = self.total_won.saturating_add(actual_win);
                self.biggest_win = self.biggest_win.max(actual_win);
            }
            WagerOutcome::Lost => {
                self.wagers_lost += 1;
                self.total_lost = self.total_lost.saturating_add(stake);
                self.biggest_loss = self.biggest_loss.max(stake);
            }
        }
        self.win_rate = self.wagers_won as f64 / self.total_wagers as f64;
    }

    /// Rebuild from wager history. Disputed/resolved wagers count by the
    /// outcome they had before the dispute.
    pub fn derive<'a>(wagers: impl IntoIterator<Item = &'a Wager>, disputes: &BTreeMap<String, Dispute>) -> Self {
        let mut stats = Self::default();
        let prior: BTreeMap<&str, WagerStatus> = disputes
            .values()
            .map(|d| (d.wager_id.as_str(), d.prior_status))
            .collect();

        for wager in wagers {
            let settled_as = match wager.status {
                WagerStatus::Disputed | WagerStatus::Resolved => prior.get(wager.id.as_str()).copied(),
                other => Some(other),
            };
            match settled_as {
                Some(WagerStatus::Won) => stats.record(
                    wager.amount,
                    WagerOutcome::Won { actual_win: wager.actual_win.unwrap_or(Decimal::ZERO) },
                ),
                Some(WagerStatus::Lost) => stats.record(wager.amount, WagerOutcome::Lost),
                _ => {}
            }
        }
        stats
    }

    /// Counter-level equality, ignoring float noise in win_rate
    pub fn matches(&self, other: &WagerStats) -> bool {
        self.total_wagers == other.total_wagers
            && self.wagers_won == other.wagers_won
            && self.wagers_lost == other.wagers_lost
            && self.total_wagered == other.total_wagered
            && self.total_won == other.total_won
            && self.total_lost == other.total_lost
            && self.biggest_win == other.biggest_win
            && self.biggest_loss == other.biggest_loss
            && (self.win_rate - other.win_rate).abs() < 1e-9
    }
}

// ============================================================================
// DISPUTES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisputeReason {
    /// Raised by the player or support against a settled wager
    Player { note: String },
    /// Wager funding traced to a charged-back deposit
    Chargeback { transaction_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    Upheld,
    Denied,
    Partial,
}

/// Operator decision closing a dispute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Resolution {
    /// Refund the full stake
    Upheld,
    /// No refund
    Denied,
    /// Refund part of the stake
    Partial { refund: Decimal },
}

impl Resolution {
    pub fn status(&self) -> DisputeStatus {
        match self {
            Resolution::Upheld => DisputeStatus::Upheld,
            Resolution::Denied => DisputeStatus::Denied,
            Resolution::Partial { .. } => DisputeStatus::Partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: String,
    pub wager_id: String,
    pub wallet_id: String,
    pub reason: DisputeReason,
    /// Wager status before it was frozen
    pub prior_status: WagerStatus,
    /// True when the stake is still held in escrow (frozen while active)
    pub stake_in_escrow: bool,
    pub status: DisputeStatus,
    #[serde(default)]
    pub refund_amount: Option<Decimal>,
    #[serde(default)]
    pub refund_transaction_id: Option<String>,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn open(wager: &Wager, reason: DisputeReason, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("dispute_{}", Uuid::new_v4().simple()),
            wager_id: wager.id.clone(),
            wallet_id: wager.wallet_id.clone(),
            reason,
            prior_status: wager.status,
            stake_in_escrow: wager.status == WagerStatus::Active,
            status: DisputeStatus::Open,
            refund_amount: None,
            refund_transaction_id: None,
            opened_at: now,
            resolved_at: None,
        }
    }

    pub fn is_chargeback(&self) -> bool {
        matches!(self.reason, DisputeReason::Chargeback { .. })
    }
}
