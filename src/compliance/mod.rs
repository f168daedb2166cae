//! Risk & Compliance Gate
//!
//! `ComplianceGate::evaluate` is a pure decision over facts gathered from one
//! wallet row. Hard limits deny; behavioral heuristics only flag. The caller
//! gathers the facts under the row lock so the headroom it checks is the
//! headroom it spends.

pub mod desk;
pub mod heuristics;
pub mod limits;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RiskConfig;
use crate::error::{LedgerError, LedgerResult, Severity};
use crate::ledger::{TxStatus, TxType};
use crate::store::WalletRecord;
use crate::wagers::{WagerStats, WagerStatus};

pub use desk::ComplianceDesk;
pub use heuristics::{assess, BehaviorSample, HeuristicConfig, RiskSignal, SignalKind};
pub use limits::{ComplianceState, Period, PeriodLimits, PlaySession, RiskLimits};

// ============================================================================
// REQUEST & DECISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComplianceKind {
    Deposit,
    Withdrawal,
    Wager {
        game_id: String,
        /// Gameplay wagers count toward session and daily play-time limits
        #[serde(default)]
        gameplay: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DenyReason {
    SelfExcluded { until: DateTime<Utc> },
    ChargebackHold,
    Limit { reason: String },
}

impl DenyReason {
    fn limit(reason: impl Into<String>) -> Self {
        DenyReason::Limit { reason: reason.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny { reason: DenyReason },
    /// Admitted, with signals queued for review
    Flag { signals: Vec<RiskSignal> },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Deny { .. })
    }

    /// Map a denial onto the error taxonomy; admitted decisions yield their signals
    pub fn into_result(self) -> LedgerResult<Vec<RiskSignal>> {
        match self {
            Decision::Allow => Ok(Vec::new()),
            Decision::Flag { signals } => Ok(signals),
            Decision::Deny { reason: DenyReason::SelfExcluded { until } } => {
                Err(LedgerError::SelfExcluded { until: until.to_rfc3339() })
            }
            Decision::Deny { reason: DenyReason::ChargebackHold } => Err(LedgerError::ChargebackPendingReview(
                "withdrawals are blocked while a chargeback is under review".to_string(),
            )),
            Decision::Deny { reason: DenyReason::Limit { reason } } => Err(LedgerError::ComplianceLimitExceeded(reason)),
        }
    }
}

// ============================================================================
// RISK FLAGS
// ============================================================================

/// Persisted heuristic signal awaiting manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFlag {
    pub id: String,
    pub user_id: String,
    pub wallet_id: String,
    #[serde(default)]
    pub wager_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub kind: SignalKind,
    pub reason: String,
    pub severity: Severity,
    pub raised_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
}

impl RiskFlag {
    pub fn from_signal(user_id: &str, wallet_id: &str, signal: RiskSignal, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("flag_{}", Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            wallet_id: wallet_id.to_string(),
            wager_id: None,
            transaction_id: None,
            kind: signal.kind,
            reason: signal.reason,
            severity: signal.severity,
            raised_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
        }
    }

    pub fn with_wager(mut self, wager_id: &str) -> Self {
        self.wager_id = Some(wager_id.to_string());
        self
    }

    pub fn with_transaction(mut self, tx_id: &str) -> Self {
        self.transaction_id = Some(tx_id.to_string());
        self
    }
}

// ============================================================================
// FACTS
// ============================================================================

/// Everything the gate reads about one user, gathered under the row lock
#[derive(Debug, Clone)]
pub struct GateFacts<'a> {
    pub compliance: &'a ComplianceState,
    pub stats: &'a WagerStats,
    /// Completed and pending deposits per rolling window, indexed like `Period::ALL`
    pub deposits: [Decimal; 3],
    /// Stakes of lost wagers per rolling window
    pub losses: [Decimal; 3],
    /// Stakes of the user's wagers still backed by escrow
    pub user_exposure: Decimal,
    pub game_exposure: Decimal,
    pub recent_wager_times: Vec<DateTime<Utc>>,
    pub recent_win_amounts: Vec<Decimal>,
}

impl<'a> GateFacts<'a> {
    pub fn gather(record: &'a WalletRecord, game_exposure: Decimal, now: DateTime<Utc>) -> Self {
        let mut deposits = [Decimal::ZERO; 3];
        // Pending deposits count against limits from the moment they are admitted
        for tx in &record.journal {
            if tx.tx_type != TxType::Deposit || !matches!(tx.status, TxStatus::Completed | TxStatus::Pending) {
                continue;
            }
            let at = tx.processed_at.unwrap_or(tx.created_at);
            for (i, period) in Period::ALL.iter().enumerate() {
                if at > now - period.window() {
                    deposits[i] = deposits[i].saturating_add(tx.amount);
                }
            }
        }

        let settled_as = |wager_id: &str, status: WagerStatus| match status {
            WagerStatus::Disputed | WagerStatus::Resolved => record
                .disputes
                .values()
                .find(|d| d.wager_id == wager_id)
                .map(|d| d.prior_status)
                .unwrap_or(status),
            other => other,
        };

        let mut losses = [Decimal::ZERO; 3];
        let mut wins: Vec<(DateTime<Utc>, Decimal)> = Vec::new();
        let mut recent_wager_times = Vec::new();
        let day_ago = now - Duration::hours(24);

        for wager in record.wagers.values() {
            if wager.created_at > day_ago {
                recent_wager_times.push(wager.created_at);
            }
            let completed_at = wager.completed_at.unwrap_or(wager.created_at);
            match settled_as(&wager.id, wager.status) {
                WagerStatus::Lost => {
                    for (i, period) in Period::ALL.iter().enumerate() {
                        if completed_at > now - period.window() {
                            losses[i] = losses[i].saturating_add(wager.amount);
                        }
                    }
                }
                WagerStatus::Won => {
                    if let Some(win) = wager.actual_win {
                        wins.push((completed_at, win));
                    }
                }
                _ => {}
            }
        }
        recent_wager_times.sort();
        wins.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            compliance: &record.compliance,
            stats: &record.stats,
            deposits,
            losses,
            user_exposure: record
                .escrowed_wagers()
                .map(|w| w.amount)
                .fold(Decimal::ZERO, Decimal::saturating_add),
            game_exposure,
            recent_wager_times,
            recent_win_amounts: wins.into_iter().map(|(_, win)| win).collect(),
        }
    }

    fn sample(&self) -> BehaviorSample<'_> {
        BehaviorSample {
            stats: self.stats,
            recent_wager_times: &self.recent_wager_times,
            recent_win_amounts: &self.recent_win_amounts,
        }
    }
}

// ============================================================================
// GATE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ComplianceGate {
    config: RiskConfig,
}

impl ComplianceGate {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Checks run in order and stop at the first hard denial:
    /// exclusion windows, deposit limits, loss limits, play time, exposure,
    /// then non-blocking heuristics.
    pub fn evaluate(&self, facts: &GateFacts<'_>, amount: Decimal, kind: &ComplianceKind, now: DateTime<Utc>) -> Decision {
        let state = facts.compliance;

        // Withdrawals are never blocked by exclusion windows
        if *kind == ComplianceKind::Withdrawal {
            if state.chargeback_hold {
                return Decision::Deny { reason: DenyReason::ChargebackHold };
            }
            return Decision::Allow;
        }

        if !state.eligible {
            return deny("account not eligible");
        }
        if let Some(until) = state.self_excluded_until.filter(|_| state.is_self_excluded(now)) {
            return Decision::Deny { reason: DenyReason::SelfExcluded { until } };
        }
        if state.is_cooling_off(now) {
            return deny("cooling-off period");
        }

        let limits = state.effective_limits(&self.config.default_limits);

        match kind {
            ComplianceKind::Deposit => {
                if let Some(period) = first_violated(&limits.deposit, &facts.deposits, amount) {
                    return deny(format!("{} deposit limit", period.as_str()));
                }
                Decision::Allow
            }
            ComplianceKind::Withdrawal => Decision::Allow,
            ComplianceKind::Wager { gameplay, .. } => {
                if let Some(period) = first_violated(&limits.loss, &facts.losses, amount) {
                    return deny(format!("{} loss limit", period.as_str()));
                }

                if *gameplay {
                    if let (Some(max), Some(elapsed)) = (limits.session_minutes, state.session_elapsed(now)) {
                        if elapsed >= Duration::minutes(max) {
                            return deny("session time limit");
                        }
                    }
                    if let Some(max) = limits.daily_play_minutes {
                        if state.play_time_last_day(now) >= Duration::minutes(max) {
                            return deny("daily time limit");
                        }
                    }
                }

                if self.config.max_game_exposure.map_or(false, |cap| exceeds(facts.game_exposure, amount, cap)) {
                    return deny("game exposure cap");
                }
                if self.config.max_user_exposure.map_or(false, |cap| exceeds(facts.user_exposure, amount, cap)) {
                    return deny("user exposure cap");
                }

                let signals = assess(&self.config.heuristics, &facts.sample(), now);
                if signals.is_empty() {
                    Decision::Allow
                } else {
                    Decision::Flag { signals }
                }
            }
        }
    }
}

fn deny(reason: impl Into<String>) -> Decision {
    Decision::Deny { reason: DenyReason::limit(reason) }
}

/// `total + amount > limit`; a sum past `Decimal` range exceeds every limit
fn exceeds(total: Decimal, amount: Decimal, limit: Decimal) -> bool {
    total.checked_add(amount).map_or(true, |sum| sum > limit)
}

/// First period whose running total plus `amount` would exceed its limit
fn first_violated(limits: &PeriodLimits, totals: &[Decimal; 3], amount: Decimal) -> Option<Period> {
    Period::ALL
        .iter()
        .zip(totals.iter())
        .find(|(period, total)| limits.get(**period).map_or(false, |limit| exceeds(**total, amount, limit)))
        .map(|(period, _)| *period)
}
