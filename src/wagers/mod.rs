//! Wager Lifecycle Manager
//!
//! Drives each wager through `active → won | lost | cancelled | disputed` and
//! `disputed → resolved`. Every transition runs in one atomic unit covering the
//! owner's wallet row and the game's stake escrow account, so a stake is never
//! debited without a wager row (or the reverse).

pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compliance::{ComplianceGate, ComplianceKind, GateFacts, RiskFlag};
use crate::error::{ensure_positive, LedgerError, LedgerResult};
use crate::escrow::{wager_stakes_account, EscrowReference};
use crate::ledger::{AtomicUnit, LedgerCore, TxMetadata, TxStatus, TxType};
use crate::store::WalletRecord;

pub use types::{Dispute, DisputeReason, DisputeStatus, Resolution, Wager, WagerOutcome, WagerStats, WagerStatus};

/// Request to stake funds on a game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWager {
    pub user_id: String,
    pub game_id: String,
    pub amount: Decimal,
    pub potential_win: Decimal,
    #[serde(default)]
    pub gameplay: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct WagerManager {
    ledger: LedgerCore,
    gate: Arc<ComplianceGate>,
}

impl WagerManager {
    pub fn new(ledger: LedgerCore, gate: Arc<ComplianceGate>) -> Self {
        Self { ledger, gate }
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    /// Gate, debit, escrow credit and wager insert in one unit
    pub fn create_wager(&self, request: CreateWager) -> LedgerResult<Wager> {
        ensure_positive(request.amount)?;
        if request.potential_win < Decimal::ZERO {
            return Err(LedgerError::invalid_amount(request.potential_win));
        }
        if request.game_id.trim().is_empty() {
            return Err(LedgerError::InvalidAmount("game id is required".to_string()));
        }

        let wallet = self.ledger.get_or_create_wallet(&request.user_id)?;
        let account = wager_stakes_account(&request.game_id);
        let gate = &self.gate;

        let result = self.ledger.atomically(&wallet.id, Some(&account), |unit| {
            let now = unit.now();

            let kind = ComplianceKind::Wager { game_id: request.game_id.clone(), gameplay: request.gameplay };
            let decision = {
                let facts = GateFacts::gather(unit.record(), unit.game_exposure(), now);
                gate.evaluate(&facts, request.amount, &kind, now)
            };
            let signals = decision.into_result()?;

            let wager_id = Wager::new_id();
            let stake = unit.post(TxType::Wager, request.amount, TxStatus::Completed, TxMetadata::for_wager(&wager_id), None)?;
            unit.escrow_credit(request.amount, Some(EscrowReference::Wager(wager_id.clone())))?;

            let wager = Wager {
                id: wager_id,
                user_id: request.user_id.clone(),
                wallet_id: wallet.id.clone(),
                game_id: request.game_id.clone(),
                amount: request.amount,
                potential_win: request.potential_win,
                actual_win: None,
                status: WagerStatus::Active,
                escrow_account: account.clone(),
                gameplay: request.gameplay,
                stake_transaction_id: stake.id,
                created_at: now,
                completed_at: None,
                metadata: request.metadata.clone(),
            };
            unit.put_wager(wager.clone());
            unit.reserve_exposure(wager.amount)?;

            for signal in signals {
                unit.raise_flag(RiskFlag::from_signal(&wager.user_id, &wager.wallet_id, signal, now).with_wager(&wager.id))?;
            }
            Ok(wager)
        });

        match result {
            Ok(wager) => {
                info!(
                    user = %wager.user_id,
                    wager = %wager.id,
                    game = %wager.game_id,
                    amount = %wager.amount,
                    "🎲 wager placed"
                );
                Ok(wager)
            }
            Err(e) => {
                warn!(user = %request.user_id, game = %request.game_id, amount = %request.amount, error = %e, "⛔ wager rejected");
                Err(e)
            }
        }
    }

    // ========================================================================
    // COMPLETE / CANCEL
    // ========================================================================

    pub fn complete_wager(&self, wager_id: &str, outcome: WagerOutcome) -> LedgerResult<Wager> {
        if let WagerOutcome::Won { actual_win } = outcome {
            ensure_positive(actual_win)?;
        }
        let next = match outcome {
            WagerOutcome::Won { .. } => WagerStatus::Won,
            WagerOutcome::Lost => WagerStatus::Lost,
        };

        let (wallet_id, account) = self.locate(wager_id)?;
        let wager = self.ledger.atomically(&wallet_id, Some(&account), |unit| {
            let mut wager = load_wager(unit, wager_id)?;
            ensure_transition(unit, &wager, next)?;
            let now = unit.now();

            if let WagerOutcome::Won { actual_win } = outcome {
                let payout = unit.post(TxType::Winning, actual_win, TxStatus::Completed, TxMetadata::for_wager(wager_id), None)?;
                wager.metadata.insert("payout_transaction_id".to_string(), payout.id);
                wager.actual_win = Some(actual_win);
            }
            // Stake leaves escrow either way; on a loss it is forfeited
            unit.escrow_debit(wager.amount, Some(EscrowReference::Wager(wager.id.clone())))?;

            wager.status = next;
            wager.completed_at = Some(now);
            unit.stats_mut().record(wager.amount, outcome);
            unit.put_wager(wager.clone());
            unit.release_exposure(wager.amount);
            Ok(wager)
        });

        match &wager {
            Ok(w) => info!(wager = wager_id, user = %w.user_id, status = next.as_str(), actual_win = ?w.actual_win, "🏁 wager completed"),
            Err(e) => warn!(wager = wager_id, error = %e, "⛔ wager completion rejected"),
        }
        wager
    }

    /// Only from `active`; refunds the stake
    pub fn cancel_wager(&self, wager_id: &str) -> LedgerResult<Wager> {
        let (wallet_id, account) = self.locate(wager_id)?;
        let wager = self.ledger.atomically(&wallet_id, Some(&account), |unit| {
            let mut wager = load_wager(unit, wager_id)?;
            ensure_transition(unit, &wager, WagerStatus::Cancelled)?;

            unit.post(TxType::Refund, wager.amount, TxStatus::Completed, TxMetadata::for_wager(wager_id), None)?;
            unit.escrow_debit(wager.amount, Some(EscrowReference::Wager(wager.id.clone())))?;

            wager.status = WagerStatus::Cancelled;
            wager.completed_at = Some(unit.now());
            unit.put_wager(wager.clone());
            unit.release_exposure(wager.amount);
            Ok(wager)
        });

        match &wager {
            Ok(w) => info!(wager = wager_id, user = %w.user_id, refund = %w.amount, "↩️ wager cancelled"),
            Err(e) => warn!(wager = wager_id, error = %e, "⛔ wager cancel rejected"),
        }
        wager
    }

    // ========================================================================
    // DISPUTES
    // ========================================================================

    /// Freeze a settled wager pending manual review
    pub fn create_dispute(&self, wager_id: &str, note: &str) -> LedgerResult<Dispute> {
        let (wallet_id, _) = self.locate(wager_id)?;
        let dispute = self.ledger.atomically(&wallet_id, None, |unit| {
            let mut wager = load_wager(unit, wager_id)?;
            if !matches!(wager.status, WagerStatus::Won | WagerStatus::Lost) {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "only won or lost wagers can be disputed; {} is {}",
                    wager_id,
                    wager.status.as_str()
                )));
            }

            let dispute = Dispute::open(&wager, DisputeReason::Player { note: note.to_string() }, unit.now());
            wager.status = WagerStatus::Disputed;
            unit.put_wager(wager);
            unit.put_dispute(dispute.clone());
            Ok(dispute)
        });

        match &dispute {
            Ok(d) => warn!(wager = wager_id, dispute = %d.id, "⚖️ dispute opened"),
            Err(e) => warn!(wager = wager_id, error = %e, "⛔ dispute rejected"),
        }
        dispute
    }

    /// Close a dispute. `upheld` refunds the stake, `partial` part of it,
    /// `denied` nothing. A stake still held in escrow is released.
    pub fn resolve_dispute(&self, dispute_id: &str, resolution: Resolution) -> LedgerResult<Dispute> {
        if let Resolution::Partial { refund } = resolution {
            ensure_positive(refund)?;
        }

        let wallet_id = self.ledger.store().wallet_of_dispute(dispute_id)?;
        let (stake_in_escrow, account) = self.peek(&wallet_id, |record| {
            let dispute = record
                .disputes
                .get(dispute_id)
                .ok_or_else(|| LedgerError::DisputeNotFound(dispute_id.to_string()))?;
            let wager = record
                .wagers
                .get(&dispute.wager_id)
                .ok_or_else(|| LedgerError::WagerNotFound(dispute.wager_id.clone()))?;
            Ok((dispute.stake_in_escrow, wager.escrow_account.clone()))
        })?;
        let escrow = stake_in_escrow.then_some(account.as_str());

        let dispute = self.ledger.atomically(&wallet_id, escrow, |unit| {
            let mut dispute = unit
                .dispute(dispute_id)
                .ok_or_else(|| LedgerError::DisputeNotFound(dispute_id.to_string()))?;
            if dispute.resolved_at.is_some() {
                return Err(LedgerError::InvalidStateTransition(format!("dispute {} is already resolved", dispute_id)));
            }
            let mut wager = load_wager(unit, &dispute.wager_id)?;
            if !wager.status.can_transition_to(WagerStatus::Resolved) {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "wager {} is {}, not disputed",
                    wager.id,
                    wager.status.as_str()
                )));
            }

            let refund = match resolution {
                Resolution::Upheld => wager.amount,
                Resolution::Denied => Decimal::ZERO,
                Resolution::Partial { refund } if refund <= wager.amount => refund,
                Resolution::Partial { refund } => {
                    return Err(LedgerError::InvalidAmount(format!(
                        "partial refund {} exceeds stake {}",
                        refund, wager.amount
                    )))
                }
            };

            let now = unit.now();
            if refund > Decimal::ZERO {
                let metadata = TxMetadata {
                    wager_id: Some(wager.id.clone()),
                    dispute_id: Some(dispute.id.clone()),
                    ..Default::default()
                };
                let tx = unit.post(TxType::Refund, refund, TxStatus::Completed, metadata, None)?;
                dispute.refund_transaction_id = Some(tx.id);
            }
            if dispute.stake_in_escrow {
                unit.escrow_debit(wager.amount, Some(EscrowReference::Wager(wager.id.clone())))?;
            }

            dispute.status = resolution.status();
            dispute.refund_amount = Some(refund);
            dispute.resolved_at = Some(now);
            wager.status = WagerStatus::Resolved;
            wager.completed_at.get_or_insert(now);

            if dispute.stake_in_escrow {
                unit.release_exposure(wager.amount);
            }
            unit.put_wager(wager);
            unit.put_dispute(dispute.clone());
            Ok(dispute)
        });

        match &dispute {
            Ok(d) => info!(
                dispute = dispute_id,
                wager = %d.wager_id,
                status = ?d.status,
                refund = ?d.refund_amount,
                "⚖️ dispute resolved"
            ),
            Err(e) => warn!(dispute = dispute_id, error = %e, "⛔ dispute resolution rejected"),
        }
        dispute
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn get_wager(&self, wager_id: &str) -> LedgerResult<Wager> {
        let wallet_id = self.ledger.store().wallet_of_wager(wager_id)?;
        self.peek(&wallet_id, |record| {
            record
                .wagers
                .get(wager_id)
                .cloned()
                .ok_or_else(|| LedgerError::WagerNotFound(wager_id.to_string()))
        })
    }

    /// Newest first
    pub fn list_wagers(&self, user_id: &str) -> LedgerResult<Vec<Wager>> {
        let wallet_id = self.wallet_of_user(user_id)?;
        self.peek(&wallet_id, |record| {
            let mut wagers: Vec<Wager> = record.wagers.values().cloned().collect();
            wagers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(wagers)
        })
    }

    pub fn get_wager_stats(&self, user_id: &str) -> LedgerResult<WagerStats> {
        let wallet_id = self.wallet_of_user(user_id)?;
        self.peek(&wallet_id, |record| Ok(record.stats.clone()))
    }

    pub fn get_dispute(&self, dispute_id: &str) -> LedgerResult<Dispute> {
        let wallet_id = self.ledger.store().wallet_of_dispute(dispute_id)?;
        self.peek(&wallet_id, |record| {
            record
                .disputes
                .get(dispute_id)
                .cloned()
                .ok_or_else(|| LedgerError::DisputeNotFound(dispute_id.to_string()))
        })
    }

    pub fn list_disputes(&self, user_id: &str) -> LedgerResult<Vec<Dispute>> {
        let wallet_id = self.wallet_of_user(user_id)?;
        self.peek(&wallet_id, |record| Ok(record.disputes.values().cloned().collect()))
    }

    fn wallet_of_user(&self, user_id: &str) -> LedgerResult<String> {
        self.ledger
            .store()
            .wallet_id_for_user(user_id)
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))
    }

    /// Wallet id and stake escrow account of a wager. Both are fixed at creation.
    fn locate(&self, wager_id: &str) -> LedgerResult<(String, String)> {
        let wallet_id = self.ledger.store().wallet_of_wager(wager_id)?;
        let account = self.peek(&wallet_id, |record| {
            record
                .wagers
                .get(wager_id)
                .map(|w| w.escrow_account.clone())
                .ok_or_else(|| LedgerError::WagerNotFound(wager_id.to_string()))
        })?;
        Ok((wallet_id, account))
    }

    fn peek<T>(&self, wallet_id: &str, f: impl FnOnce(&WalletRecord) -> LedgerResult<T>) -> LedgerResult<T> {
        let store = self.ledger.store();
        let cell = store.wallet_cell(wallet_id)?;
        let row = store.lock_wallet(&cell, wallet_id)?;
        f(&row)
    }
}

fn load_wager(unit: &AtomicUnit<'_>, wager_id: &str) -> LedgerResult<Wager> {
    unit.wager(wager_id)
        .ok_or_else(|| LedgerError::WagerNotFound(wager_id.to_string()))
}

/// Chargeback freezes take precedence over the ordinary state machine check
fn ensure_transition(unit: &AtomicUnit<'_>, wager: &Wager, next: WagerStatus) -> LedgerResult<()> {
    if wager.status == WagerStatus::Disputed {
        if let Some(dispute) = unit.open_dispute_for(&wager.id).filter(Dispute::is_chargeback) {
            return Err(LedgerError::ChargebackPendingReview(format!(
                "wager {} is frozen by chargeback dispute {}",
                wager.id, dispute.id
            )));
        }
    }
    if !wager.status.can_transition_to(next) {
        return Err(LedgerError::InvalidStateTransition(format!(
            "wager {} cannot move from {} to {}",
            wager.id,
            wager.status.as_str(),
            next.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::RiskConfig;
    use crate::store::Store;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        ledger: LedgerCore,
        wagers: WagerManager,
    }

    fn harness(config: RiskConfig) -> Harness {
        let store = Arc::new(Store::new(Duration::from_millis(200)));
        let ledger = LedgerCore::new(store, Arc::new(SystemClock));
        let wagers = WagerManager::new(ledger.clone(), Arc::new(ComplianceGate::new(config)));
        Harness { ledger, wagers }
    }

    fn fund(h: &Harness, user: &str, amount: Decimal) -> String {
        let wallet = h.ledger.get_or_create_wallet(user).unwrap();
        h.ledger
            .record_transaction(&wallet.id, TxType::Deposit, amount, TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();
        wallet.id
    }

    fn bet(user: &str, game: &str, amount: Decimal) -> CreateWager {
        CreateWager {
            user_id: user.to_string(),
            game_id: game.to_string(),
            amount,
            potential_win: amount * dec!(2),
            gameplay: false,
            metadata: BTreeMap::new(),
        }
    }

    fn escrow_balance(h: &Harness, game: &str) -> Decimal {
        h.ledger.store().escrow_cell(&wager_stakes_account(game)).lock().account.balance
    }

    fn open_stakes(h: &Harness, game: &str) -> Decimal {
        h.ledger.store().escrow_cell(&wager_stakes_account(game)).lock().account.open_stakes
    }

    #[test]
    fn test_win_flow() {
        let h = harness(RiskConfig::default());
        fund(&h, "alice", dec!(100));

        let wager = h.wagers.create_wager(bet("alice", "g1", dec!(30))).unwrap();
        assert_eq!(h.ledger.get_wallet("alice").unwrap().balance, dec!(70));
        assert_eq!(escrow_balance(&h, "g1"), dec!(30));

        let done = h.wagers.complete_wager(&wager.id, WagerOutcome::Won { actual_win: dec!(60) }).unwrap();
        assert_eq!(done.status, WagerStatus::Won);

        let wallet = h.ledger.get_wallet("alice").unwrap();
        assert_eq!(wallet.balance, dec!(130));
        assert_eq!(wallet.lifetime_winnings, dec!(60));
        assert_eq!(escrow_balance(&h, "g1"), dec!(0));

        let stats = h.wagers.get_wager_stats("alice").unwrap();
        assert_eq!(stats.wagers_won, 1);
        assert_eq!(stats.win_rate, 1.0);
    }

    #[test]
    fn test_loss_forfeits_stake() {
        let h = harness(RiskConfig::default());
        fund(&h, "bob", dec!(50));
        let wager = h.wagers.create_wager(bet("bob", "g2", dec!(20))).unwrap();
        h.wagers.complete_wager(&wager.id, WagerOutcome::Lost).unwrap();

        assert_eq!(h.ledger.get_wallet("bob").unwrap().balance, dec!(30));
        assert_eq!(escrow_balance(&h, "g2"), dec!(0));
        let stats = h.wagers.get_wager_stats("bob").unwrap();
        assert_eq!(stats.wagers_lost, 1);
        assert_eq!(stats.biggest_loss, dec!(20));
        assert_eq!(stats.win_rate, 0.0);
    }

    #[test]
    fn test_complete_twice_rejected() {
        let h = harness(RiskConfig::default());
        fund(&h, "carol", dec!(50));
        let wager = h.wagers.create_wager(bet("carol", "g1", dec!(10))).unwrap();
        h.wagers.complete_wager(&wager.id, WagerOutcome::Lost).unwrap();
        let again = h.wagers.complete_wager(&wager.id, WagerOutcome::Won { actual_win: dec!(20) });
        assert!(matches!(again, Err(LedgerError::InvalidStateTransition(_))));
        assert_eq!(h.ledger.get_wallet("carol").unwrap().balance, dec!(40));
    }

    #[test]
    fn test_insufficient_balance_leaves_no_wager() {
        let h = harness(RiskConfig::default());
        fund(&h, "dave", dec!(10));
        let err = h.wagers.create_wager(bet("dave", "g1", dec!(11))).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert!(h.wagers.list_wagers("dave").unwrap().is_empty());
        assert_eq!(escrow_balance(&h, "g1"), dec!(0));
        assert_eq!(open_stakes(&h, "g1"), dec!(0));
    }

    #[test]
    fn test_exposure_cap_denies_and_releases() {
        let config = RiskConfig { max_game_exposure: Some(dec!(50)), ..Default::default() };
        let h = harness(config);
        fund(&h, "erin", dec!(200));

        let first = h.wagers.create_wager(bet("erin", "g9", dec!(40))).unwrap();
        let err = h.wagers.create_wager(bet("erin", "g9", dec!(20))).unwrap_err();
        assert_eq!(err, LedgerError::ComplianceLimitExceeded("game exposure cap".into()));

        // Another game has its own cap
        assert!(h.wagers.create_wager(bet("erin", "g10", dec!(45))).is_ok());
        assert_eq!(open_stakes(&h, "g9"), dec!(40));
        assert_eq!(open_stakes(&h, "g10"), dec!(45));

        h.wagers.cancel_wager(&first.id).unwrap();
        assert_eq!(open_stakes(&h, "g9"), dec!(0));
        assert!(h.wagers.create_wager(bet("erin", "g9", dec!(20))).is_ok());
    }

    #[test]
    fn test_heuristic_flag_commits_with_wager() {
        let mut config = RiskConfig::default();
        config.heuristics.max_wagers_per_hour = 0;
        let h = harness(config);
        fund(&h, "ivan", dec!(100));

        // Flag queue busy: the whole placement rolls back
        let queue = h.ledger.store().lock_flags().unwrap();
        let err = h.wagers.create_wager(bet("ivan", "g1", dec!(10))).unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout(_)));
        drop(queue);
        assert_eq!(h.ledger.get_wallet("ivan").unwrap().balance, dec!(100));
        assert!(h.wagers.list_wagers("ivan").unwrap().is_empty());
        assert_eq!(escrow_balance(&h, "g1"), dec!(0));
        assert_eq!(open_stakes(&h, "g1"), dec!(0));

        let wager = h.wagers.create_wager(bet("ivan", "g1", dec!(10))).unwrap();
        let flags = h.ledger.store().lock_flags().unwrap().clone();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].wager_id.as_deref(), Some(wager.id.as_str()));
        assert_eq!(flags[0].user_id, "ivan");
    }

    #[test]
    fn test_dispute_partial_refund() {
        let h = harness(RiskConfig::default());
        fund(&h, "frank", dec!(100));
        let wager = h.wagers.create_wager(bet("frank", "g1", dec!(40))).unwrap();
        h.wagers.complete_wager(&wager.id, WagerOutcome::Lost).unwrap();

        let dispute = h.wagers.create_dispute(&wager.id, "game crashed").unwrap();
        assert!(!dispute.stake_in_escrow);
        assert_eq!(h.wagers.get_wager(&wager.id).unwrap().status, WagerStatus::Disputed);

        let too_much = h.wagers.resolve_dispute(&dispute.id, Resolution::Partial { refund: dec!(41) });
        assert!(matches!(too_much, Err(LedgerError::InvalidAmount(_))));

        let resolved = h.wagers.resolve_dispute(&dispute.id, Resolution::Partial { refund: dec!(15) }).unwrap();
        assert_eq!(resolved.status, DisputeStatus::Partial);
        assert_eq!(h.ledger.get_wallet("frank").unwrap().balance, dec!(75));
        assert_eq!(h.wagers.get_wager(&wager.id).unwrap().status, WagerStatus::Resolved);

        let twice = h.wagers.resolve_dispute(&dispute.id, Resolution::Upheld);
        assert!(matches!(twice, Err(LedgerError::InvalidStateTransition(_))));
    }

    #[test]
    fn test_cannot_dispute_active_or_cancelled() {
        let h = harness(RiskConfig::default());
        fund(&h, "gina", dec!(100));
        let wager = h.wagers.create_wager(bet("gina", "g1", dec!(10))).unwrap();
        assert!(matches!(
            h.wagers.create_dispute(&wager.id, "early"),
            Err(LedgerError::InvalidStateTransition(_))
        ));
        h.wagers.cancel_wager(&wager.id).unwrap();
        assert!(matches!(
            h.wagers.create_dispute(&wager.id, "late"),
            Err(LedgerError::InvalidStateTransition(_))
        ));
    }

    #[test]
    fn test_stats_rederivable() {
        let h = harness(RiskConfig::default());
        let wallet_id = fund(&h, "hank", dec!(500));
        for (i, outcome) in [
            WagerOutcome::Won { actual_win: dec!(25) },
            WagerOutcome::Lost,
            WagerOutcome::Lost,
        ]
        .into_iter()
        .enumerate()
        {
            let wager = h.wagers.create_wager(bet("hank", &format!("g{}", i), dec!(10))).unwrap();
            h.wagers.complete_wager(&wager.id, outcome).unwrap();
        }
        let lost = h.wagers.list_wagers("hank").unwrap().into_iter().find(|w| w.status == WagerStatus::Lost).unwrap();
        h.wagers.create_dispute(&lost.id, "check").unwrap();

        let cell = h.ledger.store().wallet_cell(&wallet_id).unwrap();
        let row = cell.lock();
        let derived = WagerStats::derive(row.wagers.values(), &row.disputes);
        assert!(row.stats.matches(&derived));
        assert_eq!(derived.total_wagers, 3);
    }
}
