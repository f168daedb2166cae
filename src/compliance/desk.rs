//! Compliance desk: per-user responsible-gaming controls, dry-run gate
//! evaluation and the risk flag review queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::compliance::{ComplianceGate, ComplianceKind, ComplianceState, Decision, GateFacts, RiskFlag, RiskLimits};
use crate::error::{ensure_positive, LedgerError, LedgerResult};
use crate::escrow::wager_stakes_account;
use crate::ledger::{LedgerCore, Wallet};
use crate::store::WalletRecord;

#[derive(Clone)]
pub struct ComplianceDesk {
    ledger: LedgerCore,
    gate: Arc<ComplianceGate>,
}

impl ComplianceDesk {
    pub fn new(ledger: LedgerCore, gate: Arc<ComplianceGate>) -> Self {
        Self { ledger, gate }
    }

    /// Evaluate without side effects; signals are returned, not queued.
    /// A user with no wallet is judged as a fresh account and none is created.
    pub fn evaluate_compliance(&self, user_id: &str, amount: Decimal, kind: &ComplianceKind) -> LedgerResult<Decision> {
        ensure_positive(amount)?;
        let store = self.ledger.store();
        let now = self.ledger.clock().now();

        let Some(wallet_id) = store.wallet_id_for_user(user_id) else {
            let fresh = WalletRecord::new(Wallet::new(user_id, now));
            return self.evaluate_record(&fresh, amount, kind, now);
        };
        let cell = store.wallet_cell(&wallet_id)?;
        let row = store.lock_wallet(&cell, &wallet_id)?;
        self.evaluate_record(&row, amount, kind, now)
    }

    fn evaluate_record(
        &self,
        record: &WalletRecord,
        amount: Decimal,
        kind: &ComplianceKind,
        now: DateTime<Utc>,
    ) -> LedgerResult<Decision> {
        let store = self.ledger.store();
        let game_exposure = match kind {
            ComplianceKind::Wager { game_id, .. } => {
                let account_id = wager_stakes_account(game_id);
                match store.existing_escrow_cell(&account_id) {
                    Some(cell) => store.lock_escrow(&cell, &account_id)?.account.open_stakes,
                    None => Decimal::ZERO,
                }
            }
            _ => Decimal::ZERO,
        };
        let facts = GateFacts::gather(record, game_exposure, now);
        Ok(self.gate.evaluate(&facts, amount, kind, now))
    }

    pub fn compliance_state(&self, user_id: &str) -> LedgerResult<ComplianceState> {
        let store = self.ledger.store();
        let wallet_id = store
            .wallet_id_for_user(user_id)
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;
        let cell = store.wallet_cell(&wallet_id)?;
        let row = store.lock_wallet(&cell, &wallet_id)?;
        Ok(row.compliance.clone())
    }

    /// Per-user limits replacing the configured defaults
    pub fn set_limits(&self, user_id: &str, limits: RiskLimits) -> LedgerResult<ComplianceState> {
        let state = self.update(user_id, |state, _| {
            state.limits = Some(limits);
            Ok(())
        })?;
        info!(user = user_id, ?limits, "🎚️ risk limits updated");
        Ok(state)
    }

    /// Exclusion can only be extended, never shortened
    pub fn self_exclude(&self, user_id: &str, until: DateTime<Utc>) -> LedgerResult<ComplianceState> {
        let state = self.update(user_id, |state, now| {
            if until <= now {
                return Err(LedgerError::InvalidStateTransition(
                    "self-exclusion must end in the future".to_string(),
                ));
            }
            state.self_excluded_until = Some(state.self_excluded_until.map_or(until, |current| current.max(until)));
            state.end_session(now);
            Ok(())
        })?;
        warn!(user = user_id, until = %until, "🚫 self-exclusion started");
        Ok(state)
    }

    pub fn start_cooling_off(&self, user_id: &str, until: DateTime<Utc>) -> LedgerResult<ComplianceState> {
        let state = self.update(user_id, |state, now| {
            if until <= now {
                return Err(LedgerError::InvalidStateTransition(
                    "cooling-off must end in the future".to_string(),
                ));
            }
            state.cooling_off_until = Some(state.cooling_off_until.map_or(until, |current| current.max(until)));
            state.end_session(now);
            Ok(())
        })?;
        info!(user = user_id, until = %until, "🧊 cooling-off started");
        Ok(state)
    }

    /// Eligibility comes from the external verification service
    pub fn set_eligibility(&self, user_id: &str, eligible: bool) -> LedgerResult<ComplianceState> {
        let state = self.update(user_id, |state, _| {
            state.eligible = eligible;
            Ok(())
        })?;
        info!(user = user_id, eligible, "🪪 eligibility updated");
        Ok(state)
    }

    pub fn start_session(&self, user_id: &str) -> LedgerResult<ComplianceState> {
        self.update(user_id, |state, now| {
            state.start_session(now);
            Ok(())
        })
    }

    /// Returns the length of the closed session in minutes, if one was open
    pub fn end_session(&self, user_id: &str) -> LedgerResult<Option<i64>> {
        let mut minutes = None;
        self.update(user_id, |state, now| {
            minutes = state.end_session(now).map(|d| d.num_minutes());
            Ok(())
        })?;
        Ok(minutes)
    }

    /// Operator action after the chargeback has been reviewed
    pub fn clear_chargeback_hold(&self, user_id: &str) -> LedgerResult<ComplianceState> {
        let state = self.update(user_id, |state, _| {
            if !state.chargeback_hold {
                return Err(LedgerError::InvalidStateTransition("no chargeback hold to clear".to_string()));
            }
            state.chargeback_hold = false;
            Ok(())
        })?;
        info!(user = user_id, "🔓 chargeback hold cleared");
        Ok(state)
    }

    fn update(
        &self,
        user_id: &str,
        f: impl FnOnce(&mut ComplianceState, DateTime<Utc>) -> LedgerResult<()>,
    ) -> LedgerResult<ComplianceState> {
        let wallet = self.ledger.get_or_create_wallet(user_id)?;
        self.ledger.atomically(&wallet.id, None, |unit| {
            let now = unit.now();
            let state = unit.compliance_mut();
            f(state, now)?;
            Ok(state.clone())
        })
    }

    // ========================================================================
    // RISK FLAG QUEUE
    // ========================================================================

    pub fn list_flags(&self, open_only: bool) -> LedgerResult<Vec<RiskFlag>> {
        let flags = self.ledger.store().lock_flags()?;
        Ok(flags
            .iter()
            .filter(|f| !open_only || f.acknowledged_at.is_none())
            .cloned()
            .collect())
    }

    pub fn acknowledge_flag(&self, flag_id: &str, operator: &str) -> LedgerResult<RiskFlag> {
        let now = self.ledger.clock().now();
        let mut flags = self.ledger.store().lock_flags()?;
        let flag = flags
            .iter_mut()
            .find(|f| f.id == flag_id)
            .ok_or_else(|| LedgerError::InvalidStateTransition(format!("unknown risk flag {}", flag_id)))?;
        if flag.acknowledged_at.is_some() {
            return Err(LedgerError::InvalidStateTransition(format!("risk flag {} already acknowledged", flag_id)));
        }
        flag.acknowledged_at = Some(now);
        flag.acknowledged_by = Some(operator.to_string());
        info!(flag = flag_id, operator, "👀 risk flag acknowledged");
        Ok(flag.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::compliance::{RiskSignal, SignalKind};
    use crate::config::RiskConfig;
    use crate::error::Severity;
    use crate::store::Store;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn desk() -> (ComplianceDesk, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Store::new(std::time::Duration::from_millis(200)));
        let ledger = LedgerCore::new(store, clock.clone());
        (ComplianceDesk::new(ledger, Arc::new(ComplianceGate::new(RiskConfig::default()))), clock)
    }

    #[test]
    fn test_self_exclusion_only_extends() {
        let (desk, clock) = desk();
        let now = clock.now();
        desk.self_exclude("alice", now + Duration::days(30)).unwrap();
        let state = desk.self_exclude("alice", now + Duration::days(1)).unwrap();
        assert_eq!(state.self_excluded_until, Some(now + Duration::days(30)));

        let decision = desk.evaluate_compliance("alice", dec!(10), &ComplianceKind::Deposit).unwrap();
        assert!(!decision.is_allowed());
        assert!(desk.evaluate_compliance("alice", dec!(10), &ComplianceKind::Withdrawal).unwrap().is_allowed());
    }

    #[test]
    fn test_session_roundtrip() {
        let (desk, clock) = desk();
        desk.start_session("bob").unwrap();
        clock.advance(Duration::minutes(25));
        assert_eq!(desk.end_session("bob").unwrap(), Some(25));
        assert_eq!(desk.end_session("bob").unwrap(), None);
        assert_eq!(desk.compliance_state("bob").unwrap().sessions.len(), 1);
    }

    #[test]
    fn test_flag_acknowledgement() {
        let (desk, clock) = desk();
        let flag = RiskFlag::from_signal(
            "carol",
            "wallet_1",
            RiskSignal { kind: SignalKind::HighWinRate, reason: "test".into(), severity: Severity::Medium },
            clock.now(),
        );
        let flag_id = flag.id.clone();
        desk.ledger.store().lock_flags().unwrap().push(flag);

        assert_eq!(desk.list_flags(true).unwrap().len(), 1);
        let acked = desk.acknowledge_flag(&flag_id, "ops").unwrap();
        assert_eq!(acked.acknowledged_by.as_deref(), Some("ops"));
        assert!(desk.list_flags(true).unwrap().is_empty());
        assert_eq!(desk.list_flags(false).unwrap().len(), 1);
        assert!(desk.acknowledge_flag(&flag_id, "ops").is_err());
    }

    #[test]
    fn test_evaluation_creates_no_wallet() {
        let (desk, _) = desk();
        let kind = ComplianceKind::Wager { game_id: "g1".into(), gameplay: true };
        assert!(desk.evaluate_compliance("ghost", dec!(10), &kind).unwrap().is_allowed());
        assert!(desk.evaluate_compliance("ghost", dec!(10), &ComplianceKind::Deposit).unwrap().is_allowed());
        assert!(desk.ledger.store().wallet_id_for_user("ghost").is_none());
        assert!(desk.ledger.store().existing_escrow_cell(&wager_stakes_account("g1")).is_none());
        assert!(matches!(desk.compliance_state("ghost"), Err(LedgerError::WalletNotFound(_))));
    }

    #[test]
    fn test_evaluation_reads_game_exposure() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Store::new(std::time::Duration::from_millis(200)));
        let ledger = LedgerCore::new(store, clock);
        let config = RiskConfig { max_game_exposure: Some(dec!(100)), ..Default::default() };
        let desk = ComplianceDesk::new(ledger.clone(), Arc::new(ComplianceGate::new(config)));

        ledger.store().escrow_cell(&wager_stakes_account("g7")).lock().account.open_stakes = dec!(95);
        let kind = ComplianceKind::Wager { game_id: "g7".into(), gameplay: false };
        assert!(!desk.evaluate_compliance("erin", dec!(10), &kind).unwrap().is_allowed());
        assert!(desk.evaluate_compliance("erin", dec!(5), &kind).unwrap().is_allowed());
    }

    #[test]
    fn test_clear_hold_requires_hold() {
        let (desk, _) = desk();
        assert!(matches!(
            desk.clear_chargeback_hold("dave"),
            Err(LedgerError::InvalidStateTransition(_))
        ));
    }
}
