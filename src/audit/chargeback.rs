// Chargebacks: reversal of a completed deposit by the payment rail.
// Nothing here is ever auto-resolved; every chargeback leaves a hold and a
// critical flag for a human to clear.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::compliance::{RiskFlag, RiskSignal, SignalKind};
use crate::error::{LedgerError, LedgerResult, Severity};
use crate::ledger::{LedgerCore, Transaction, TxMetadata, TxStatus, TxType};
use crate::wagers::{Dispute, DisputeReason, Wager, WagerStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargebackOutcome {
    pub chargeback: Transaction,
    /// Wagers frozen because their funding traces to the reversed deposit
    pub frozen_wagers: Vec<String>,
    pub disputes: Vec<Dispute>,
    pub flag: RiskFlag,
}

#[derive(Clone)]
pub struct ChargebackDesk {
    ledger: LedgerCore,
}

impl ChargebackDesk {
    pub fn new(ledger: LedgerCore) -> Self {
        Self { ledger }
    }

    /// Reverse a completed deposit, freeze the wagers it may have funded and
    /// put the wallet on hold. The balance may go negative.
    pub fn handle_chargeback(&self, deposit_id: &str) -> LedgerResult<ChargebackOutcome> {
        let wallet_id = self.ledger.store().wallet_of_transaction(deposit_id)?;

        let result = self.ledger.atomically(&wallet_id, None, |unit| {
            let deposit = unit
                .transaction(deposit_id)
                .ok_or_else(|| LedgerError::TransactionNotFound(deposit_id.to_string()))?;
            if deposit.tx_type != TxType::Deposit || deposit.status != TxStatus::Completed {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "only completed deposits can be charged back; {} is a {} {}",
                    deposit_id,
                    deposit.status.as_str(),
                    deposit.tx_type.as_str()
                )));
            }
            let already_reversed = unit.journal().any(|tx| {
                tx.tx_type == TxType::Chargeback && tx.metadata.reverses_transaction_id.as_deref() == Some(deposit_id)
            });
            if already_reversed {
                return Err(LedgerError::InvalidStateTransition(format!(
                    "deposit {} was already charged back",
                    deposit_id
                )));
            }

            let metadata = TxMetadata {
                reverses_transaction_id: Some(deposit_id.to_string()),
                ..Default::default()
            };
            let chargeback = unit.post(
                TxType::Chargeback,
                deposit.amount,
                TxStatus::Completed,
                metadata,
                deposit.external_ref.clone(),
            )?;

            // Any wager still open and placed after the deposit landed may be spending it
            let funded_from = deposit.processed_at.unwrap_or(deposit.created_at);
            let suspects: Vec<Wager> = unit
                .record()
                .wagers
                .values()
                .filter(|w| w.status == WagerStatus::Active && w.created_at >= funded_from)
                .cloned()
                .collect();

            let now = unit.now();
            let mut disputes = Vec::with_capacity(suspects.len());
            for mut wager in suspects {
                let dispute = Dispute::open(
                    &wager,
                    DisputeReason::Chargeback { transaction_id: chargeback.id.clone() },
                    now,
                );
                wager.status = WagerStatus::Disputed;
                unit.put_wager(wager);
                unit.put_dispute(dispute.clone());
                disputes.push(dispute);
            }

            unit.compliance_mut().chargeback_hold = true;

            let signal = RiskSignal {
                kind: SignalKind::Chargeback,
                reason: format!("deposit {} of {} charged back", deposit_id, deposit.amount),
                severity: Severity::Critical,
            };
            let flag = RiskFlag::from_signal(&unit.wallet().user_id, &wallet_id, signal, now)
                .with_transaction(&chargeback.id);
            unit.raise_flag(flag.clone())?;

            Ok(ChargebackOutcome {
                chargeback,
                frozen_wagers: disputes.iter().map(|d| d.wager_id.clone()).collect(),
                disputes,
                flag,
            })
        });

        match result {
            Ok(outcome) => {
                error!(
                    deposit = deposit_id,
                    wallet = %wallet_id,
                    amount = %outcome.chargeback.amount,
                    frozen = outcome.frozen_wagers.len(),
                    "🚨 chargeback recorded, manual review required"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(deposit = deposit_id, error = %e, "⛔ chargeback rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::compliance::ComplianceGate;
    use crate::config::RiskConfig;
    use crate::store::Store;
    use crate::wagers::{CreateWager, Resolution, WagerManager, WagerOutcome};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Harness {
        ledger: LedgerCore,
        wagers: WagerManager,
        desk: ChargebackDesk,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Store::new(std::time::Duration::from_millis(200)));
        let ledger = LedgerCore::new(store, clock.clone());
        let wagers = WagerManager::new(ledger.clone(), Arc::new(ComplianceGate::new(RiskConfig::default())));
        Harness { desk: ChargebackDesk::new(ledger.clone()), ledger, wagers, clock }
    }

    fn stake(h: &Harness, amount: rust_decimal::Decimal) -> Wager {
        h.wagers
            .create_wager(CreateWager {
                user_id: "mallory".into(),
                game_id: "g1".into(),
                amount,
                potential_win: amount * dec!(2),
                gameplay: false,
                metadata: Default::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_chargeback_freezes_funded_wagers() {
        let h = harness();
        let wallet = h.ledger.get_or_create_wallet("mallory").unwrap();
        let early = h
            .ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(50), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();
        h.clock.advance(Duration::minutes(1));
        let before_deposit = stake(&h, dec!(20));
        h.clock.advance(Duration::minutes(1));
        let deposit = h
            .ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(100), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();
        h.clock.advance(Duration::minutes(1));
        let after_deposit = stake(&h, dec!(60));

        let outcome = h.desk.handle_chargeback(&deposit.id).unwrap();
        assert_eq!(outcome.frozen_wagers, vec![after_deposit.id.clone()]);
        assert_eq!(outcome.flag.severity, Severity::Critical);

        // 50 + 100 - 20 - 60 - 100
        assert_eq!(h.ledger.get_wallet("mallory").unwrap().balance, dec!(-30));
        assert_eq!(h.wagers.get_wager(&before_deposit.id).unwrap().status, WagerStatus::Active);
        assert_eq!(h.wagers.get_wager(&after_deposit.id).unwrap().status, WagerStatus::Disputed);

        let blocked = h.wagers.complete_wager(&after_deposit.id, WagerOutcome::Lost);
        assert!(matches!(blocked, Err(LedgerError::ChargebackPendingReview(_))));
        assert!(matches!(
            h.wagers.cancel_wager(&after_deposit.id),
            Err(LedgerError::ChargebackPendingReview(_))
        ));

        // A second chargeback of the same deposit, or of a non-deposit, is refused
        assert!(matches!(
            h.desk.handle_chargeback(&deposit.id),
            Err(LedgerError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            h.desk.handle_chargeback(&outcome.chargeback.id),
            Err(LedgerError::InvalidStateTransition(_))
        ));
        assert!(h.desk.handle_chargeback(&early.id).is_ok());
    }

    #[test]
    fn test_frozen_stake_released_on_resolution() {
        let h = harness();
        let wallet = h.ledger.get_or_create_wallet("mallory").unwrap();
        let deposit = h
            .ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(100), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();
        let wager = stake(&h, dec!(40));

        let outcome = h.desk.handle_chargeback(&deposit.id).unwrap();
        let dispute = &outcome.disputes[0];
        assert!(dispute.stake_in_escrow);

        let escrow = h.ledger.store().escrow_cell(&wager.escrow_account);
        assert_eq!(escrow.lock().account.balance, dec!(40));
        assert_eq!(escrow.lock().account.open_stakes, dec!(40));

        h.wagers.resolve_dispute(&dispute.id, Resolution::Denied).unwrap();
        assert_eq!(escrow.lock().account.balance, dec!(0));
        assert_eq!(h.wagers.get_wager(&wager.id).unwrap().status, WagerStatus::Resolved);
        assert_eq!(escrow.lock().account.open_stakes, dec!(0));
    }

    #[test]
    fn test_chargeback_rolls_back_without_flag_queue() {
        let h = harness();
        let wallet = h.ledger.get_or_create_wallet("mallory").unwrap();
        let deposit = h
            .ledger
            .record_transaction(&wallet.id, TxType::Deposit, dec!(100), TxStatus::Completed, TxMetadata::default(), None)
            .unwrap();

        let queue = h.ledger.store().lock_flags().unwrap();
        assert!(matches!(h.desk.handle_chargeback(&deposit.id), Err(LedgerError::LockTimeout(_))));
        drop(queue);
        assert_eq!(h.ledger.get_wallet("mallory").unwrap().balance, dec!(100));

        // Nothing was half-applied, so the retry is not seen as a second reversal
        let outcome = h.desk.handle_chargeback(&deposit.id).unwrap();
        let flags = h.ledger.store().lock_flags().unwrap().clone();
        assert_eq!(flags, vec![outcome.flag]);
    }
}
