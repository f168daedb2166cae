//! `WageringService`: the one place where the ledger's components are wired
//! together. Everything is constructed from explicit configuration and a
//! shared storage handle; nothing is a global.

use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::audit::{ChargebackDesk, ChargebackOutcome, ReconciliationReport, Reconciler};
use crate::clock::{Clock, SystemClock};
use crate::compliance::{ComplianceDesk, ComplianceGate, ComplianceKind, Decision, GateFacts};
use crate::config::{LedgerConfig, RatesConfig};
use crate::error::{ensure_positive, LedgerError, LedgerResult};
use crate::escrow::{EscrowReference, EscrowService, EscrowTransaction};
use crate::ledger::{LedgerCore, Transaction, TransactionFilter, TxMetadata, TxStatus, TxType, Wallet};
use crate::rates::{Currency, ExchangeRateCache, HttpRateProvider, RateProvider, StaticRateProvider};
use crate::store::{Store, StoreSnapshot};
use crate::wagers::{CreateWager, Dispute, Resolution, Wager, WagerManager, WagerOutcome, WagerStats};

#[derive(Clone)]
pub struct WageringService {
    config: Arc<LedgerConfig>,
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    gate: Arc<ComplianceGate>,
    pub ledger: LedgerCore,
    pub escrow: EscrowService,
    pub compliance: ComplianceDesk,
    pub wagers: WagerManager,
    pub reconciler: Reconciler,
    pub chargebacks: ChargebackDesk,
    pub rates: ExchangeRateCache,
}

impl WageringService {
    pub fn new(config: LedgerConfig, store: Arc<Store>, clock: Arc<dyn Clock>, provider: Arc<dyn RateProvider>) -> Self {
        let gate = Arc::new(ComplianceGate::new(config.risk.clone()));
        let ledger = LedgerCore::new(store.clone(), clock.clone());
        let rates = ExchangeRateCache::new(
            config.base_currency,
            provider,
            config.rates.ttl,
            config.rates.fetch_timeout,
        );

        Self {
            escrow: EscrowService::new(store.clone(), clock.clone()),
            compliance: ComplianceDesk::new(ledger.clone(), gate.clone()),
            wagers: WagerManager::new(ledger.clone(), gate.clone()),
            reconciler: Reconciler::new(store.clone(), clock.clone(), config.audit.clone()),
            chargebacks: ChargebackDesk::new(ledger.clone()),
            rates,
            ledger,
            gate,
            store,
            clock,
            config: Arc::new(config),
        }
    }

    /// Wall clock, configured rate provider, and the snapshot at
    /// `server.snapshot_path` if one exists
    pub fn from_config(config: LedgerConfig) -> LedgerResult<Self> {
        let store = match &config.server.snapshot_path {
            Some(path) if Path::new(path).exists() => {
                let store = load_snapshot(path, config.lock_timeout)?;
                info!(path = %path, "📂 ledger snapshot loaded");
                store
            }
            Some(path) => {
                info!(path = %path, "ℹ️ no snapshot found, starting fresh");
                Store::new(config.lock_timeout)
            }
            None => Store::new(config.lock_timeout),
        };
        let provider = rate_provider(&config.rates);
        Ok(Self::new(config, Arc::new(store), Arc::new(SystemClock), provider))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ========================================================================
    // WALLETS & JOURNAL
    // ========================================================================

    pub fn get_or_create_wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        self.ledger.get_or_create_wallet(user_id)
    }

    pub fn get_wallet(&self, user_id: &str) -> LedgerResult<Wallet> {
        self.ledger.get_wallet(user_id)
    }

    pub fn record_transaction(
        &self,
        wallet_id: &str,
        tx_type: TxType,
        amount: Decimal,
        status: TxStatus,
        metadata: TxMetadata,
        external_ref: Option<String>,
    ) -> LedgerResult<Transaction> {
        self.ledger.record_transaction(wallet_id, tx_type, amount, status, metadata, external_ref)
    }

    pub fn settle_transaction(&self, tx_id: &str, status: TxStatus) -> LedgerResult<Transaction> {
        self.ledger.settle_transaction(tx_id, status)
    }

    pub fn get_transaction(&self, tx_id: &str) -> LedgerResult<Transaction> {
        self.ledger.get_transaction(tx_id)
    }

    pub fn get_transaction_history(&self, filter: &TransactionFilter) -> LedgerResult<Vec<Transaction>> {
        self.ledger.get_transaction_history(filter)
    }

    // ========================================================================
    // CASHIER
    // ========================================================================

    /// Gate a deposit and journal it as pending until the payment rail
    /// confirms it. Foreign amounts are converted to the base currency first.
    pub async fn request_deposit(
        &self,
        user_id: &str,
        amount: Decimal,
        currency: Currency,
        external_ref: Option<String>,
    ) -> LedgerResult<Transaction> {
        ensure_positive(amount)?;
        let mut metadata = TxMetadata::default();
        let base_amount = if currency == self.config.base_currency {
            amount
        } else {
            metadata.original_currency = Some(currency);
            metadata.original_amount = Some(amount);
            self.rates.convert_to_base(amount, currency).await?
        };
        ensure_positive(base_amount)?;

        // The gate and journal write take row locks; keep them off the async workers
        let svc = self.clone();
        let user = user_id.to_string();
        let result = tokio::task::spawn_blocking(move || {
            svc.gated_pending(&user, TxType::Deposit, base_amount, ComplianceKind::Deposit, metadata, external_ref)
        })
        .await
        .unwrap_or_else(|e| Err(LedgerError::Storage(format!("deposit task failed: {}", e))));
        match &result {
            Ok(tx) => info!(user = user_id, tx = %tx.id, amount = %base_amount, currency = %currency, "💰 deposit requested"),
            Err(e) => warn!(user = user_id, amount = %amount, currency = %currency, error = %e, "⛔ deposit rejected"),
        }
        result
    }

    /// Gate a withdrawal and hold the funds until the payment rail settles it
    pub fn request_withdrawal(&self, user_id: &str, amount: Decimal, external_ref: Option<String>) -> LedgerResult<Transaction> {
        ensure_positive(amount)?;
        let result = self.gated_pending(
            user_id,
            TxType::Withdrawal,
            amount,
            ComplianceKind::Withdrawal,
            TxMetadata::default(),
            external_ref,
        );
        match &result {
            Ok(tx) => info!(user = user_id, tx = %tx.id, amount = %amount, "🏧 withdrawal requested"),
            Err(e) => warn!(user = user_id, amount = %amount, error = %e, "⛔ withdrawal rejected"),
        }
        result
    }

    fn gated_pending(
        &self,
        user_id: &str,
        tx_type: TxType,
        amount: Decimal,
        kind: ComplianceKind,
        metadata: TxMetadata,
        external_ref: Option<String>,
    ) -> LedgerResult<Transaction> {
        let wallet = self.ledger.get_or_create_wallet(user_id)?;
        let gate = &self.gate;
        self.ledger.atomically(&wallet.id, None, |unit| {
            let now = unit.now();
            let decision = {
                let facts = GateFacts::gather(unit.record(), Decimal::ZERO, now);
                gate.evaluate(&facts, amount, &kind, now)
            };
            decision.into_result()?;
            unit.post(tx_type, amount, TxStatus::Pending, metadata, external_ref)
        })
    }

    // ========================================================================
    // WAGERS
    // ========================================================================

    pub fn create_wager(&self, request: CreateWager) -> LedgerResult<Wager> {
        self.wagers.create_wager(request)
    }

    pub fn complete_wager(&self, wager_id: &str, outcome: WagerOutcome) -> LedgerResult<Wager> {
        self.wagers.complete_wager(wager_id, outcome)
    }

    pub fn cancel_wager(&self, wager_id: &str) -> LedgerResult<Wager> {
        self.wagers.cancel_wager(wager_id)
    }

    pub fn create_dispute(&self, wager_id: &str, note: &str) -> LedgerResult<Dispute> {
        self.wagers.create_dispute(wager_id, note)
    }

    pub fn resolve_dispute(&self, dispute_id: &str, resolution: Resolution) -> LedgerResult<Dispute> {
        self.wagers.resolve_dispute(dispute_id, resolution)
    }

    pub fn get_wager_stats(&self, user_id: &str) -> LedgerResult<WagerStats> {
        self.wagers.get_wager_stats(user_id)
    }

    // ========================================================================
    // COMPLIANCE, ESCROW, AUDIT
    // ========================================================================

    pub fn evaluate_compliance(&self, user_id: &str, amount: Decimal, kind: &ComplianceKind) -> LedgerResult<Decision> {
        self.compliance.evaluate_compliance(user_id, amount, kind)
    }

    pub fn add_to_escrow(
        &self,
        account_id: &str,
        amount: Decimal,
        reference: Option<EscrowReference>,
    ) -> LedgerResult<EscrowTransaction> {
        self.escrow.add_to_escrow(account_id, amount, reference)
    }

    pub fn remove_from_escrow(
        &self,
        account_id: &str,
        amount: Decimal,
        reference: Option<EscrowReference>,
    ) -> LedgerResult<EscrowTransaction> {
        self.escrow.remove_from_escrow(account_id, amount, reference)
    }

    pub fn get_escrow_balance(&self, account_id: &str) -> LedgerResult<Decimal> {
        self.escrow.get_escrow_balance(account_id)
    }

    pub fn reconcile(&self) -> ReconciliationReport {
        self.reconciler.reconcile()
    }

    pub fn handle_chargeback(&self, transaction_id: &str) -> LedgerResult<ChargebackOutcome> {
        self.chargebacks.handle_chargeback(transaction_id)
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn snapshot(&self) -> LedgerResult<StoreSnapshot> {
        self.store.snapshot(self.clock.now())
    }

    /// Write the whole store as JSON
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> LedgerResult<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot()?;
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| LedgerError::Storage(format!("failed to serialize snapshot: {}", e)))?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| LedgerError::Storage(format!("failed to create {}: {}", dir.display(), e)))?;
        }
        std::fs::write(path, json)
            .map_err(|e| LedgerError::Storage(format!("failed to write {}: {}", path.display(), e)))?;

        info!(
            path = %path.display(),
            wallets = snapshot.wallets.len(),
            escrow_accounts = snapshot.escrow.len(),
            "💾 ledger snapshot saved"
        );
        Ok(())
    }
}

pub fn load_snapshot(path: impl AsRef<Path>, lock_timeout: std::time::Duration) -> LedgerResult<Store> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path)
        .map_err(|e| LedgerError::Storage(format!("failed to read {}: {}", path.display(), e)))?;
    let snapshot: StoreSnapshot = serde_json::from_str(&json)
        .map_err(|e| LedgerError::Storage(format!("failed to parse {}: {}", path.display(), e)))?;
    Ok(Store::from_snapshot(snapshot, lock_timeout))
}

/// HTTP provider when a URL is configured, otherwise the static table
pub fn rate_provider(config: &RatesConfig) -> Arc<dyn RateProvider> {
    match &config.url {
        Some(url) => Arc::new(HttpRateProvider::new(url.clone(), config.fetch_timeout)),
        None => {
            if config.static_rates.is_empty() {
                warn!("⚠️ no exchange-rate source configured; only base-currency deposits will succeed");
            }
            Arc::new(StaticRateProvider::new(config.static_rates.clone()))
        }
    }
}
