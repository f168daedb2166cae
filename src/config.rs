/// Ledger configuration
///
/// Every section has a `Default` and is overridden field by field from the
/// environment (after `dotenv` has loaded `.env`). Unparseable values are
/// ignored with a warning rather than aborting startup.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::compliance::{HeuristicConfig, PeriodLimits, RiskLimits};
use crate::rates::Currency;

// ============================================================================
// CONSTANTS
// ============================================================================

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:1234";

/// Row lock acquisition timeout
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;

/// Reconciliation ignores differences at or below one cent
pub const DEFAULT_RECONCILIATION_EPSILON: Decimal = dec!(0.01);

pub const DEFAULT_AUDIT_INTERVAL_SECS: u64 = 300;

/// Exchange rates refresh hourly
pub const DEFAULT_RATE_TTL_SECS: u64 = 3_600;

pub const DEFAULT_RATE_FETCH_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// JSON snapshot loaded on startup and written on shutdown
    pub snapshot_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskConfig {
    /// Limits applied to users who have not set their own
    pub default_limits: RiskLimits,
    pub max_game_exposure: Option<Decimal>,
    pub max_user_exposure: Option<Decimal>,
    pub heuristics: HeuristicConfig,
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub interval: Duration,
    pub epsilon: Decimal,
    /// Attempts at a stable cross-account snapshot before giving up
    pub max_snapshot_attempts: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_AUDIT_INTERVAL_SECS),
            epsilon: DEFAULT_RECONCILIATION_EPSILON,
            max_snapshot_attempts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RatesConfig {
    /// Provider endpoint; static table is used when unset
    pub url: Option<String>,
    pub ttl: Duration,
    pub fetch_timeout: Duration,
    pub static_rates: HashMap<Currency, Decimal>,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl: Duration::from_secs(DEFAULT_RATE_TTL_SECS),
            fetch_timeout: Duration::from_millis(DEFAULT_RATE_FETCH_TIMEOUT_MS),
            static_rates: HashMap::new(),
        }
    }
}

// ============================================================================
// LEDGER CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub base_currency: Currency,
    pub lock_timeout: Duration,
    pub server: ServerConfig,
    pub risk: RiskConfig,
    pub audit: AuditConfig,
    pub rates: RatesConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_currency: Currency::Usd,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            server: ServerConfig::default(),
            risk: RiskConfig::default(),
            audit: AuditConfig::default(),
            rates: RatesConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(currency) = env_parse::<Currency>("LEDGER_BASE_CURRENCY") {
            config.base_currency = currency;
        }
        if let Some(ms) = env_parse::<u64>("LEDGER_LOCK_TIMEOUT_MS") {
            config.lock_timeout = Duration::from_millis(ms);
        }

        // Server
        if let Ok(addr) = std::env::var("LEDGER_BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        config.server.snapshot_path = std::env::var("LEDGER_SNAPSHOT_PATH").ok();

        // Risk limits
        let limits = &mut config.risk.default_limits;
        limits.deposit = PeriodLimits {
            daily: env_parse("RISK_DAILY_DEPOSIT_LIMIT"),
            weekly: env_parse("RISK_WEEKLY_DEPOSIT_LIMIT"),
            monthly: env_parse("RISK_MONTHLY_DEPOSIT_LIMIT"),
        };
        limits.loss = PeriodLimits {
            daily: env_parse("RISK_DAILY_LOSS_LIMIT"),
            weekly: env_parse("RISK_WEEKLY_LOSS_LIMIT"),
            monthly: env_parse("RISK_MONTHLY_LOSS_LIMIT"),
        };
        limits.session_minutes = env_parse("RISK_SESSION_LIMIT_MINUTES");
        limits.daily_play_minutes = env_parse("RISK_DAILY_PLAY_LIMIT_MINUTES");
        config.risk.max_game_exposure = env_parse("RISK_MAX_GAME_EXPOSURE");
        config.risk.max_user_exposure = env_parse("RISK_MAX_USER_EXPOSURE");

        let heuristics = &mut config.risk.heuristics;
        if let Some(v) = env_parse("RISK_WIN_RATE_THRESHOLD") {
            heuristics.win_rate_threshold = v;
        }
        if let Some(v) = env_parse("RISK_WIN_RATE_MIN_WAGERS") {
            heuristics.win_rate_min_wagers = v;
        }
        if let Some(v) = env_parse("RISK_MAX_WAGERS_PER_HOUR") {
            heuristics.max_wagers_per_hour = v;
        }
        if let Some(v) = env_parse("RISK_UNIFORMITY_SAMPLE") {
            heuristics.uniformity_sample = v;
        }
        if let Some(v) = env_parse("RISK_UNIFORMITY_CV_THRESHOLD") {
            heuristics.uniformity_cv_threshold = v;
        }

        // Audit
        if let Some(secs) = env_parse::<u64>("AUDIT_INTERVAL_SECS") {
            config.audit.interval = Duration::from_secs(secs);
        }
        if let Some(epsilon) = env_parse("AUDIT_EPSILON") {
            config.audit.epsilon = epsilon;
        }

        // Exchange rates
        config.rates.url = std::env::var("EXCHANGE_RATE_URL").ok();
        if let Some(secs) = env_parse::<u64>("EXCHANGE_RATE_TTL_SECS") {
            config.rates.ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("EXCHANGE_RATE_TIMEOUT_MS") {
            config.rates.fetch_timeout = Duration::from_millis(ms);
        }
        if let Ok(table) = std::env::var("EXCHANGE_RATES_STATIC") {
            config.rates.static_rates = parse_rate_table(&table);
        }

        config
    }
}

/// Parse `EUR=1.08,GBP=1.27` into a rate table, skipping malformed pairs
pub fn parse_rate_table(raw: &str) -> HashMap<Currency, Decimal> {
    let mut table = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((code, rate)) = pair.split_once('=') else {
            warn!(pair, "⚠️ ignoring malformed exchange rate entry");
            continue;
        };
        match (code.trim().parse::<Currency>(), rate.trim().parse::<Decimal>()) {
            (Ok(currency), Ok(rate)) if rate > Decimal::ZERO => {
                table.insert(currency, rate);
            }
            _ => warn!(pair, "⚠️ ignoring invalid exchange rate entry"),
        }
    }
    table
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "⚠️ ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_table() {
        let table = parse_rate_table("EUR=1.08, gbp=1.27,bogus,XYZ=2,CAD=-1");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&Currency::Eur), Some(&dec!(1.08)));
        assert_eq!(table.get(&Currency::Gbp), Some(&dec!(1.27)));
    }

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.base_currency, Currency::Usd);
        assert_eq!(config.audit.epsilon, dec!(0.01));
        assert_eq!(config.rates.ttl, Duration::from_secs(3_600));
        assert!(config.risk.default_limits.deposit.daily.is_none());
    }
}
