//! Currencies and the exchange-rate cache.
//!
//! Ledger amounts are kept in one base currency. Deposits in other currencies
//! are converted through `ExchangeRateCache`, which serves cached rates and
//! refreshes stale ones in the background instead of blocking the request.

pub mod client;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{checked_product, LedgerError, LedgerResult};

pub use client::{HttpRateProvider, RateError, RateProvider, StaticRateProvider};

// ============================================================================
// CURRENCY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

impl Currency {
    pub const ALL: [Currency; 5] = [Currency::Usd, Currency::Eur, Currency::Gbp, Currency::Cad, Currency::Aud];

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| LedgerError::UnsupportedCurrency(code.to_string()))
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Cached rate as exposed to operators
#[derive(Debug, Clone, Serialize)]
pub struct RateQuote {
    pub currency: Currency,
    pub rate: Decimal,
    pub age_secs: u64,
    pub stale: bool,
}

/// Stale-while-revalidate cache over a `RateProvider`
#[derive(Clone)]
pub struct ExchangeRateCache {
    base: Currency,
    provider: Arc<dyn RateProvider>,
    ttl: Duration,
    fetch_timeout: Duration,
    entries: Arc<RwLock<HashMap<Currency, CachedRate>>>,
    refreshing: Arc<AtomicBool>,
}

impl ExchangeRateCache {
    pub fn new(base: Currency, provider: Arc<dyn RateProvider>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            base,
            provider,
            ttl,
            fetch_timeout,
            entries: Arc::new(RwLock::new(HashMap::new())),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn base(&self) -> Currency {
        self.base
    }

    /// Value of one unit of `currency` in the base currency.
    ///
    /// Fresh entries are returned as is. A stale entry is still returned, and a
    /// single background refresh is kicked off. A missing entry is fetched
    /// inline, bounded by the fetch timeout.
    pub async fn rate(&self, currency: Currency) -> LedgerResult<Decimal> {
        if currency == self.base {
            return Ok(Decimal::ONE);
        }

        let cached = self.entries.read().get(&currency).copied();
        if let Some(entry) = cached {
            if entry.fetched_at.elapsed() >= self.ttl {
                self.spawn_refresh();
            }
            return Ok(entry.rate);
        }

        match tokio::time::timeout(self.fetch_timeout, self.refresh()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(currency = %currency, error = %e, "⚠️ exchange rate fetch failed"),
            Err(_) => warn!(currency = %currency, "⏳ exchange rate fetch timed out"),
        }
        self.entries
            .read()
            .get(&currency)
            .map(|entry| entry.rate)
            .ok_or_else(|| LedgerError::ExchangeRateUnavailable(currency.code().to_string()))
    }

    /// Convert into the base currency, rounded to cents
    pub async fn convert_to_base(&self, amount: Decimal, currency: Currency) -> LedgerResult<Decimal> {
        let rate = self.rate(currency).await?;
        Ok(checked_product(amount, rate)?.round_dp(2))
    }

    /// Pull every rate from the provider; returns how many were stored
    pub async fn refresh(&self) -> Result<usize, RateError> {
        let rates = self.provider.fetch_rates(self.base).await?;
        let now = Instant::now();
        let mut entries = self.entries.write();
        for (currency, rate) in &rates {
            if *currency != self.base && *rate > Decimal::ZERO {
                entries.insert(*currency, CachedRate { rate: *rate, fetched_at: now });
            }
        }
        info!(provider = self.provider.name(), count = rates.len(), "💱 exchange rates refreshed");
        Ok(rates.len())
    }

    /// At most one refresh in flight
    fn spawn_refresh(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        let cache = self.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(cache.fetch_timeout, cache.refresh()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "⚠️ background rate refresh failed, serving stale rates"),
                Err(_) => warn!("⏳ background rate refresh timed out, serving stale rates"),
            }
            cache.refreshing.store(false, Ordering::SeqCst);
        });
    }

    pub fn quotes(&self) -> Vec<RateQuote> {
        let mut quotes: Vec<RateQuote> = self
            .entries
            .read()
            .iter()
            .map(|(currency, entry)| RateQuote {
                currency: *currency,
                rate: entry.rate,
                age_secs: entry.fetched_at.elapsed().as_secs(),
                stale: entry.fetched_at.elapsed() >= self.ttl,
            })
            .collect();
        quotes.sort_by_key(|q| q.currency);
        quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        calls: AtomicUsize,
        rate: Decimal,
        fail: bool,
    }

    #[async_trait]
    impl RateProvider for CountingProvider {
        async fn fetch_rates(&self, _base: Currency) -> Result<HashMap<Currency, Decimal>, RateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RateError::RequestFailed("provider down".into()));
            }
            Ok(HashMap::from([(Currency::Eur, self.rate)]))
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn provider(rate: Decimal, fail: bool) -> Arc<CountingProvider> {
        Arc::new(CountingProvider { calls: AtomicUsize::new(0), rate, fail })
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("eur".parse::<Currency>().unwrap(), Currency::Eur);
        assert_eq!(" GBP ".parse::<Currency>().unwrap(), Currency::Gbp);
        assert_eq!("XYZ".parse::<Currency>(), Err(LedgerError::UnsupportedCurrency("XYZ".into())));
        assert_eq!(serde_json::to_string(&Currency::Cad).unwrap(), "\"CAD\"");
    }

    #[tokio::test]
    async fn test_fresh_rate_cached() {
        let p = provider(dec!(1.08), false);
        let cache = ExchangeRateCache::new(Currency::Usd, p.clone(), Duration::from_secs(3600), Duration::from_secs(1));

        assert_eq!(cache.convert_to_base(dec!(100), Currency::Eur).await.unwrap(), dec!(108.00));
        assert_eq!(cache.rate(Currency::Eur).await.unwrap(), dec!(1.08));
        assert_eq!(cache.rate(Currency::Usd).await.unwrap(), Decimal::ONE);
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_rate_served_while_refreshing() {
        let p = provider(dec!(1.10), false);
        let cache = ExchangeRateCache::new(Currency::Usd, p.clone(), Duration::ZERO, Duration::from_secs(1));
        cache.refresh().await.unwrap();

        // Always stale with a zero ttl, but never blocks or fails
        assert_eq!(cache.rate(Currency::Eur).await.unwrap(), dec!(1.10));
        tokio::task::yield_now().await;
        assert!(cache.quotes()[0].stale);
    }

    #[tokio::test]
    async fn test_conversion_out_of_range() {
        let p = provider(dec!(1.08), false);
        let cache = ExchangeRateCache::new(Currency::Usd, p, Duration::from_secs(3600), Duration::from_secs(1));
        assert!(matches!(
            cache.convert_to_base(Decimal::MAX, Currency::Eur).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(cache.convert_to_base(Decimal::MAX, Currency::Usd).await.unwrap(), Decimal::MAX.round_dp(2));
    }

    #[tokio::test]
    async fn test_missing_rate_unavailable() {
        let p = provider(dec!(1.10), true);
        let cache = ExchangeRateCache::new(Currency::Usd, p, Duration::from_secs(3600), Duration::from_millis(200));
        assert_eq!(
            cache.rate(Currency::Gbp).await,
            Err(LedgerError::ExchangeRateUnavailable("GBP".into()))
        );
    }
}
