/// Exchange-rate provider clients
///
/// `HttpRateProvider` pulls quotes from a remote endpoint; `StaticRateProvider`
/// serves a fixed table from configuration for local development.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Currency;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateError {
    /// HTTP request failed
    RequestFailed(String),
    /// Provider answered with something we cannot use
    InvalidResponse(String),
    /// Provider has no quote for the currency
    Missing(Currency),
}

impl std::fmt::Display for RateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateError::RequestFailed(msg) => write!(f, "rate request failed: {}", msg),
            RateError::InvalidResponse(msg) => write!(f, "invalid rate response: {}", msg),
            RateError::Missing(currency) => write!(f, "no rate for {}", currency),
        }
    }
}

impl std::error::Error for RateError {}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// Source of exchange rates. Returned rates are the value of one unit of each
/// currency expressed in `base`.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rates(&self, base: Currency) -> Result<HashMap<Currency, Decimal>, RateError>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// STATIC PROVIDER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct StaticRateProvider {
    rates: HashMap<Currency, Decimal>,
}

impl StaticRateProvider {
    pub fn new(rates: HashMap<Currency, Decimal>) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn fetch_rates(&self, _base: Currency) -> Result<HashMap<Currency, Decimal>, RateError> {
        Ok(self.rates.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

// ============================================================================
// HTTP PROVIDER
// ============================================================================

/// Response shape: quotes are units of each currency per one unit of `base`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesResponse {
    pub base: String,
    pub rates: HashMap<String, Decimal>,
}

pub struct HttpRateProvider {
    endpoint_url: String,
    client: Client,
}

impl HttpRateProvider {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        let endpoint_url = endpoint_url.into();
        info!(url = %endpoint_url, "💱 exchange-rate provider configured");
        Self { endpoint_url, client }
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rates(&self, base: Currency) -> Result<HashMap<Currency, Decimal>, RateError> {
        let response = self
            .client
            .get(&self.endpoint_url)
            .query(&[("base", base.code())])
            .send()
            .await
            .map_err(|e| RateError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RateError::RequestFailed(format!("provider returned status {}", response.status())));
        }

        let body: RatesResponse = response
            .json()
            .await
            .map_err(|e| RateError::InvalidResponse(e.to_string()))?;

        if !body.base.eq_ignore_ascii_case(base.code()) {
            return Err(RateError::InvalidResponse(format!(
                "asked for base {}, got {}",
                base.code(),
                body.base
            )));
        }

        Ok(invert_quotes(&body.rates))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Turn "units per base" quotes into "base per unit" rates, skipping
/// currencies we do not support and non-positive quotes.
pub(crate) fn invert_quotes(quotes: &HashMap<String, Decimal>) -> HashMap<Currency, Decimal> {
    let mut rates = HashMap::new();
    for (code, quote) in quotes {
        let Ok(currency) = code.parse::<Currency>() else {
            debug!(code = %code, "skipping unsupported currency quote");
            continue;
        };
        if *quote <= Decimal::ZERO {
            warn!(code = %code, quote = %quote, "⚠️ ignoring non-positive exchange rate quote");
            continue;
        }
        rates.insert(currency, Decimal::ONE / *quote);
    }
    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_invert_quotes() {
        let mut quotes = HashMap::new();
        quotes.insert("EUR".to_string(), dec!(0.8));
        quotes.insert("JPY".to_string(), dec!(150));
        quotes.insert("GBP".to_string(), dec!(0));

        let rates = invert_quotes(&quotes);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[&Currency::Eur], dec!(1.25));
    }

    #[test]
    fn test_response_accepts_strings_and_integers() {
        let body: RatesResponse = serde_json::from_str(r#"{"base":"USD","rates":{"EUR":"0.8","CAD":2}}"#).unwrap();
        assert_eq!(body.rates["EUR"], dec!(0.8));
        assert_eq!(body.rates["CAD"], dec!(2));
    }
}
