use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PriceProvider;
use crate::domain::{Price, FULL_HOUR_SAMPLES};
use crate::error::{ControlError, ControlResult};

const SERVICE: &str = "price provider";

/// JSON price API client.
///
/// Expects `GET {base}/prices/current`, `GET {base}/prices/future` and
/// `GET {base}/prices?start=..&end=..` returning [`RawPrice`] documents.
#[derive(Clone)]
pub struct HttpPriceProvider {
    base_url: String,
    client: ClientWithMiddleware,
}

impl HttpPriceProvider {
    pub fn new(base_url: impl Into<String>, timeout: StdDuration, max_retries: u32) -> ControlResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("energy-arbitrage-controller/0.3"),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ControlError::ConfigInvalid(format!("price HTTP client: {e}")))?;
        let policy = ExponentialBackoff::builder()
            .retry_bounds(StdDuration::from_millis(100), StdDuration::from_secs(5))
            .build_with_max_retries(max_retries);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(policy))
            .build();
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ControlResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "price GET");
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| ControlError::transient(SERVICE, e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ControlError::transient(SERVICE, format!("reading body: {e}")))?;

        if !status.is_success() {
            warn!(%url, %status, "price API error");
            let message = format!("HTTP {status}: {body}");
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                ControlError::transient(SERVICE, message)
            } else {
                ControlError::upstream(SERVICE, message)
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| ControlError::upstream(SERVICE, format!("price JSON parse failed: {e}")))
    }
}

#[async_trait]
impl PriceProvider for HttpPriceProvider {
    async fn current_price(&self) -> ControlResult<Price> {
        let raw: RawPrice = self.get_json("/prices/current", &[]).await?;
        Ok(raw.into())
    }

    async fn future_prices(&self) -> ControlResult<Vec<Price>> {
        let raw: Vec<RawPrice> = self.get_json("/prices/future", &[]).await?;
        Ok(raw.into_iter().map(Price::from).collect())
    }

    async fn confirmed_prices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<Vec<Price>> {
        let query = [
            ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];
        let raw: Vec<RawPrice> = self.get_json("/prices", &query).await?;
        Ok(raw
            .into_iter()
            .map(Price::from)
            .filter(|p| p.is_confirmed())
            .collect())
    }
}

/// Wire format of one hourly price.
#[derive(Debug, Deserialize)]
pub struct RawPrice {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub dollars_per_kwh: f64,
    /// Extra per-kWh components (delivery, taxes).
    #[serde(default)]
    pub fees: Vec<RawFee>,
    #[serde(default)]
    pub samples: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RawFee {
    pub name: String,
    pub dollars_per_kwh: f64,
}

impl From<RawPrice> for Price {
    fn from(raw: RawPrice) -> Self {
        Price {
            ts_start: raw.start,
            ts_end: raw.end,
            dollars_per_kwh: raw.dollars_per_kwh,
            grid_addl_dollars_per_kwh: raw.fees.iter().map(|f| f.dollars_per_kwh).sum(),
            sample_count: raw.samples.unwrap_or(FULL_HOUR_SAMPLES),
        }
    }
}
