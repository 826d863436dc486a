use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;

use crate::factors::PowerVariable;

pub const POWER_BASE_URL: &str = "https://power.larc.nasa.gov/api/temporal/daily/point";

const POWER_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("GET failed after {attempts} attempts for URL: {url} :: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        url: String,
        last_error: String,
    },
    #[error("unexpected POWER payload: {0}")]
    Decode(String),
}

/// One day of raw provider data. Ephemeral: lives only for the duration of a
/// single analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyObservation {
    pub date: NaiveDate,
    /// Window year this row belongs to. The client tags rows with the calendar
    /// year; the window fetcher re-tags them with the requested year, which
    /// differs for rows that cross a year boundary.
    pub year: i32,
    pub values: BTreeMap<PowerVariable, Option<f64>>,
}

impl DailyObservation {
    pub fn value(&self, variable: PowerVariable) -> Option<f64> {
        self.values.get(&variable).copied().flatten()
    }
}

#[async_trait]
pub trait DailyPointSource: Send + Sync {
    async fn fetch_day_range(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
        variables: &[PowerVariable],
    ) -> Result<Vec<DailyObservation>, UpstreamError>;
}

/// Per-client retry schedule for upstream calls. The delay before retry `k`
/// (0-based) is `base_delay * multiplier^k`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1600),
            multiplier: 1.6,
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let factor = self.multiplier.powi(failed_attempts as i32);
        self.base_delay.mul_f64(factor.max(0.0))
    }
}

#[derive(Debug, Deserialize)]
struct PowerResponse {
    properties: PowerProperties,
}

#[derive(Debug, Deserialize)]
struct PowerProperties {
    #[serde(default)]
    parameter: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

/// Client for the POWER daily point endpoint. One outbound GET per attempt,
/// no caching, no circuit breaker.
pub struct PowerClient {
    http: reqwest::Client,
    base_url: String,
    community: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl PowerClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        community: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            community: community.into(),
            timeout,
            retry,
        }
    }

    fn build_url(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
        variables: &[PowerVariable],
    ) -> String {
        let parameters = variables
            .iter()
            .map(|var| var.api_name())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{base}?parameters={parameters}&community={community}&latitude={latitude}&longitude={longitude}&start={start}&end={end}&format=JSON",
            base = self.base_url,
            community = self.community,
            start = start.format(POWER_DATE_FORMAT),
            end = end.format(POWER_DATE_FORMAT),
        )
    }

    async fn get_json(&self, url: &str) -> Result<PowerResponse, UpstreamError> {
        let mut last_error = String::new();
        for attempt in 0..self.retry.attempts {
            match self.try_get(url).await {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    tracing::warn!(attempt = attempt + 1, error = %err, "POWER request failed");
                    last_error = err;
                    if attempt + 1 < self.retry.attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
            }
        }
        Err(UpstreamError::RetriesExhausted {
            attempts: self.retry.attempts,
            url: url.to_string(),
            last_error,
        })
    }

    async fn try_get(&self, url: &str) -> Result<PowerResponse, String> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("POWER HTTP {status}: {body}"));
        }

        response
            .json::<PowerResponse>()
            .await
            .map_err(|err| format!("failed to decode POWER response: {err}"))
    }
}

#[async_trait]
impl DailyPointSource for PowerClient {
    async fn fetch_day_range(
        &self,
        latitude: f64,
        longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
        variables: &[PowerVariable],
    ) -> Result<Vec<DailyObservation>, UpstreamError> {
        let url = self.build_url(latitude, longitude, start, end, variables);
        let payload = self.get_json(&url).await?;
        decode_rows(payload, variables)
    }
}

/// Flattens `properties.parameter.<VAR>.<YYYYMMDD>` into one row per date.
///
/// The date index is taken from the first requested variable present in the
/// payload; the other variables are trusted to share its key set and fill
/// `None` where they do not (inherited upstream behavior). Variables the
/// payload carries but the caller did not request are dropped.
fn decode_rows(
    payload: PowerResponse,
    variables: &[PowerVariable],
) -> Result<Vec<DailyObservation>, UpstreamError> {
    let parameter = payload.properties.parameter;
    let Some(index_series) = variables
        .iter()
        .find_map(|var| parameter.get(var.api_name()))
    else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::with_capacity(index_series.len());
    for date_key in index_series.keys() {
        let date = NaiveDate::parse_from_str(date_key, POWER_DATE_FORMAT).map_err(|_| {
            UpstreamError::Decode(format!("bad date key {date_key:?} in POWER payload"))
        })?;
        let mut values = BTreeMap::new();
        for var in variables {
            let value = parameter
                .get(var.api_name())
                .and_then(|series| series.get(date_key).copied())
                .flatten();
            values.insert(*var, value);
        }
        rows.push(DailyObservation {
            date,
            year: date.year(),
            values,
        });
    }
    rows.sort_by_key(|row| row.date);
    Ok(rows)
}
