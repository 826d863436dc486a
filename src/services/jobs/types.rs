use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::factors::Factor;

pub const MODEL_VERSION: &str = "v1";
pub const DATASET_VERSION: &str = "POWER-2024";

/// Earliest year the POWER archive covers.
pub const POWER_MIN_YEAR: i32 = 1981;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeStatus {
    Running,
    Ok,
    Error,
}

impl AnalyzeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzeStatus::Running => "running",
            AnalyzeStatus::Ok => "ok",
            AnalyzeStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalyzeStatus::Ok | AnalyzeStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AnalyzeRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub month: u32,
    pub day: u32,
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default = "default_half_window_days")]
    pub half_window_days: u32,
    #[serde(default = "default_factors")]
    pub factors: Vec<String>,
}

fn default_half_window_days() -> u32 {
    10
}

fn default_factors() -> Vec<String> {
    ["temperature", "precipitation", "windspeed", "humidity"]
        .iter()
        .map(|factor| factor.to_string())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("latitude must be between -90 and 90")]
    Latitude,
    #[error("longitude must be between -180 and 180")]
    Longitude,
    #[error("month must be between 1 and 12")]
    Month,
    #[error("day must be between 1 and 31")]
    Day,
    #[error("month={month} day={day} is not a calendar date")]
    ImpossibleDate { month: u32, day: u32 },
    #[error("start_year and end_year must be {} or later", POWER_MIN_YEAR)]
    YearTooEarly,
    #[error("end_year must not be before start_year")]
    YearOrder,
    #[error("half_window_days must be between 0 and 30")]
    HalfWindow,
    #[error("factors must not be empty")]
    EmptyFactors,
    #[error("Unsupported factors: {0:?}")]
    UnsupportedFactors(Vec<String>),
}

impl AnalyzeRequest {
    /// Schema-level validation plus factor-name resolution. Runs before any
    /// job row exists; a failure here never touches the store.
    pub fn validate(&self) -> Result<Vec<Factor>, ValidationError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::Latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::Longitude);
        }
        if !(1..=12).contains(&self.month) {
            return Err(ValidationError::Month);
        }
        if !(1..=31).contains(&self.day) {
            return Err(ValidationError::Day);
        }
        // 2000 is a leap year, so Feb 29 passes here and is resolved per year
        // inside the window fetcher.
        if chrono::NaiveDate::from_ymd_opt(2000, self.month, self.day).is_none() {
            return Err(ValidationError::ImpossibleDate {
                month: self.month,
                day: self.day,
            });
        }
        if self.start_year < POWER_MIN_YEAR || self.end_year < POWER_MIN_YEAR {
            return Err(ValidationError::YearTooEarly);
        }
        if self.end_year < self.start_year {
            return Err(ValidationError::YearOrder);
        }
        if self.half_window_days > 30 {
            return Err(ValidationError::HalfWindow);
        }
        if self.factors.is_empty() {
            return Err(ValidationError::EmptyFactors);
        }

        let mut parsed = Vec::with_capacity(self.factors.len());
        let mut unsupported = Vec::new();
        for name in &self.factors {
            match Factor::parse(name) {
                Some(factor) => parsed.push(factor),
                None => unsupported.push(name.clone()),
            }
        }
        if !unsupported.is_empty() {
            return Err(ValidationError::UnsupportedFactors(unsupported));
        }
        Ok(parsed)
    }
}

/// Job state as a one-shot tagged union: constructed `Running` at submission
/// and replaced exactly once by a terminal variant, never mutated in place.
#[derive(Debug, Clone)]
pub enum JobState {
    Running,
    Ok {
        result: serde_json::Value,
        result_hash: String,
        duration_ms: i64,
    },
    Error {
        error: serde_json::Value,
        duration_ms: i64,
    },
}

impl JobState {
    pub fn status(&self) -> AnalyzeStatus {
        match self {
            JobState::Running => AnalyzeStatus::Running,
            JobState::Ok { .. } => AnalyzeStatus::Ok,
            JobState::Error { .. } => AnalyzeStatus::Error,
        }
    }
}

/// Terminal outcome produced by the detached worker. Keeping this a separate
/// type from [`JobState`] means a worker cannot write `Running` back.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Ok {
        result: serde_json::Value,
        result_hash: String,
        duration_ms: i64,
    },
    Error {
        error: serde_json::Value,
        duration_ms: i64,
    },
}

impl JobOutcome {
    pub fn status(&self) -> AnalyzeStatus {
        match self {
            JobOutcome::Ok { .. } => AnalyzeStatus::Ok,
            JobOutcome::Error { .. } => AnalyzeStatus::Error,
        }
    }

    /// HTTP-equivalent code recorded with the outcome.
    pub fn response_status(&self) -> i32 {
        match self {
            JobOutcome::Ok { .. } => 200,
            JobOutcome::Error { .. } => 500,
        }
    }

    pub fn into_state(self) -> JobState {
        match self {
            JobOutcome::Ok {
                result,
                result_hash,
                duration_ms,
            } => JobState::Ok {
                result,
                result_hash,
                duration_ms,
            },
            JobOutcome::Error { error, duration_ms } => JobState::Error { error, duration_ms },
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAnalyzeJob {
    pub user_id: Uuid,
    pub params: AnalyzeRequest,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AnalyzeJobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub params: AnalyzeRequest,
    pub model_version: String,
    pub dataset_version: String,
    pub request_id: Option<String>,
    pub state: JobState,
}

impl AnalyzeJobRow {
    pub fn status(&self) -> AnalyzeStatus {
        self.state.status()
    }

    pub fn to_detail(&self) -> AnalyzeDetail {
        let (duration_ms, result, result_hash) = match &self.state {
            JobState::Running => (None, None, None),
            JobState::Ok {
                result,
                result_hash,
                duration_ms,
            } => (
                Some(*duration_ms),
                Some(result.clone()),
                Some(result_hash.clone()),
            ),
            JobState::Error { error, duration_ms } => (Some(*duration_ms), Some(error.clone()), None),
        };
        AnalyzeDetail {
            id: self.id,
            status: self.status(),
            created_at: self.created_at.to_rfc3339(),
            duration_ms,
            params: self.params.clone(),
            result,
            result_hash,
            model_version: self.model_version.clone(),
            dataset_version: self.dataset_version.clone(),
        }
    }

    pub fn to_history_item(&self) -> AnalyzeHistoryItem {
        AnalyzeHistoryItem {
            id: self.id,
            status: self.status(),
            created_at: self.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AnalyzeCreateResponse {
    pub analysis_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AnalyzeDetail {
    pub id: Uuid,
    pub status: AnalyzeStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    pub params: AnalyzeRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_hash: Option<String>,
    pub model_version: String,
    pub dataset_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AnalyzeHistoryItem {
    pub id: Uuid,
    pub status: AnalyzeStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AnalyzeHistoryResponse {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub items: Vec<AnalyzeHistoryItem>,
}

/// Sha256 hex over the canonical serialization of a result payload: compact
/// separators, keys sorted (serde_json object maps are ordered).
pub fn canonical_result_hash(result: &serde_json::Value) -> String {
    use sha2::Digest;
    use std::fmt::Write;

    let canonical = result.to_string();
    let digest = sha2::Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AnalyzeRequest {
        AnalyzeRequest {
            latitude: 19.43,
            longitude: -99.13,
            month: 5,
            day: 10,
            start_year: 2000,
            end_year: 2020,
            half_window_days: 5,
            factors: vec!["temperature".to_string(), "humidity".to_string()],
        }
    }

    #[test]
    fn validate_accepts_a_well_formed_request() {
        let factors = request().validate().unwrap();
        assert_eq!(factors, vec![Factor::Temperature, Factor::Humidity]);
    }

    #[test]
    fn validate_rejects_reversed_year_range() {
        let mut req = request();
        req.start_year = 2020;
        req.end_year = 2000;
        assert!(matches!(req.validate(), Err(ValidationError::YearOrder)));
    }

    #[test]
    fn validate_rejects_unknown_factors_with_their_names() {
        let mut req = request();
        req.factors = vec!["temperature".to_string(), "snowfall".to_string()];
        match req.validate() {
            Err(ValidationError::UnsupportedFactors(bad)) => {
                assert_eq!(bad, vec!["snowfall".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_years_before_the_archive() {
        let mut req = request();
        req.start_year = 1970;
        assert!(matches!(req.validate(), Err(ValidationError::YearTooEarly)));
    }

    #[test]
    fn validate_rejects_impossible_dates_but_allows_feb_29() {
        let mut req = request();
        req.month = 2;
        req.day = 30;
        assert!(matches!(
            req.validate(),
            Err(ValidationError::ImpossibleDate { .. })
        ));

        req.day = 29;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_factor_lists() {
        let mut req = request();
        req.factors.clear();
        assert!(matches!(req.validate(), Err(ValidationError::EmptyFactors)));
    }

    #[test]
    fn request_defaults_fill_window_and_factors() {
        let req: AnalyzeRequest = serde_json::from_value(serde_json::json!({
            "latitude": 0.0,
            "longitude": 0.0,
            "month": 6,
            "day": 15,
            "start_year": 1990,
            "end_year": 2000
        }))
        .unwrap();
        assert_eq!(req.half_window_days, 10);
        assert_eq!(req.factors.len(), 4);
    }

    #[test]
    fn canonical_hash_is_stable_and_key_order_insensitive() {
        let a = serde_json::json!({ "b": 1, "a": { "y": 2, "x": [1.5, 2.0] } });
        let b = serde_json::json!({ "a": { "x": [1.5, 2.0], "y": 2 }, "b": 1 });
        assert_eq!(canonical_result_hash(&a), canonical_result_hash(&b));
        assert_eq!(canonical_result_hash(&a).len(), 64);

        let c = serde_json::json!({ "b": 2 });
        assert_ne!(canonical_result_hash(&a), canonical_result_hash(&c));
    }

    #[test]
    fn terminal_state_carries_the_response_status() {
        let ok = JobOutcome::Ok {
            result: serde_json::json!({ "ok": true }),
            result_hash: "deadbeef".to_string(),
            duration_ms: 12,
        };
        assert_eq!(ok.response_status(), 200);
        assert_eq!(ok.status(), AnalyzeStatus::Ok);
        assert!(ok.status().is_terminal());

        let err = JobOutcome::Error {
            error: serde_json::json!({ "error": "boom" }),
            duration_ms: 3,
        };
        assert_eq!(err.response_status(), 500);
        assert_eq!(err.status(), AnalyzeStatus::Error);
        assert!(!AnalyzeStatus::Running.is_terminal());
    }
}
