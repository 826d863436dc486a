use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate};
use uuid::Uuid;

use crate::auth::AuthManager;
use crate::config::ClimateConfig;
use crate::db;
use crate::factors::PowerVariable;
use crate::services::jobs::{AnalyzeJobService, MemoryResultStore};
use crate::services::power::{DailyObservation, DailyPointSource, UpstreamError};
use crate::state::AppState;

/// Upstream double serving one synthetic row per requested day, deterministic
/// in (date, variable) so repeated runs hash identically. Year matching for
/// failures assumes the requested range stays inside one calendar year.
pub struct CannedDailySource {
    fail_year: Option<i32>,
    empty: bool,
}

impl CannedDailySource {
    pub fn ok() -> Self {
        Self {
            fail_year: None,
            empty: false,
        }
    }

    pub fn empty() -> Self {
        Self {
            fail_year: None,
            empty: true,
        }
    }

    pub fn failing_for(year: i32) -> Self {
        Self {
            fail_year: Some(year),
            empty: false,
        }
    }

    fn value_for(date: NaiveDate, variable: PowerVariable) -> f64 {
        let base = match variable {
            PowerVariable::Prectotcorr => 0.8,
            PowerVariable::Rh2m => 55.0,
            PowerVariable::T2m => 18.0,
            PowerVariable::Ws10m => 4.0,
        };
        base + (date.ordinal() % 7) as f64 * 0.5 + (date.year() % 5) as f64 * 0.1
    }
}

#[async_trait]
impl DailyPointSource for CannedDailySource {
    async fn fetch_day_range(
        &self,
        _latitude: f64,
        _longitude: f64,
        start: NaiveDate,
        end: NaiveDate,
        variables: &[PowerVariable],
    ) -> Result<Vec<DailyObservation>, UpstreamError> {
        if self.fail_year == Some(start.year()) {
            return Err(UpstreamError::RetriesExhausted {
                attempts: 3,
                url: "http://power.test/point".to_string(),
                last_error: "POWER HTTP 502: upstream unavailable".to_string(),
            });
        }
        if self.empty {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        let mut date = start;
        while date <= end {
            let values: BTreeMap<PowerVariable, Option<f64>> = variables
                .iter()
                .map(|var| (*var, Some(Self::value_for(date, *var))))
                .collect();
            rows.push(DailyObservation {
                date,
                year: date.year(),
                values,
            });
            date = date + Days::new(1);
        }
        Ok(rows)
    }
}

pub fn test_config() -> ClimateConfig {
    ClimateConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        power_base_url: "http://127.0.0.1:9/point".to_string(),
        power_community: "RE".to_string(),
        power_timeout_seconds: 5,
        power_retry_attempts: 2,
        power_retry_base_delay_ms: 10,
        power_retry_multiplier: 1.5,
        session_ttl_hours: 24,
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let pool = db::connect_lazy(&config.database_url).expect("connect_lazy");
    let auth = Arc::new(AuthManager::new(config.session_ttl_hours));
    let http = reqwest::Client::new();
    let analyze_jobs = Arc::new(AnalyzeJobService::new(
        Arc::new(MemoryResultStore::new()),
        Arc::new(CannedDailySource::ok()),
    ));

    AppState {
        config,
        db: pool,
        auth,
        analyze_jobs,
        http,
    }
}

pub fn test_user() -> crate::auth::AuthenticatedUser {
    crate::auth::AuthenticatedUser {
        id: Uuid::new_v4(),
        email: "test-user@example.com".to_string(),
        role: "user".to_string(),
    }
}
