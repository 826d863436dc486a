use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::factors::{required_variables, Factor};
use crate::services::climatology::{self, FactorResult};
use crate::services::power::DailyPointSource;
use crate::services::window::{self, WindowError};

use super::store::ResultStore;
use super::types::{
    canonical_result_hash, AnalyzeJobRow, AnalyzeRequest, JobOutcome, NewAnalyzeJob,
    ValidationError,
};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to create analysis job: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
enum AnalyzeFailure {
    #[error(transparent)]
    Window(#[from] WindowError),
    #[error("failed to encode analysis result: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct Location {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Serialize)]
struct TargetDay {
    month: u32,
    day: u32,
    half_window_days: u32,
}

#[derive(Debug, Serialize)]
struct YearSpan {
    start: i32,
    end: i32,
    count: u32,
}

/// Success payload stored on the job row (and hashed for dedup checks).
#[derive(Debug, Serialize)]
struct AnalyzeReport<'a> {
    ok: bool,
    location: Location,
    target_day: TargetDay,
    years: YearSpan,
    power_variables: Vec<&'static str>,
    factors: &'a [Factor],
    results: BTreeMap<Factor, FactorResult>,
}

/// Owns the analysis-job state machine: submission creates a `running` row
/// and schedules one detached unit of work, which writes the terminal state
/// back through the store. There is deliberately no bound on in-flight
/// workers and no job-level retry or cancellation.
pub struct AnalyzeJobService {
    store: Arc<dyn ResultStore>,
    source: Arc<dyn DailyPointSource>,
}

impl AnalyzeJobService {
    pub fn new(store: Arc<dyn ResultStore>, source: Arc<dyn DailyPointSource>) -> Self {
        Self { store, source }
    }

    /// Validates the request, persists a `running` job row and returns its id
    /// without waiting for the work to finish. The HTTP response carries only
    /// the id; polling is the way to observe completion.
    pub async fn submit(
        &self,
        request: AnalyzeRequest,
        user_id: Uuid,
        request_id: Option<String>,
    ) -> Result<Uuid, SubmitError> {
        let factors = request.validate()?;
        let row = self
            .store
            .create(NewAnalyzeJob {
                user_id,
                params: request.clone(),
                request_id,
            })
            .await?;

        let store = self.store.clone();
        let source = self.source.clone();
        let job_id = row.id;
        let span = tracing::info_span!("analyze_job", job_id = %job_id, user_id = %user_id);
        tokio::spawn(run_one(store, source, job_id, request, factors).instrument(span));
        Ok(job_id)
    }

    /// Owner-scoped lookup. Foreign-owned jobs read as absent so that the
    /// caller cannot distinguish "not yours" from "does not exist".
    pub async fn get_for_owner(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<AnalyzeJobRow>, sqlx::Error> {
        let job = self.store.get(id).await?;
        Ok(job.filter(|job| job.user_id == user_id))
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<AnalyzeJobRow>, i64), sqlx::Error> {
        self.store.list_by_owner(user_id, page, page_size).await
    }
}

/// Detached worker body. Every failure ends as a terminal `error` state; the
/// only way a job stays `running` forever is the process dying mid-flight.
async fn run_one(
    store: Arc<dyn ResultStore>,
    source: Arc<dyn DailyPointSource>,
    job_id: Uuid,
    request: AnalyzeRequest,
    factors: Vec<Factor>,
) {
    let started = Instant::now();
    let outcome = match execute(source.as_ref(), &request, &factors).await {
        Ok(result) => {
            let result_hash = canonical_result_hash(&result);
            JobOutcome::Ok {
                result,
                result_hash,
                duration_ms: started.elapsed().as_millis() as i64,
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "analysis failed");
            JobOutcome::Error {
                error: serde_json::json!({ "error": err.to_string() }),
                duration_ms: started.elapsed().as_millis() as i64,
            }
        }
    };

    let status = outcome.status();
    match store.complete(job_id, outcome).await {
        Ok(true) => {
            tracing::info!(status = status.as_str(), "analysis job finished");
        }
        Ok(false) => {
            tracing::warn!("job was no longer running; terminal write skipped");
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to persist job outcome");
        }
    }
}

async fn execute(
    source: &dyn DailyPointSource,
    request: &AnalyzeRequest,
    factors: &[Factor],
) -> Result<serde_json::Value, AnalyzeFailure> {
    let variables = required_variables(factors);
    let table = window::fetch_window(
        source,
        request.latitude,
        request.longitude,
        request.month,
        request.day,
        request.start_year,
        request.end_year,
        request.half_window_days,
        &variables,
    )
    .await?;

    if table.is_empty() {
        return Ok(serde_json::json!({
            "ok": false,
            "message": "No data from POWER",
        }));
    }

    let results = climatology::analyze(&table, factors, request.half_window_days);
    let report = AnalyzeReport {
        ok: true,
        location: Location {
            lat: request.latitude,
            lon: request.longitude,
        },
        target_day: TargetDay {
            month: request.month,
            day: request.day,
            half_window_days: request.half_window_days,
        },
        years: YearSpan {
            start: request.start_year,
            end: request.end_year,
            count: climatology::distinct_year_count(&table),
        },
        power_variables: variables.iter().map(|var| var.api_name()).collect(),
        factors,
        results,
    };
    Ok(serde_json::to_value(&report)?)
}
