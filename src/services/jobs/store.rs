use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{
    AnalyzeJobRow, AnalyzeRequest, JobOutcome, JobState, NewAnalyzeJob, DATASET_VERSION,
    MODEL_VERSION,
};

pub const MAX_PAGE_SIZE: u32 = 100;

/// Storage contract for analysis jobs. The worker and the request handlers
/// never share an in-memory job handle: every read and write goes through the
/// store by id, so the async boundary carries nothing but the job's identity.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn create(&self, job: NewAnalyzeJob) -> Result<AnalyzeJobRow, sqlx::Error>;

    async fn get(&self, id: Uuid) -> Result<Option<AnalyzeJobRow>, sqlx::Error>;

    /// Writes a terminal state. Returns false when the job was not `running`
    /// any more; the transition is one-shot.
    async fn complete(&self, id: Uuid, outcome: JobOutcome) -> Result<bool, sqlx::Error>;

    /// Creation-time-descending page of an owner's jobs plus the total count.
    /// `page` is 1-based; `page_size` is clamped to `[1, MAX_PAGE_SIZE]`.
    async fn list_by_owner(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<AnalyzeJobRow>, i64), sqlx::Error>;
}

fn clamp_paging(page: u32, page_size: u32) -> (u32, u32) {
    (page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
}

pub struct PgResultStore {
    db: PgPool,
}

impl PgResultStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct PgJobRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    duration_ms: Option<i64>,
    params_json: SqlJson<AnalyzeRequest>,
    result_json: Option<SqlJson<serde_json::Value>>,
    result_hash: Option<String>,
    model_version: String,
    dataset_version: String,
    request_id: Option<String>,
}

impl PgJobRow {
    fn into_row(self) -> AnalyzeJobRow {
        let state = match self.status.as_str() {
            "ok" => JobState::Ok {
                result: self
                    .result_json
                    .map(|value| value.0)
                    .unwrap_or(serde_json::Value::Null),
                result_hash: self.result_hash.unwrap_or_default(),
                duration_ms: self.duration_ms.unwrap_or(0),
            },
            "error" => JobState::Error {
                error: self
                    .result_json
                    .map(|value| value.0)
                    .unwrap_or(serde_json::Value::Null),
                duration_ms: self.duration_ms.unwrap_or(0),
            },
            "running" => JobState::Running,
            other => {
                tracing::warn!(status = %other, job_id = %self.id, "unknown analyze job status; treating as running");
                JobState::Running
            }
        };
        AnalyzeJobRow {
            id: self.id,
            user_id: self.user_id,
            created_at: self.created_at,
            params: self.params_json.0,
            model_version: self.model_version,
            dataset_version: self.dataset_version,
            request_id: self.request_id,
            state,
        }
    }
}

const JOB_COLUMNS: &str = "id, user_id, status, created_at, duration_ms, params_json, \
     result_json, result_hash, model_version, dataset_version, request_id";

#[async_trait]
impl ResultStore for PgResultStore {
    async fn create(&self, job: NewAnalyzeJob) -> Result<AnalyzeJobRow, sqlx::Error> {
        let row: PgJobRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO analyze_results (
                id, user_id, status, params_json, model_version, dataset_version, request_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(job.user_id)
        .bind(JobState::Running.status().as_str())
        .bind(SqlJson(job.params))
        .bind(MODEL_VERSION)
        .bind(DATASET_VERSION)
        .bind(job.request_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row.into_row())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalyzeJobRow>, sqlx::Error> {
        let row: Option<PgJobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analyze_results
            WHERE id = $1
            LIMIT 1
            "#,
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(PgJobRow::into_row))
    }

    async fn complete(&self, id: Uuid, outcome: JobOutcome) -> Result<bool, sqlx::Error> {
        let status = outcome.status().as_str();
        let response_status = outcome.response_status();
        let (result, result_hash, duration_ms) = match outcome {
            JobOutcome::Ok {
                result,
                result_hash,
                duration_ms,
            } => (result, Some(result_hash), duration_ms),
            JobOutcome::Error { error, duration_ms } => (error, None, duration_ms),
        };

        let updated = sqlx::query(
            r#"
            UPDATE analyze_results
            SET status = $2,
                result_json = $3,
                result_hash = $4,
                duration_ms = $5,
                response_status = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(SqlJson(result))
        .bind(result_hash)
        .bind(duration_ms)
        .bind(response_status)
        .bind(JobState::Running.status().as_str())
        .execute(&self.db)
        .await?;
        Ok(updated.rows_affected() == 1)
    }

    async fn list_by_owner(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<AnalyzeJobRow>, i64), sqlx::Error> {
        let (page, page_size) = clamp_paging(page, page_size);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let rows: Vec<PgJobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM analyze_results
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        ))
        .bind(user_id)
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        let total: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT
            FROM analyze_results
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok((rows.into_iter().map(PgJobRow::into_row).collect(), total.0))
    }
}

/// In-memory store for tests and embedders. Row-level writes only, matching
/// the Postgres store's isolation behavior.
#[derive(Default)]
pub struct MemoryResultStore {
    jobs: RwLock<HashMap<Uuid, AnalyzeJobRow>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn create(&self, job: NewAnalyzeJob) -> Result<AnalyzeJobRow, sqlx::Error> {
        let row = AnalyzeJobRow {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            created_at: Utc::now(),
            params: job.params,
            model_version: MODEL_VERSION.to_string(),
            dataset_version: DATASET_VERSION.to_string(),
            request_id: job.request_id,
            state: JobState::Running,
        };
        self.jobs.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<AnalyzeJobRow>, sqlx::Error> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn complete(&self, id: Uuid, outcome: JobOutcome) -> Result<bool, sqlx::Error> {
        let mut jobs = self.jobs.write().await;
        let Some(row) = jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !matches!(row.state, JobState::Running) {
            return Ok(false);
        }
        row.state = outcome.into_state();
        Ok(true)
    }

    async fn list_by_owner(
        &self,
        user_id: Uuid,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<AnalyzeJobRow>, i64), sqlx::Error> {
        let (page, page_size) = clamp_paging(page, page_size);
        let jobs = self.jobs.read().await;
        let mut owned: Vec<AnalyzeJobRow> = jobs
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = owned.len() as i64;

        let start = (page as usize - 1) * page_size as usize;
        let items = owned
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        Ok((items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::AnalyzeRequest;
    use super::*;

    fn new_job(user_id: Uuid) -> NewAnalyzeJob {
        NewAnalyzeJob {
            user_id,
            params: AnalyzeRequest {
                latitude: 0.0,
                longitude: 0.0,
                month: 6,
                day: 1,
                start_year: 1990,
                end_year: 1995,
                half_window_days: 3,
                factors: vec!["temperature".to_string()],
            },
            request_id: None,
        }
    }

    fn ok_outcome() -> JobOutcome {
        JobOutcome::Ok {
            result: serde_json::json!({ "ok": true }),
            result_hash: "abc".to_string(),
            duration_ms: 10,
        }
    }

    #[tokio::test]
    async fn complete_is_one_shot() {
        let store = MemoryResultStore::new();
        let user = Uuid::new_v4();
        let row = store.create(new_job(user)).await.unwrap();
        assert!(matches!(row.state, JobState::Running));

        assert!(store.complete(row.id, ok_outcome()).await.unwrap());
        assert!(!store
            .complete(
                row.id,
                JobOutcome::Error {
                    error: serde_json::json!({ "error": "late" }),
                    duration_ms: 1,
                }
            )
            .await
            .unwrap());

        let stored = store.get(row.id).await.unwrap().unwrap();
        assert!(matches!(stored.state, JobState::Ok { .. }));
    }

    #[tokio::test]
    async fn complete_on_unknown_id_is_a_no_op() {
        let store = MemoryResultStore::new();
        assert!(!store.complete(Uuid::new_v4(), ok_outcome()).await.unwrap());
    }

    #[tokio::test]
    async fn list_by_owner_pages_newest_first_and_hides_other_owners() {
        let store = MemoryResultStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.create(new_job(alice)).await.unwrap().id);
            // Distinct creation instants keep the ordering deterministic.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        store.create(new_job(bob)).await.unwrap();

        let (first_page, total) = store.list_by_owner(alice, 1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].id, ids[4]);
        assert_eq!(first_page[1].id, ids[3]);

        let (last_page, _) = store.list_by_owner(alice, 3, 2).await.unwrap();
        assert_eq!(last_page.len(), 1);
        assert_eq!(last_page[0].id, ids[0]);

        let (past_end, _) = store.list_by_owner(alice, 9, 2).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn page_size_is_clamped() {
        let store = MemoryResultStore::new();
        let user = Uuid::new_v4();
        store.create(new_job(user)).await.unwrap();
        let (items, total) = store.list_by_owner(user, 0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items.len(), 1);
    }
}
