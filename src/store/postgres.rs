use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::{FaasError, Result};
use crate::function::{Function, FunctionParam};
use crate::invocation::{Invocation, InvocationCompletion, InvocationStatus};
use crate::scheduler::Schedule;
use crate::store::{FunctionStore, InvocationStore, ScheduleStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS functions (
    id UUID PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    runtime VARCHAR(50) NOT NULL,
    code_locator TEXT,
    sample_event JSONB,
    params JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS function_invocations (
    id UUID PRIMARY KEY,
    function_id UUID NOT NULL REFERENCES functions(id) ON DELETE CASCADE,
    invoked_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    invoked_by VARCHAR(255),
    input_event JSONB NOT NULL,
    status VARCHAR(20) NOT NULL,
    output_result JSONB,
    error_message TEXT,
    duration_ms BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_function_invocations_function_id
    ON function_invocations(function_id, invoked_at DESC);

CREATE TABLE IF NOT EXISTS function_schedules (
    id UUID PRIMARY KEY,
    function_id UUID NOT NULL REFERENCES functions(id) ON DELETE CASCADE,
    scheduled_at TIMESTAMPTZ NOT NULL,
    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    executed BOOLEAN NOT NULL DEFAULT FALSE,
    executed_at TIMESTAMPTZ,
    status VARCHAR(20),
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_function_schedules_due
    ON function_schedules(scheduled_at) WHERE executed = FALSE;
"#;

const FUNCTION_COLUMNS: &str =
    "id, name, description, runtime, code_locator, sample_event, params, created_at, updated_at";

const INVOCATION_COLUMNS: &str = "id, function_id, invoked_at, invoked_by, input_event, status, \
     output_result, error_message, duration_ms, created_at";

const SCHEDULE_COLUMNS: &str = "id, function_id, scheduled_at, payload, executed, executed_at, \
     status, error_message, created_at, updated_at";

/// PostgreSQL store. Claims rely on `FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist yet.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        tracing::info!("Database schema initialized");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct FunctionRow {
    id: Uuid,
    name: String,
    description: String,
    runtime: String,
    code_locator: Option<String>,
    sample_event: Option<Value>,
    params: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FunctionRow> for Function {
    type Error = FaasError;

    fn try_from(row: FunctionRow) -> Result<Self> {
        let params: Vec<FunctionParam> = serde_json::from_value(row.params)?;
        Ok(Function {
            id: row.id,
            name: row.name,
            description: row.description,
            runtime: row.runtime,
            code_locator: row.code_locator,
            code: None,
            sample_event: row.sample_event,
            params,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvocationRow {
    id: Uuid,
    function_id: Uuid,
    invoked_at: DateTime<Utc>,
    invoked_by: Option<String>,
    input_event: Value,
    status: String,
    output_result: Option<Value>,
    error_message: Option<String>,
    duration_ms: Option<i64>,
    created_at: DateTime<Utc>,
}

fn parse_status(raw: &str) -> Result<InvocationStatus> {
    InvocationStatus::parse(raw)
        .ok_or_else(|| FaasError::Internal(format!("unknown status in database: {}", raw)))
}

impl TryFrom<InvocationRow> for Invocation {
    type Error = FaasError;

    fn try_from(row: InvocationRow) -> Result<Self> {
        Ok(Invocation {
            id: row.id,
            function_id: row.function_id,
            invoked_by: row.invoked_by,
            input_event: row.input_event,
            status: parse_status(&row.status)?,
            output_result: row.output_result,
            error_message: row.error_message,
            duration_ms: row.duration_ms.map(|d| d.max(0) as u64),
            invoked_at: row.invoked_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    function_id: Uuid,
    scheduled_at: DateTime<Utc>,
    payload: Value,
    executed: bool,
    executed_at: Option<DateTime<Utc>>,
    status: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = FaasError;

    fn try_from(row: ScheduleRow) -> Result<Self> {
        let status = match row.status.as_deref() {
            Some(raw) if !raw.is_empty() => Some(parse_status(raw)?),
            _ => None,
        };
        Ok(Schedule {
            id: row.id,
            function_id: row.function_id,
            scheduled_at: row.scheduled_at,
            payload: row.payload,
            executed: row.executed,
            executed_at: row.executed_at,
            status,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = FaasError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl FunctionStore for PgStore {
    async fn create_function(&self, function: &Function) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO functions
                (id, name, description, runtime, code_locator, sample_event, params, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, $8)
            "#,
        )
        .bind(function.id)
        .bind(&function.name)
        .bind(&function.description)
        .bind(&function.runtime)
        .bind(&function.sample_event)
        .bind(serde_json::to_value(&function.params)?)
        .bind(function.created_at)
        .bind(function.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bind_code_locator(&self, id: Uuid, locator: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE functions SET code_locator = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(locator)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FaasError::FunctionNotFound(id));
        }
        Ok(())
    }

    async fn get_function(&self, id: Uuid) -> Result<Option<Function>> {
        let row = sqlx::query_as::<_, FunctionRow>(&format!(
            "SELECT {} FROM functions WHERE id = $1",
            FUNCTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Function::try_from).transpose()
    }

    async fn list_functions(&self) -> Result<Vec<Function>> {
        let rows = sqlx::query_as::<_, FunctionRow>(&format!(
            "SELECT {} FROM functions ORDER BY created_at DESC",
            FUNCTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn delete_function(&self, id: Uuid) -> Result<Option<Function>> {
        let row = sqlx::query_as::<_, FunctionRow>(&format!(
            "DELETE FROM functions WHERE id = $1 RETURNING {}",
            FUNCTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Function::try_from).transpose()
    }
}

#[async_trait]
impl InvocationStore for PgStore {
    async fn create_invocation(&self, invocation: &Invocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO function_invocations
                (id, function_id, invoked_at, invoked_by, input_event, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invocation.id)
        .bind(invocation.function_id)
        .bind(invocation.invoked_at)
        .bind(&invocation.invoked_by)
        .bind(&invocation.input_event)
        .bind(invocation.status.as_str())
        .bind(invocation.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_invocation(&self, id: Uuid) -> Result<Option<Invocation>> {
        let row = sqlx::query_as::<_, InvocationRow>(&format!(
            "SELECT {} FROM function_invocations WHERE id = $1",
            INVOCATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Invocation::try_from).transpose()
    }

    async fn complete_invocation(
        &self,
        id: Uuid,
        completion: &InvocationCompletion,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE function_invocations
            SET status = $2, output_result = $3, error_message = $4, duration_ms = $5
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(completion.status.as_str())
        .bind(&completion.output_result)
        .bind(&completion.error_message)
        .bind(completion.duration_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_invocations(&self, function_id: Uuid, limit: usize) -> Result<Vec<Invocation>> {
        let rows = sqlx::query_as::<_, InvocationRow>(&format!(
            "SELECT {} FROM function_invocations WHERE function_id = $1 \
             ORDER BY invoked_at DESC LIMIT $2",
            INVOCATION_COLUMNS
        ))
        .bind(function_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl ScheduleStore for PgStore {
    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO function_schedules
                (id, function_id, scheduled_at, payload, executed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, $5, $6)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.function_id)
        .bind(schedule.scheduled_at)
        .bind(&schedule.payload)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_schedules(&self, function_id: Uuid) -> Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM function_schedules WHERE function_id = $1 ORDER BY scheduled_at DESC",
            SCHEDULE_COLUMNS
        ))
        .bind(function_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn delete_schedule(&self, function_id: Uuid, schedule_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM function_schedules WHERE id = $1 AND function_id = $2")
                .bind(schedule_id)
                .bind(function_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_due_schedules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Schedule>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            r#"
            SELECT {}
            FROM function_schedules
            WHERE executed = FALSE AND scheduled_at <= $1
            ORDER BY scheduled_at
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
            SCHEDULE_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        sqlx::query(
            r#"
            UPDATE function_schedules
            SET executed = TRUE, executed_at = $1, updated_at = $1
            WHERE id = ANY($2)
            "#,
        )
        .bind(now)
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut claimed: Vec<Schedule> = convert_all(rows)?;
        for schedule in &mut claimed {
            schedule.executed = true;
            schedule.executed_at = Some(now);
            schedule.updated_at = now;
        }
        Ok(claimed)
    }

    async fn resolve_schedule(
        &self,
        id: Uuid,
        status: InvocationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE function_schedules
            SET executed = TRUE,
                executed_at = COALESCE(executed_at, now()),
                status = $2,
                error_message = $3,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(FaasError::ScheduleNotFound(id));
        }
        Ok(())
    }
}
