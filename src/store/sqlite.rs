//! @ai:module:intent SQLite-backed store using an r2d2 connection pool
//! @ai:module:layer infrastructure
//! @ai:module:public_api SqliteStore
//! @ai:module:stateless false

use crate::benchmark::{
    BenchmarkConfiguration, BenchmarkType, ModelResponse, ResponseStatus, Run, RunStatus,
    UsageSource,
};
use crate::error::{BenchError, Result};
use crate::provider::client::PricingCache;
use crate::provider::types::{ModelInfo, Pricing};
use crate::reconcile::{ProviderTiming, UsageOutcome};
use crate::store::{ResponseCompletion, Store};
use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS models (
    id                 TEXT PRIMARY KEY,
    name               TEXT NOT NULL,
    description        TEXT,
    pricing_prompt     REAL,
    pricing_completion REAL,
    context_length     INTEGER,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS benchmark_runs (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    description      TEXT,
    benchmark_type   TEXT NOT NULL,
    status           TEXT NOT NULL,
    total_models     INTEGER NOT NULL,
    completed_models INTEGER NOT NULL DEFAULT 0,
    system_prompt    TEXT,
    user_prompt      TEXT NOT NULL,
    json_schema      TEXT,
    tool_definitions TEXT,
    max_tokens       INTEGER NOT NULL,
    temperature      REAL NOT NULL,
    total_cost       REAL NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    started_at       TEXT,
    completed_at     TEXT
);

CREATE TABLE IF NOT EXISTS model_responses (
    id                     TEXT PRIMARY KEY,
    run_id                 TEXT NOT NULL REFERENCES benchmark_runs(id) ON DELETE CASCADE,
    model_id               TEXT NOT NULL,
    status                 TEXT NOT NULL,
    response_text          TEXT,
    response_json          TEXT,
    tool_calls             TEXT,
    error_message          TEXT,
    generation_id          TEXT,
    prompt_tokens          INTEGER,
    completion_tokens      INTEGER,
    total_tokens           INTEGER,
    cost                   REAL,
    usage_source           TEXT,
    pricing_missing        INTEGER NOT NULL DEFAULT 0,
    latency_ms             INTEGER,
    openrouter_latency_ms  INTEGER,
    generation_time_ms     INTEGER,
    moderation_latency_ms  INTEGER,
    time_to_first_token_ms INTEGER,
    tokens_per_second      REAL,
    created_at             TEXT NOT NULL,
    started_at             TEXT,
    completed_at           TEXT,
    UNIQUE (run_id, model_id)
);

CREATE INDEX IF NOT EXISTS idx_model_responses_run ON model_responses(run_id);
";

#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<Connection, rusqlite::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
    }
}

/// @ai:intent Pooled SQLite store
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// @ai:intent Open (creating if needed) a database file and run migrations
    /// @ai:effects fs:write, db:write
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at {}", path.display());
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(8)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        Self::migrate(pool)
    }

    /// @ai:intent Private in-memory database; one connection so every caller sees the same data
    /// @ai:effects db:write
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connection_customizer(Box::new(SqlitePragmas))
            .build(manager)?;

        Self::migrate(pool)
    }

    fn migrate(pool: DbPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA)?;
        }
        debug!("Schema ready");
        Ok(Self { pool })
    }

    /// @ai:intent Seed or refresh one pricing row
    /// @ai:effects db:write
    pub fn upsert_model(&self, model: &ModelInfo) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO models (id, name, description, pricing_prompt, pricing_completion, context_length, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                pricing_prompt = excluded.pricing_prompt,
                pricing_completion = excluded.pricing_completion,
                context_length = excluded.context_length,
                updated_at = excluded.updated_at",
            params![
                model.id,
                model.name,
                model.description,
                model.pricing.map(|p| p.prompt),
                model.pricing.map(|p| p.completion),
                to_sql_int(model.context_length),
                now(),
            ],
        )?;
        Ok(())
    }

    /// @ai:intent Cached catalog row for a model
    /// @ai:effects db:read
    pub fn get_model(&self, model_id: &str) -> Result<Option<ModelInfo>> {
        let conn = self.pool.get()?;
        let model = conn
            .query_row("SELECT * FROM models WHERE id = ?1", params![model_id], row_to_model)
            .optional()?;
        Ok(model)
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn to_sql_int(value: Option<u64>) -> Option<i64> {
    value.and_then(|v| i64::try_from(v).ok())
}

fn from_sql_int(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

// Row mappers

fn row_to_model(row: &Row) -> rusqlite::Result<ModelInfo> {
    let prompt: Option<f64> = row.get("pricing_prompt")?;
    let completion: Option<f64> = row.get("pricing_completion")?;
    let pricing = match (prompt, completion) {
        (None, None) => None,
        (p, c) => Some(Pricing {
            prompt: p.unwrap_or(0.0),
            completion: c.unwrap_or(0.0),
        }),
    };

    Ok(ModelInfo {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        pricing,
        context_length: from_sql_int(row.get("context_length")?),
    })
}

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    let type_text: String = row.get("benchmark_type")?;
    let status_text: String = row.get("status")?;

    Ok(Run {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        benchmark_type: BenchmarkType::parse(&type_text)
            .ok_or_else(|| conversion_error(3, format!("unknown benchmark type {}", type_text)))?,
        status: RunStatus::parse(&status_text)
            .ok_or_else(|| conversion_error(4, format!("unknown run status {}", status_text)))?,
        total_models: row.get("total_models")?,
        completed_models: row.get("completed_models")?,
        system_prompt: row.get("system_prompt")?,
        user_prompt: row.get("user_prompt")?,
        json_schema: row.get("json_schema")?,
        tool_definitions: row.get("tool_definitions")?,
        max_tokens: row.get("max_tokens")?,
        temperature: row.get::<_, f64>("temperature")? as f32,
        total_cost: row.get("total_cost")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_response(row: &Row) -> rusqlite::Result<ModelResponse> {
    let status_text: String = row.get("status")?;
    let source_text: Option<String> = row.get("usage_source")?;

    Ok(ModelResponse {
        id: row.get("id")?,
        run_id: row.get("run_id")?,
        model_id: row.get("model_id")?,
        status: ResponseStatus::parse(&status_text)
            .ok_or_else(|| conversion_error(3, format!("unknown response status {}", status_text)))?,
        response_text: row.get("response_text")?,
        response_json: row.get("response_json")?,
        tool_calls: row.get("tool_calls")?,
        error_message: row.get("error_message")?,
        generation_id: row.get("generation_id")?,
        prompt_tokens: from_sql_int(row.get("prompt_tokens")?),
        completion_tokens: from_sql_int(row.get("completion_tokens")?),
        total_tokens: from_sql_int(row.get("total_tokens")?),
        cost: row.get("cost")?,
        usage_source: source_text.as_deref().and_then(UsageSource::parse),
        pricing_missing: row.get("pricing_missing")?,
        latency_ms: from_sql_int(row.get("latency_ms")?),
        openrouter_latency_ms: from_sql_int(row.get("openrouter_latency_ms")?),
        generation_time_ms: from_sql_int(row.get("generation_time_ms")?),
        moderation_latency_ms: from_sql_int(row.get("moderation_latency_ms")?),
        time_to_first_token_ms: from_sql_int(row.get("time_to_first_token_ms")?),
        tokens_per_second: row.get("tokens_per_second")?,
        created_at: row.get("created_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn load_run(conn: &Connection, run_id: &str) -> Result<Run> {
    conn.query_row("SELECT * FROM benchmark_runs WHERE id = ?1", params![run_id], row_to_run)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => BenchError::NotFound(format!("run {}", run_id)),
            other => BenchError::Database(other),
        })
}

fn load_response(conn: &Connection, response_id: &str) -> Result<ModelResponse> {
    conn.query_row(
        "SELECT * FROM model_responses WHERE id = ?1",
        params![response_id],
        row_to_response,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            BenchError::NotFound(format!("response {}", response_id))
        }
        other => BenchError::Database(other),
    })
}

impl Store for SqliteStore {
    fn create_run(&self, config: &BenchmarkConfiguration, total_models: u32) -> Result<Run> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO benchmark_runs
                (id, name, description, benchmark_type, status, total_models, completed_models,
                 system_prompt, user_prompt, json_schema, tool_definitions, max_tokens,
                 temperature, total_cost, created_at, started_at)
             VALUES (?1, ?2, ?3, ?4, 'running', ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)",
            params![
                id,
                config.name,
                config.description,
                config.benchmark_type().as_str(),
                total_models,
                config.system_prompt,
                config.user_prompt,
                config.json_schema(),
                config.tool_definitions(),
                config.max_tokens,
                config.temperature as f64,
                now,
            ],
        )?;
        load_run(&conn, &id)
    }

    fn create_response(&self, run_id: &str, model_id: &str) -> Result<ModelResponse> {
        let id = uuid::Uuid::new_v4().to_string();

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO model_responses (id, run_id, model_id, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            params![id, run_id, model_id, now()],
        )?;
        load_response(&conn, &id)
    }

    fn mark_response_running(&self, response_id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE model_responses SET status = 'running', started_at = ?1
             WHERE id = ?2 AND status = 'pending'",
            params![now(), response_id],
        )?;
        if rows == 0 {
            // Either missing or already past pending
            load_response(&conn, response_id)?;
        }
        Ok(())
    }

    fn record_usage(
        &self,
        response_id: &str,
        usage: &UsageOutcome,
        tokens_per_second: Option<f64>,
    ) -> Result<bool> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE model_responses SET
                prompt_tokens = ?1,
                completion_tokens = ?2,
                total_tokens = ?3,
                cost = ?4,
                usage_source = ?5,
                pricing_missing = ?6,
                tokens_per_second = COALESCE(?7, tokens_per_second)
             WHERE id = ?8 AND usage_source IS NULL",
            params![
                to_sql_int(Some(usage.usage.prompt_tokens)),
                to_sql_int(Some(usage.usage.completion_tokens)),
                to_sql_int(Some(usage.usage.total_tokens)),
                usage.cost,
                usage.source.as_str(),
                usage.pricing_missing,
                tokens_per_second,
                response_id,
            ],
        )?;
        Ok(rows > 0)
    }

    fn complete_response(&self, response_id: &str, completion: &ResponseCompletion) -> Result<bool> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE model_responses SET
                status = 'completed',
                response_text = ?1,
                response_json = ?2,
                tool_calls = ?3,
                generation_id = COALESCE(?4, generation_id),
                latency_ms = ?5,
                time_to_first_token_ms = ?6,
                tokens_per_second = COALESCE(?7, tokens_per_second),
                completed_at = ?8
             WHERE id = ?9 AND status IN ('pending', 'running')",
            params![
                completion.response_text,
                completion.response_json,
                completion.tool_calls,
                completion.generation_id,
                to_sql_int(Some(completion.latency_ms)),
                to_sql_int(completion.time_to_first_token_ms),
                completion.tokens_per_second,
                now(),
                response_id,
            ],
        )?;
        Ok(rows > 0)
    }

    fn fail_response(&self, response_id: &str, message: &str, latency_ms: Option<u64>) -> Result<bool> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE model_responses SET
                status = 'error',
                error_message = ?1,
                latency_ms = COALESCE(?2, latency_ms),
                completed_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'running')",
            params![message, to_sql_int(latency_ms), now(), response_id],
        )?;
        Ok(rows > 0)
    }

    fn record_provider_timing(&self, response_id: &str, timing: &ProviderTiming) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE model_responses SET
                openrouter_latency_ms = COALESCE(?1, openrouter_latency_ms),
                generation_time_ms = COALESCE(?2, generation_time_ms),
                moderation_latency_ms = COALESCE(?3, moderation_latency_ms)
             WHERE id = ?4",
            params![
                to_sql_int(timing.latency_ms),
                to_sql_int(timing.generation_time_ms),
                to_sql_int(timing.moderation_latency_ms),
                response_id,
            ],
        )?;
        Ok(())
    }

    fn update_run_progress(&self, run_id: &str, completed_models: u32, total_cost: f64) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE benchmark_runs SET
                completed_models = MAX(completed_models, ?1),
                total_cost = MAX(total_cost, ?2)
             WHERE id = ?3",
            params![completed_models, total_cost, run_id],
        )?;
        Ok(())
    }

    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE benchmark_runs SET status = ?1, completed_at = ?2
             WHERE id = ?3 AND status IN ('pending', 'running')",
            params![status.as_str(), now(), run_id],
        )?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<Run> {
        let conn = self.pool.get()?;
        load_run(&conn, run_id)
    }

    fn get_response(&self, response_id: &str) -> Result<ModelResponse> {
        let conn = self.pool.get()?;
        load_response(&conn, response_id)
    }

    fn list_responses(&self, run_id: &str) -> Result<Vec<ModelResponse>> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT * FROM model_responses WHERE run_id = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(params![run_id], row_to_response)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(BenchError::Database)
    }
}

impl PricingCache for SqliteStore {
    fn cached_model(&self, model_id: &str) -> Result<Option<ModelInfo>> {
        self.get_model(model_id)
    }
}
