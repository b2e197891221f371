use super::{decode_ts, encode_ts};
use crate::core::memory::traits::{WorkingSet, WorkingSetStore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

/// Working sets serialized as one JSON document per problem.
pub struct SqliteWorkingSets {
    pool: SqlitePool,
}

impl SqliteWorkingSets {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkingSetStore for SqliteWorkingSets {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(
        &self,
        problem_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<WorkingSet>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT body, expires_at FROM working_sets WHERE problem_id = $1",
        )
        .bind(problem_id)
        .fetch_optional(&self.pool)
        .await
        .context("query working set")?;

        let Some((body, expires_at)) = row else {
            return Ok(None);
        };
        if decode_ts(&expires_at)? <= now {
            return Ok(None);
        }
        let set = serde_json::from_str::<WorkingSet>(&body).context("decode working set")?;
        Ok(Some(set))
    }

    async fn save(&self, set: &WorkingSet) -> anyhow::Result<()> {
        let body = serde_json::to_string(set).context("encode working set")?;
        sqlx::query(
            "INSERT INTO working_sets (problem_id, body, created_at, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT(problem_id) DO UPDATE SET
                 body = excluded.body,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at",
        )
        .bind(&set.problem_id)
        .bind(body)
        .bind(encode_ts(set.created_at))
        .bind(encode_ts(set.expires_at))
        .execute(&self.pool)
        .await
        .context("upsert working set")?;
        Ok(())
    }

    async fn clear(&self, problem_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM working_sets WHERE problem_id = $1")
            .bind(problem_id)
            .execute(&self.pool)
            .await
            .context("delete working set")?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let result = sqlx::query("DELETE FROM working_sets WHERE expires_at <= $1")
            .bind(encode_ts(now))
            .execute(&self.pool)
            .await
            .context("purge expired working sets")?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
