use super::{decode_ts, encode_ts};
use crate::core::memory::traits::{SharedReference, SharedReferenceStore};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

pub struct SqliteSharedReferences {
    pool: SqlitePool,
}

impl SqliteSharedReferences {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_reference_row(row: &SqliteRow) -> anyhow::Result<SharedReference> {
    let value_raw: String = row.try_get("value")?;
    let version: i64 = row.try_get("version")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(SharedReference {
        key: row.try_get("key")?,
        value: serde_json::from_str(&value_raw).context("decode shared reference value")?,
        version: u64::try_from(version).context("negative shared reference version")?,
        source: row.try_get("source")?,
        created_at: decode_ts(&created_at)?,
        updated_at: decode_ts(&updated_at)?,
    })
}

#[async_trait]
impl SharedReferenceStore for SqliteSharedReferences {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        source: &str,
    ) -> anyhow::Result<SharedReference> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("begin shared put")?;

        let latest: Option<(i64, String)> = sqlx::query_as(
            "SELECT version, created_at FROM shared_references
             WHERE key = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .context("load latest shared version")?;

        let (version, created_at) = match latest {
            Some((version, created_at)) => (version + 1, decode_ts(&created_at)?),
            None => (1, now),
        };

        sqlx::query(
            "INSERT INTO shared_references (key, version, value, source, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(key)
        .bind(version)
        .bind(serde_json::to_string(&value).context("encode shared value")?)
        .bind(source)
        .bind(encode_ts(created_at))
        .bind(encode_ts(now))
        .execute(&mut *tx)
        .await
        .context("insert shared reference version")?;

        tx.commit().await.context("commit shared put")?;

        Ok(SharedReference {
            key: key.to_string(),
            value,
            version: u64::try_from(version).unwrap_or_default(),
            source: source.to_string(),
            created_at,
            updated_at: now,
        })
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<SharedReference>> {
        let row = sqlx::query(
            "SELECT key, version, value, source, created_at, updated_at
             FROM shared_references
             WHERE key = $1
             ORDER BY version DESC
             LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("query shared reference")?;
        row.as_ref().map(map_reference_row).transpose()
    }

    async fn history(&self, key: &str) -> anyhow::Result<Vec<SharedReference>> {
        let rows = sqlx::query(
            "SELECT key, version, value, source, created_at, updated_at
             FROM shared_references
             WHERE key = $1
             ORDER BY version ASC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .context("query shared reference history")?;
        rows.iter().map(map_reference_row).collect()
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT key FROM shared_references ORDER BY key")
                .fetch_all(&self.pool)
                .await
                .context("list shared reference keys")?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
