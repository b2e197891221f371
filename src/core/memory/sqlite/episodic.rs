use super::{decode_ts, encode_ts};
use crate::core::memory::traits::{EpisodeEntry, EpisodeQuery, EpisodicStore, NewEpisode};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::collections::BTreeSet;
use uuid::Uuid;

const EPISODE_COLUMNS: &str =
    "SELECT id, timestamp, problem_id, entry_type, payload, tags, supersedes FROM episodes";

/// Append-only trace. UPDATE and DELETE are rejected by triggers.
pub struct SqliteEpisodicTrace {
    pool: SqlitePool,
}

impl SqliteEpisodicTrace {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_episode_row(row: &SqliteRow) -> anyhow::Result<EpisodeEntry> {
    let timestamp: String = row.try_get("timestamp")?;
    let payload: String = row.try_get("payload")?;
    let tags: String = row.try_get("tags")?;
    Ok(EpisodeEntry {
        id: row.try_get("id")?,
        timestamp: decode_ts(&timestamp)?,
        problem_id: row.try_get("problem_id")?,
        entry_type: row.try_get("entry_type")?,
        payload: serde_json::from_str(&payload).context("decode episode payload")?,
        tags: serde_json::from_str::<BTreeSet<String>>(&tags).context("decode episode tags")?,
        supersedes: row.try_get("supersedes")?,
    })
}

#[async_trait]
impl EpisodicStore for SqliteEpisodicTrace {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, episode: NewEpisode) -> anyhow::Result<EpisodeEntry> {
        let entry = episode.into_entry(Uuid::new_v4().to_string(), Utc::now());
        sqlx::query(
            "INSERT INTO episodes (id, timestamp, problem_id, entry_type, payload, tags, supersedes)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&entry.id)
        .bind(encode_ts(entry.timestamp))
        .bind(&entry.problem_id)
        .bind(&entry.entry_type)
        .bind(serde_json::to_string(&entry.payload).context("encode episode payload")?)
        .bind(serde_json::to_string(&entry.tags).context("encode episode tags")?)
        .bind(&entry.supersedes)
        .execute(&self.pool)
        .await
        .context("append episode")?;
        Ok(entry)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<EpisodeEntry>> {
        let row = sqlx::query(&format!("{EPISODE_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("query episode by id")?;
        row.as_ref().map(map_episode_row).transpose()
    }

    async fn get_many(&self, ids: &[String]) -> anyhow::Result<Vec<EpisodeEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(EPISODE_COLUMNS);
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(") ORDER BY seq ASC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("query episodes by id")?;
        rows.iter().map(map_episode_row).collect()
    }

    async fn query(&self, query: &EpisodeQuery) -> anyhow::Result<Vec<EpisodeEntry>> {
        let mut builder = QueryBuilder::<Sqlite>::new(EPISODE_COLUMNS);
        builder.push(" WHERE 1 = 1");
        if let Some(problem_id) = &query.problem_id {
            builder.push(" AND problem_id = ").push_bind(problem_id.clone());
        }
        if let Some(entry_type) = &query.entry_type {
            builder.push(" AND entry_type = ").push_bind(entry_type.clone());
        }
        if let Some(tag) = &query.tag {
            builder
                .push(" AND EXISTS (SELECT 1 FROM json_each(episodes.tags) WHERE value = ")
                .push_bind(tag.clone())
                .push(")");
        }
        if let Some(since) = query.since {
            builder.push(" AND timestamp >= ").push_bind(encode_ts(since));
        }
        if let Some(until) = query.until {
            builder.push(" AND timestamp <= ").push_bind(encode_ts(until));
        }
        builder.push(" ORDER BY seq ASC");
        if let Some(limit) = query.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("query episodes")?;
        rows.iter().map(map_episode_row).collect()
    }

    async fn count(&self) -> anyhow::Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes")
            .fetch_one(&self.pool)
            .await
            .context("count episodes")?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
