use super::{decode_ts, encode_ts};
use crate::core::memory::traits::{SynthesisStore, SynthesizedPattern};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

const PATTERN_COLUMNS: &str = "SELECT id, pattern_type, input_signature, recommended_action, \
     confidence, evidence_ids, created_at, last_strengthened_at, protected \
     FROM synthesized_patterns";

pub struct SqliteSynthesis {
    pool: SqlitePool,
}

impl SqliteSynthesis {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn map_pattern_row(row: &SqliteRow) -> anyhow::Result<SynthesizedPattern> {
    let evidence_ids: String = row.try_get("evidence_ids")?;
    let created_at: String = row.try_get("created_at")?;
    let last_strengthened_at: String = row.try_get("last_strengthened_at")?;
    let protected: i64 = row.try_get("protected")?;
    Ok(SynthesizedPattern {
        id: row.try_get("id")?,
        pattern_type: row.try_get("pattern_type")?,
        input_signature: row.try_get("input_signature")?,
        recommended_action: row.try_get("recommended_action")?,
        confidence: row.try_get("confidence")?,
        evidence_ids: serde_json::from_str(&evidence_ids).context("decode evidence ids")?,
        created_at: decode_ts(&created_at)?,
        last_strengthened_at: decode_ts(&last_strengthened_at)?,
        protected: protected != 0,
    })
}

#[async_trait]
impl SynthesisStore for SqliteSynthesis {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, pattern: &SynthesizedPattern) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO synthesized_patterns (
                 id, pattern_type, input_signature, recommended_action, confidence,
                 evidence_ids, created_at, last_strengthened_at, protected
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&pattern.id)
        .bind(&pattern.pattern_type)
        .bind(&pattern.input_signature)
        .bind(&pattern.recommended_action)
        .bind(pattern.confidence)
        .bind(serde_json::to_string(&pattern.evidence_ids).context("encode evidence ids")?)
        .bind(encode_ts(pattern.created_at))
        .bind(encode_ts(pattern.last_strengthened_at))
        .bind(i64::from(pattern.protected))
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert pattern {}", pattern.id))?;
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<SynthesizedPattern>> {
        let row = sqlx::query(&format!("{PATTERN_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("query pattern")?;
        row.as_ref().map(map_pattern_row).transpose()
    }

    async fn list(&self) -> anyhow::Result<Vec<SynthesizedPattern>> {
        let rows = sqlx::query(&format!("{PATTERN_COLUMNS} ORDER BY created_at ASC"))
            .fetch_all(&self.pool)
            .await
            .context("list patterns")?;
        rows.iter().map(map_pattern_row).collect()
    }

    async fn strengthen(
        &self,
        id: &str,
        extra_evidence: &[String],
        confidence: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<SynthesizedPattern>> {
        let mut tx = self.pool.begin().await.context("begin strengthen")?;
        let row = sqlx::query(&format!("{PATTERN_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .context("load pattern for strengthen")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut pattern = map_pattern_row(&row)?;
        for evidence_id in extra_evidence {
            if !pattern.evidence_ids.contains(evidence_id) {
                pattern.evidence_ids.push(evidence_id.clone());
            }
        }
        pattern.confidence = pattern.confidence.max(confidence.clamp(0.0, 1.0));
        pattern.last_strengthened_at = now;

        sqlx::query(
            "UPDATE synthesized_patterns
             SET evidence_ids = $1, confidence = $2, last_strengthened_at = $3
             WHERE id = $4",
        )
        .bind(serde_json::to_string(&pattern.evidence_ids).context("encode evidence ids")?)
        .bind(pattern.confidence)
        .bind(encode_ts(now))
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("update pattern strength")?;
        tx.commit().await.context("commit strengthen")?;
        Ok(Some(pattern))
    }

    async fn prune(&self, min_confidence: f64) -> anyhow::Result<usize> {
        let result = sqlx::query(
            "DELETE FROM synthesized_patterns WHERE protected = 0 AND confidence < $1",
        )
        .bind(min_confidence)
        .execute(&self.pool)
        .await
        .context("prune patterns")?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(usize::MAX))
    }
}
