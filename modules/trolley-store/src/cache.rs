// Postgres-backed result cache keyed by (normalized query, limit).

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::warn;
use trolley_common::VerifiedProduct;

use crate::error::Result;

/// How long a cached response stays servable.
const CACHE_TTL_HOURS: i64 = 1;

pub struct SearchCache {
    pool: PgPool,
}

/// A row from the search_cache table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct CacheRow {
    normalized_query: String,
    results: serde_json::Value,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hit_count: i32,
}

/// A servable cache hit.
#[derive(Debug, Clone)]
pub struct CachedSearch {
    pub results: Vec<VerifiedProduct>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Hits served before this one.
    pub hit_count: i32,
}

impl SearchCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a previous response. Expiry is compared client-side against
    /// `expires_at`; an expired or undecodable row is a miss. Hits bump
    /// hit_count (best effort).
    pub async fn lookup(
        &self,
        normalized_query: &str,
        limit: usize,
    ) -> Result<Option<CachedSearch>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT * FROM search_cache
            WHERE normalized_query = $1 AND limit_requested = $2
            "#,
        )
        .bind(normalized_query)
        .bind(limit as i32)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        if row.expires_at <= Utc::now() {
            return Ok(None);
        }

        let Some(results) = decode_results(&row.results) else {
            warn!(query = %row.normalized_query, "Undecodable cached results, treating as miss");
            return Ok(None);
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE search_cache
            SET hit_count = hit_count + 1
            WHERE normalized_query = $1 AND limit_requested = $2
            "#,
        )
        .bind(normalized_query)
        .bind(limit as i32)
        .execute(&self.pool)
        .await
        {
            warn!(query = %row.normalized_query, error = %e, "Failed to bump cache hit count");
        }

        Ok(Some(CachedSearch {
            results,
            metadata: row.metadata,
            created_at: row.created_at,
            hit_count: row.hit_count,
        }))
    }

    /// Upsert a response. Callers only store non-empty result sets; a refresh
    /// resets the TTL and the hit counter.
    pub async fn store(
        &self,
        normalized_query: &str,
        limit: usize,
        results: &[VerifiedProduct],
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let results_json = serde_json::to_value(results).unwrap_or_default();
        let expires_at = Utc::now() + Duration::hours(CACHE_TTL_HOURS);

        sqlx::query(
            r#"
            INSERT INTO search_cache
                (normalized_query, limit_requested, results, metadata, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (normalized_query, limit_requested) DO UPDATE
                SET results = EXCLUDED.results,
                    metadata = EXCLUDED.metadata,
                    created_at = now(),
                    expires_at = EXCLUDED.expires_at,
                    hit_count = 0
            "#,
        )
        .bind(normalized_query)
        .bind(limit as i32)
        .bind(results_json)
        .bind(metadata)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn decode_results(value: &serde_json::Value) -> Option<Vec<VerifiedProduct>> {
    serde_json::from_value(value.clone()).ok()
}
