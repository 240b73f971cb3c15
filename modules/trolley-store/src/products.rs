// Read-through access to the shared scraped_products table. The ERP sync job
// owns writes; we only consult it as a freshness shortcut ahead of the
// checker service.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::Result;

/// Scrapes older than this are ignored.
pub const FRESHNESS_WINDOW_HOURS: i64 = 24;

pub struct ProductReader {
    pool: PgPool,
}

/// A recently scraped product row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FreshProduct {
    pub url: String,
    pub price: Option<f64>,
    pub stock_status: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProductReader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rows for any of `urls` updated within the freshness window.
    pub async fn fresh_by_urls(&self, urls: &[String]) -> Result<Vec<FreshProduct>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let cutoff = Utc::now() - Duration::hours(FRESHNESS_WINDOW_HOURS);

        let rows = sqlx::query_as::<_, FreshProduct>(
            r#"
            SELECT url, price::float8 AS price, stock_status, updated_at
            FROM scraped_products
            WHERE url = ANY($1) AND updated_at >= $2
            "#,
        )
        .bind(urls)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
