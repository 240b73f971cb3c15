// Postgres persistence for learned URL classification rules.

use std::collections::HashMap;

use sqlx::PgPool;
use trolley_common::{LearningStatus, VendorPatterns};

use crate::error::Result;

pub struct PatternStore {
    pool: PgPool,
}

/// A row from the vendor_url_patterns table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct PatternRow {
    domain: String,
    vendor_name: String,
    product_patterns: Vec<String>,
    category_patterns: Vec<String>,
    learning_status: String,
    confidence_score: f64,
    sample_size: i32,
    example_urls: Vec<String>,
    research_notes: Option<String>,
}

impl PatternRow {
    fn into_domain(self) -> VendorPatterns {
        VendorPatterns {
            domain: self.domain,
            vendor_name: self.vendor_name,
            product_patterns: self.product_patterns,
            category_patterns: self.category_patterns,
            status: parse_status(&self.learning_status),
            confidence: self.confidence_score,
            sample_size: self.sample_size,
            example_urls: self.example_urls,
            research_notes: self.research_notes,
        }
    }
}

/// Unknown status strings read back as `pending`, which is never trusted.
fn parse_status(s: &str) -> LearningStatus {
    match s {
        "learned" => LearningStatus::Learned,
        "failed" => LearningStatus::Failed,
        _ => LearningStatus::Pending,
    }
}

impl PatternStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All domains with trusted (learned) patterns, keyed by domain.
    /// Loaded once per request to build the classifier overlay.
    pub async fn all_learned(&self) -> Result<HashMap<String, VendorPatterns>> {
        let rows = sqlx::query_as::<_, PatternRow>(
            r#"
            SELECT * FROM vendor_url_patterns
            WHERE learning_status = 'learned'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.domain.clone(), r.into_domain()))
            .collect())
    }

    /// The pattern record for one domain, any status.
    pub async fn get(&self, domain: &str) -> Result<Option<VendorPatterns>> {
        let row = sqlx::query_as::<_, PatternRow>(
            r#"
            SELECT * FROM vendor_url_patterns
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PatternRow::into_domain))
    }

    /// Mark a domain as being researched. Idempotent; an interrupted earlier
    /// run leaves a pending row that a later run simply takes over.
    pub async fn upsert_pending(&self, domain: &str, vendor_name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vendor_url_patterns (domain, vendor_name, learning_status)
            VALUES ($1, $2, 'pending')
            ON CONFLICT (domain) DO UPDATE
                SET learning_status = 'pending',
                    vendor_name = EXCLUDED.vendor_name,
                    updated_at = now()
            "#,
        )
        .bind(domain)
        .bind(vendor_name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a successful research run.
    pub async fn mark_learned(&self, patterns: &VendorPatterns) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vendor_url_patterns
                (domain, vendor_name, product_patterns, category_patterns,
                 learning_status, confidence_score, sample_size, example_urls,
                 research_notes)
            VALUES ($1, $2, $3, $4, 'learned', $5, $6, $7, $8)
            ON CONFLICT (domain) DO UPDATE
                SET vendor_name = EXCLUDED.vendor_name,
                    product_patterns = EXCLUDED.product_patterns,
                    category_patterns = EXCLUDED.category_patterns,
                    learning_status = 'learned',
                    confidence_score = EXCLUDED.confidence_score,
                    sample_size = EXCLUDED.sample_size,
                    example_urls = EXCLUDED.example_urls,
                    research_notes = EXCLUDED.research_notes,
                    updated_at = now()
            "#,
        )
        .bind(&patterns.domain)
        .bind(&patterns.vendor_name)
        .bind(&patterns.product_patterns)
        .bind(&patterns.category_patterns)
        .bind(patterns.confidence)
        .bind(patterns.sample_size)
        .bind(&patterns.example_urls)
        .bind(&patterns.research_notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed research run so the domain is not retried on every
    /// request. The reason lands in research_notes.
    pub async fn mark_failed(&self, domain: &str, vendor_name: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vendor_url_patterns
                (domain, vendor_name, learning_status, research_notes)
            VALUES ($1, $2, 'failed', $3)
            ON CONFLICT (domain) DO UPDATE
                SET learning_status = 'failed',
                    research_notes = EXCLUDED.research_notes,
                    updated_at = now()
            "#,
        )
        .bind(domain)
        .bind(vendor_name)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
