pub mod cache;
pub mod error;
pub mod patterns;
pub mod products;

pub use cache::{CachedSearch, SearchCache};
pub use error::{Result, StoreError};
pub use patterns::PatternStore;
pub use products::{FreshProduct, ProductReader, FRESHNESS_WINDOW_HOURS};

use sqlx::PgPool;

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
