use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trolley_common::{Config, ProductQuery, DEFAULT_RESULT_LIMIT};
use trolley_search::pipeline::SearchPipeline;

#[derive(Parser)]
#[command(name = "trolley-search", about = "Run one product search end to end")]
struct Cli {
    /// Product to search for, e.g. "hp brown sauce 450g"
    query: String,

    /// Extra context for verification ("the squeezy bottle, not glass")
    #[arg(long)]
    description: Option<String>,

    /// Maximum results to return
    #[arg(long, default_value_t = DEFAULT_RESULT_LIMIT)]
    limit: usize,

    /// Skip the result cache and run the full pipeline
    #[arg(long)]
    bypass_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    info!("Trolley search starting");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    trolley_store::migrate(&pool).await.context("Migrations failed")?;

    let pipeline = SearchPipeline::from_config(&config, pool);
    let query = ProductQuery {
        text: cli.query,
        description: cli.description,
        limit: cli.limit,
        bypass_cache: cli.bypass_cache,
    };

    let outcome = pipeline.run(&query).await?;

    if outcome.products.is_empty() && outcome.products_without_price.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for (i, product) in outcome.products.iter().enumerate() {
        println!(
            "{:>2}. £{:<8.2} {:<14} {}  [{}]",
            i + 1,
            product.price,
            product.vendor,
            product.product_name,
            product.availability
        );
    }
    for product in &outcome.products_without_price {
        println!(
            "  . (no price) {:<14} {}  [{}]",
            product.vendor, product.product_name, product.availability
        );
    }

    Ok(())
}
