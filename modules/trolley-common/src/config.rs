use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Search API
    pub serper_api_key: String,
    pub serper_fallback_api_key: Option<String>,

    // AI provider
    pub anthropic_api_key: String,

    // Availability checker service
    pub stockcheck_url: String,
    pub stockcheck_token: Option<String>,

    // Page fetch service
    pub pagefetch_url: String,
    pub pagefetch_token: Option<String>,

    // Web server
    pub api_host: String,
    pub api_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            serper_api_key: required_env("SERPER_API_KEY"),
            serper_fallback_api_key: optional_env("SERPER_FALLBACK_API_KEY"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            stockcheck_url: required_env("STOCKCHECK_URL"),
            stockcheck_token: optional_env("STOCKCHECK_TOKEN"),
            pagefetch_url: required_env("PAGEFETCH_URL"),
            pagefetch_token: optional_env("PAGEFETCH_TOKEN"),
            api_host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            api_port: env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("API_PORT must be a number"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
