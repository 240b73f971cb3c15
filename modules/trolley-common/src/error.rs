use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrolleyError {
    #[error("Search credits exhausted and no fallback credential available")]
    CreditsExhausted,

    #[error("Search error: {0}")]
    Search(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
