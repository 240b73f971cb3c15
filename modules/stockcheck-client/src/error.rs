use thiserror::Error;

pub type Result<T> = std::result::Result<T, StockcheckError>;

#[derive(Debug, Error)]
pub enum StockcheckError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for StockcheckError {
    fn from(err: reqwest::Error) -> Self {
        StockcheckError::Network(err.to_string())
    }
}
