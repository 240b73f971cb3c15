use thiserror::Error;

pub type Result<T> = std::result::Result<T, PagefetchError>;

#[derive(Debug, Error)]
pub enum PagefetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for PagefetchError {
    fn from(err: reqwest::Error) -> Self {
        PagefetchError::Network(err.to_string())
    }
}
