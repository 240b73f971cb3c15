pub mod config;
pub mod error;
pub mod types;
pub mod urls;

pub use config::Config;
pub use error::TrolleyError;
pub use types::*;
pub use urls::{host_matches_domain, registrable_host, sanitize_url};
