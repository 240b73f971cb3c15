pub mod claude;
pub mod schema;

pub use claude::{Claude, DEFAULT_MODEL};
pub use schema::StructuredOutput;
