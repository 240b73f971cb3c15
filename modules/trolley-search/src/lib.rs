pub mod classifier;
pub mod enrichment;
pub mod learner;
pub mod pipeline;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod vendors;
pub mod verifier;
