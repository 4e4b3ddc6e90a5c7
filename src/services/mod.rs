pub mod cache_store;
pub mod error;
pub mod rate_limiter;
pub mod retrieval;
pub mod session_store;
pub mod upload;
