pub mod download_handlers;
pub mod health_handlers;
pub mod rate_limit;
pub mod upload_handlers;
