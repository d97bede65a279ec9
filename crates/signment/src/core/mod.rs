//! Core utilities: configuration, errors, logging, metrics, rate
//! limiting, retry policies and input validation.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod metrics_server;
pub mod rate_limiter;
pub mod retry;
pub mod validation;

pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
pub use rate_limiter::RateLimiter;
