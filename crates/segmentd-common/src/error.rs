//! Configuration error types

use thiserror::Error;

/// Invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("retention job '{0}' has a zero batch size")]
    ZeroBatchSize(&'static str),

    #[error("retention job '{0}' has a zero interval")]
    ZeroInterval(&'static str),

    #[error("log retention window must be at least one month")]
    ZeroLogRetention,
}
