//! Error types for the collection pipeline

use thiserror::Error;

/// Errors raised by pipeline components
///
/// Source scrapes and sink transports report `anyhow::Error` since their
/// failures come from arbitrary backends; everything the library itself
/// decides to reject goes through this enum.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// A glob expression in a filter configuration failed to compile
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Two values being summed have different numeric types
    #[error("aggregation type mismatch for {metric}: {left} vs {right}")]
    TypeMismatch {
        metric: String,
        left: &'static str,
        right: &'static str,
    },

    /// A processor met a value it cannot handle
    #[error("unsupported value for {metric}: {reason}")]
    UnsupportedValue { metric: String, reason: String },

    /// Internal metric could not be created or registered
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    /// Invalid pipeline configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for library operations
pub type Result<T> = std::result::Result<T, CollectorError>;
