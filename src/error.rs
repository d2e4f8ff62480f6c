//! Error types for stackcost
//!
//! This module defines the error handling strategy for stackcost. There are two
//! error types: `CostError` (main error enum) and `ConfigError` (configuration-specific).
//!
//! ## Error Handling Philosophy
//!
//! Library code uses `crate::error::Result<T>` which returns `CostError`.
//! CLI code uses `anyhow::Result<T>` for top-level error handling. The conversion
//! happens at the CLI boundary using `anyhow::Error::from` to preserve error chains.
//!
//! ## Per-resource vs. fatal errors
//!
//! Most variants describe a failure to price a single resource. The resolver
//! catches those and attaches the message to that resource's `ResourceCost`
//! (`PricingModel::Error`), so one bad lookup never aborts a comparison:
//!
//! - `UnsupportedResourceType`: no pricing mapping exists for the type
//! - `PricingLookupFailed`: the pricing source could not be reached or
//!   returned garbage (retryable)
//! - `InvalidTierSet` / `InvalidUsage`: the tier curve or usage estimate
//!   violates the aggregator's preconditions
//! - `UnitMismatch`: the source quoted tiers for a different unit than the
//!   usage estimate
//!
//! `DuplicateLogicalId` is the exception: it is a structural precondition of a
//! snapshot and fails the whole `diff`/`compare` call, since id-keyed maps would
//! silently collide otherwise.
//!
//! ## Retry Awareness
//!
//! Errors implement `IsRetryable` to indicate whether an operation should be retried.
//! The `RetryPolicy` in `src/retry.rs` uses this to determine retry behavior.
//! Only `PricingLookupFailed`, `Io`, and `Retryable` variants are retryable.

use thiserror::Error;

/// Main error type for stackcost
#[derive(Error, Debug)]
pub enum CostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },

    #[error("pricing lookup failed ({source_name}): {message}")]
    PricingLookupFailed {
        source_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Duplicate logical id '{logical_id}' in {snapshot} template")]
    DuplicateLogicalId { logical_id: String, snapshot: String },

    #[error("invalid price tiers: {reason}")]
    InvalidTierSet { reason: String },

    #[error("usage unit {usage_unit} does not match price tier unit {tier_unit}")]
    UnitMismatch { usage_unit: String, tier_unit: String },

    #[error("invalid usage volume: {0}")]
    InvalidUsage(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Retryable error (attempt {attempt}/{max_attempts}): {reason}")]
    Retryable {
        attempt: u32,
        max_attempts: u32,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CostError {
    /// Lookup failure with an optional underlying cause
    pub fn lookup_failed(
        source_name: impl Into<String>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CostError::PricingLookupFailed {
            source_name: source_name.into(),
            message: message.into(),
            source,
        }
    }

    pub fn invalid_tiers(reason: impl Into<String>) -> Self {
        CostError::InvalidTierSet {
            reason: reason.into(),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid pricing source: {0}")]
    InvalidSource(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CostError>;

/// Trait for determining if an error is retryable
///
/// Used by `RetryPolicy` implementations to determine whether an error
/// should trigger a retry attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CostError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            CostError::Retryable { .. } | CostError::PricingLookupFailed { .. } | CostError::Io(_)
        )
    }
}
