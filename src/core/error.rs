//! Error types and status mapping.
//!
//! The liveness core is infallible from the caller's point of view; these
//! errors come from composite-key parsing and admission control. Each maps to
//! the HTTP status the REST layer in front of Nexus reports.

use thiserror::Error;

/// Common Nexus error conditions.
#[derive(Debug, Error)]
pub enum NexusError {
    /// A composite node key could not be parsed.
    #[error("invalid node key {key:?}: {reason}")]
    InvalidNodeKey { key: String, reason: String },

    /// License validity window has passed.
    #[error("license {license_key} expired")]
    LicenseExpired { license_key: String },

    /// License was revoked.
    #[error("license {license_key} revoked")]
    LicenseRevoked { license_key: String },

    /// License carries no scope for the product.
    #[error("license does not cover product {product_id}")]
    ProductNotCovered { product_id: u64 },

    /// Binding a new device would exceed the scope's node limit.
    #[error("maximum nodes exceeded for product {product_id} (limit {limit})")]
    MaxNodesExceeded { product_id: u64, limit: u32 },

    /// Admitting another session would exceed the scope's concurrency limit.
    #[error("maximum concurrent sessions exceeded for product {product_id} ({current}/{limit})")]
    ConcurrencyLimitExceeded {
        product_id: u64,
        limit: u32,
        current: usize,
    },

    /// License data is inconsistent.
    #[error("invalid license: {message}")]
    InvalidLicense { message: String },

    /// Invalid request.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl NexusError {
    /// Create an InvalidNodeKey error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidLicense error.
    pub fn invalid_license(message: impl Into<String>) -> Self {
        Self::InvalidLicense {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Check if retrying the same request later may succeed.
    ///
    /// Only a concurrency rejection clears by itself, once another session
    /// of the same license goes offline.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrencyLimitExceeded { .. })
    }

    /// HTTP status code reported for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidNodeKey { .. }
            | Self::LicenseExpired { .. }
            | Self::InvalidLicense { .. }
            | Self::InvalidRequest { .. } => 400,
            Self::LicenseRevoked { .. } | Self::ProductNotCovered { .. } => 403,
            Self::MaxNodesExceeded { .. } => 409,
            Self::ConcurrencyLimitExceeded { .. } => 429,
        }
    }

    /// Short metric label for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidNodeKey { .. } => "invalid_key",
            Self::LicenseExpired { .. } => "expired",
            Self::LicenseRevoked { .. } => "revoked",
            Self::ProductNotCovered { .. } => "not_covered",
            Self::MaxNodesExceeded { .. } => "max_nodes",
            Self::ConcurrencyLimitExceeded { .. } => "max_concurrent",
            Self::InvalidLicense { .. } => "invalid_license",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }
}

/// Result type using NexusError.
pub type NexusResult<T> = Result<T, NexusError>;
