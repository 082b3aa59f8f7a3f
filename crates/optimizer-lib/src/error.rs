//! Error types for the optimizer library

use thiserror::Error;

/// Result alias used throughout the optimizer library
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Errors raised while validating, optimizing or persisting an instance
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The rate plan catalog cannot be priced (zero overage unit size or price, ...)
    #[error("invalid rate plan catalog: {}", .reasons.join("; "))]
    InvalidCatalog { reasons: Vec<String> },

    /// No devices or no rate plans were supplied
    #[error("nothing to optimize: {0}")]
    EmptyInput(String),

    /// The assignment engine was handed a collection without any pools
    #[error("rate pool collection is empty")]
    EmptyRatePoolCollection,

    /// A sequence or checkpoint references a plan that is not in the catalog
    #[error("unknown rate plan: {0}")]
    UnknownPlan(String),

    /// A checkpoint references a device that is not part of the instance
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// A message names a unit of work the instance never created
    #[error("unknown unit of work: {0}")]
    UnknownUnit(String),

    #[error("checkpoint cache error: {0}")]
    Cache(String),

    #[error("work queue error: {0}")]
    Queue(String),

    #[error("instance store error: {0}")]
    Store(String),

    #[error("notification error: {0}")]
    Notification(String),

    /// A checkpoint could not be decoded or has an unsupported version
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OptimizerError {
    /// Errors that abort an instance outright rather than being retried
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimizerError::InvalidCatalog { .. }
                | OptimizerError::EmptyInput(_)
                | OptimizerError::EmptyRatePoolCollection
                | OptimizerError::UnknownPlan(_)
                | OptimizerError::UnknownDevice(_)
                | OptimizerError::InstanceNotFound(_)
                | OptimizerError::UnknownUnit(_)
                | OptimizerError::Checkpoint(_)
                | OptimizerError::Serialization(_)
        )
    }

    /// Errors from external collaborators that may succeed on redelivery
    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_catalog_message_lists_reasons() {
        let err = OptimizerError::InvalidCatalog {
            reasons: vec!["plan a: bad".to_string(), "plan b: worse".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid rate plan catalog: plan a: bad; plan b: worse"
        );
        assert!(err.is_terminal());
    }

    #[test]
    fn test_collaborator_errors_are_retryable() {
        assert!(OptimizerError::Queue("down".into()).is_retryable());
        assert!(OptimizerError::Cache("down".into()).is_retryable());
        assert!(OptimizerError::Store("down".into()).is_retryable());
        assert!(!OptimizerError::EmptyRatePoolCollection.is_retryable());
    }
}
