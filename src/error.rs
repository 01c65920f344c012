//! Error taxonomy shared by models, proposals, the sampling driver and chain stores.

use thiserror::Error;

/// Errors raised while configuring or running a Metropolis–Hastings chain.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum McmcError {
    /// Invalid sampler or tuner settings. Always raised before the first step.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A [`ModelState`](crate::model::ModelState) or
    /// [`ProposalState`](crate::proposal::ProposalState) failed validation on restore.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Gradient access on a model without gradient support, or a similar
    /// capability mismatch.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Non-finite log-likelihood, log-prior, gradient or acceptance ratio.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// The chain store rejected a read or write.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl McmcError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        McmcError::Configuration(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        McmcError::InvalidState(msg.into())
    }

    pub(crate) fn numerical(msg: impl Into<String>) -> Self {
        McmcError::Numerical(msg.into())
    }

    /// `true` for errors raised by a [`ChainStore`](crate::store::ChainStore).
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            McmcError::Persistence(_) | McmcError::Io(_) | McmcError::Serde(_)
        )
    }
}

pub type Result<T, E = McmcError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_count_as_persistence() {
        let err: McmcError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert!(err.is_persistence());
        assert!(err.to_string().contains("disk full"));
        assert!(!McmcError::numerical("nan").is_persistence());
    }
}
