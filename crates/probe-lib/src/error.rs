//! Error types for cluster access, metrics reads and remediation

use std::time::Duration;
use thiserror::Error;

use crate::collector::QuantityError;

/// Errors returned by the cluster and metrics API seams
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The requested object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The object was modified since it was read (HTTP 409)
    #[error("write conflict: {0}")]
    Conflict(String),

    /// Any other API failure
    #[error("cluster API error: {0}")]
    Api(#[source] kube::Error),

    /// The API answered with an object we could not interpret
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 409 => ClusterError::Conflict(resp.message),
            other => ClusterError::Api(other),
        }
    }
}

/// Reasons a memory reading could not be produced
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics for pod {pod} unavailable: {source}")]
    Unavailable {
        pod: String,
        #[source]
        source: ClusterError,
    },

    #[error("memory usage {value:?} for pod {pod} is not a valid quantity: {source}")]
    InvalidQuantity {
        pod: String,
        value: String,
        #[source]
        source: QuantityError,
    },

    #[error("pod {pod} reports no container memory usage")]
    NoContainerUsage { pod: String },
}

/// Failures of a remediation run, one per terminal state
#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("memory limit overflows: {baseline} bytes x {factor}")]
    LimitOverflow { baseline: u64, factor: i64 },

    #[error("failed to fetch deployment {deployment}: {source}")]
    Fetch {
        deployment: String,
        #[source]
        source: ClusterError,
    },

    #[error("deployment {deployment} has no container at index {index}")]
    ContainerMissing { deployment: String, index: usize },

    #[error("failed to update deployment {deployment}: {source}")]
    Update {
        deployment: String,
        #[source]
        source: ClusterError,
    },

    #[error("update of deployment {deployment} still conflicting after {attempts} attempts")]
    RetryExhausted { deployment: String, attempts: u32 },

    #[error("deployment {deployment} not ready after {waited:?}")]
    ReadyTimeout { deployment: String, waited: Duration },

    #[error("wait for deployment {deployment} cancelled")]
    Cancelled { deployment: String },
}

impl RemediationError {
    /// True when the failure came from optimistic concurrency and the
    /// fetch-modify-submit sequence may be retried
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemediationError::Update { source, .. } if source.is_conflict())
    }
}
