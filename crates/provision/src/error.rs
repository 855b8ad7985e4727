//! Error taxonomy for the provisioning pipeline.
//!
//! The split matters for retry policy: transient failures are retried
//! with backoff, chain rejections never are (retrying a creation call
//! would mint a duplicate contract), and consistency failures abort the
//! run outright.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the deployment pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Bad profile, template, artifact or credential. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// RPC timeout, connection reset, or similar. Retried with bounded backoff.
    #[error("transient network error: {0}")]
    Transient(String),

    /// The chain rejected the operation (revert, out of gas, nonce conflict).
    /// Fatal for the step: a blind retry of a creation call produces a
    /// duplicate on-chain entity.
    #[error("chain rejected {operation}: {reason}")]
    ChainRejection { operation: String, reason: String },

    /// The network did not report inclusion within the configured timeout.
    #[error("timed out waiting for confirmation of {0}")]
    ConfirmationTimeout(String),

    /// A post-confirmation read did not match the expected state. The remote
    /// state diverged from expectation and must not be silently accepted.
    #[error("on-chain state diverged: expected {expected}, found {actual}")]
    Consistency { expected: String, actual: String },

    /// The verification service rejected or failed the submission.
    #[error("verification of {address} failed: {reason}")]
    Verification {
        address: String,
        reason: String,
        retriable: bool,
    },
}

impl ProvisionError {
    /// Whether the error may resolve on its own and is safe to retry.
    pub fn is_transient(&self) -> bool {
        match self {
            ProvisionError::Transient(_) => true,
            ProvisionError::Verification { retriable, .. } => *retriable,
            _ => false,
        }
    }
}

/// Errors produced by the artifact template renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template not found: {0}")]
    TemplateNotFound(PathBuf),

    /// Malformed conditional or variable reference in the template.
    #[error("template syntax error: {0}")]
    Syntax(String),

    #[error("failed to write rendered output to {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
