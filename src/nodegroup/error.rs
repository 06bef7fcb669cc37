use thiserror::Error;

use crate::version::error::AlignmentError;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("Node-group configuration must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Invalid node-group configuration: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AwsError {
    #[error("AWS {operation} failed: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },

    #[error("Unexpected response from AWS {operation}: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },
}

/// Failure anywhere in the extraction pipeline
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error(transparent)]
    Aws(#[from] AwsError),

    #[error("Node group {nodegroup} has no known driver version; container-first needs one")]
    MissingDriverVersion { nodegroup: String },
}
