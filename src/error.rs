use thiserror::Error;

use crate::parameters::NodeId;

/// Error types for the paramtree-rs library.
#[derive(Error, Debug)]
pub enum ParamTreeError {
    /// Attaching a node would create a cycle or add the same node twice.
    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    /// Detaching a node that is not a direct child of the caller.
    #[error("Ownership error: {0}")]
    Ownership(String),

    /// A name or pattern lookup matched no parameters.
    #[error("No parameter matches: {0}")]
    Lookup(String),

    /// An abstract capability was requested from a node or model that lacks it.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A vector did not have the length the tree expected.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A handle that does not (or no longer) refer to a live node.
    #[error("Invalid node handle: {0:?}")]
    InvalidNode(NodeId),

    /// Invalid input for an operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Error while tying parameters together.
    #[error("Tie error: {0}")]
    Tie(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for paramtree-rs operations.
pub type Result<T> = std::result::Result<T, ParamTreeError>;
