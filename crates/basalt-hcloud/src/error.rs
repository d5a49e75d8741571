//! Error types for the cloud boundary.

use basalt_config::CpuArchitecture;
use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors crossing the cloud collaborator boundary.
#[derive(Debug, Error)]
pub enum CloudError {
    /// An upstream API call failed; the message is propagated unchanged.
    #[error("cloud API error: {0}")]
    Api(String),

    /// A pool requested an image for an architecture that was never
    /// uploaded.
    #[error("no image uploaded for architecture {arch}")]
    MissingImage { arch: CpuArchitecture },
}
