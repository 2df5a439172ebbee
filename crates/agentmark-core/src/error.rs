//! Error types for agentmark-core
//!
//! These cover failures of the environment around the compiler (missing
//! directories, unreadable documents). Problems in the documents themselves
//! are reported as [`Diagnostic`](crate::diagnostic::Diagnostic)s, not errors.

use thiserror::Error;

/// Result type alias for agentmark-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agentmark-core
#[derive(Error, Debug)]
pub enum Error {
    /// Project root could not be found
    #[error("project directory not found: {path}")]
    ProjectNotFound {
        /// Path that was searched
        path: String,
    },

    /// The `agents/` directory is missing from the project root
    #[error("agents/ directory not found in {path}")]
    AgentsDirNotFound {
        /// Project root that was searched
        path: String,
    },

    /// A document could not be read
    #[error("failed to read document '{path}': {source}")]
    ReadDocument {
        /// Path of the document
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Directory traversal failed
    #[error("failed to enumerate documents: {0}")]
    Walk(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
