//! Error types for code generation

use thiserror::Error;

/// Result type for codegen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during code generation
///
/// Validation findings are not errors; they come back as
/// [`Compilation::Rejected`](crate::Compilation::Rejected). These variants
/// mean the generator met a shape it cannot express.
#[derive(Error, Debug)]
pub enum Error {
    /// The validated model has a shape the generator cannot represent
    #[error("internal compiler error in agent '{agent}': {message}")]
    Internal {
        /// Agent being generated
        agent: String,
        /// Error description
        message: String,
    },

    /// Service template failed to render
    #[error("invalid template: {0}")]
    InvalidTemplate(#[from] minijinja::Error),

    /// Front-end failure while reading the project
    #[error(transparent)]
    Core(#[from] agentmark_core::Error),
}

impl Error {
    pub(crate) fn internal(agent: &str, message: impl Into<String>) -> Self {
        Error::Internal {
            agent: agent.to_string(),
            message: message.into(),
        }
    }
}
