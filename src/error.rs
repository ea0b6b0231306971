//! Error types for resoql.
//!
//! One enum covers the whole pipeline: syntax errors from the parser
//! (carrying a source position), semantic errors from the compiler, resolver
//! contract violations and runtime evaluation failures. Nothing is recovered
//! locally; every stage either succeeds completely or raises.

use thiserror::Error;

/// resoql error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Syntax error at position {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Resolver error: {0}")]
    Resolver(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Error::Syntax {
            message: message.into(),
            position,
        }
    }
}

/// Result type for resoql operations
pub type Result<T> = std::result::Result<T, Error>;

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}
