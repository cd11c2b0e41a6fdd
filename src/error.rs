use thiserror::Error;

use crate::diag::DiagKind;

#[derive(Error, Debug)]
pub enum DiffcovError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("({kind}) {message}")]
    Fatal { kind: DiagKind, message: String },

    #[error("Worker failure: {0}")]
    Worker(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DiffcovError>;
