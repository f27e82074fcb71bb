use std::path::PathBuf;

use thiserror::Error;

use crate::classes::ClassLabel;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error{}: {message}", line.map(|l| format!(" at line {l}")).unwrap_or_default())]
    Parse { line: Option<u64>, message: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("class {0} has no entry in the colour map")]
    UnmappedClass(ClassLabel),

    #[error("model is not available")]
    ModelUnavailable,

    #[error("invalid model artifact: {0}")]
    Model(String),

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(line: Option<u64>, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
