use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot build an index over an empty corpus")]
    EmptyCorpus,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("corrupt index ({component}): {reason}")]
    CorruptIndex { component: String, reason: String },

    #[error("storage failure on '{key}': {source}")]
    StorageFailure {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn corrupt(component: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptIndex { component: component.into(), reason: reason.into() }
    }

    pub fn storage(key: impl Into<String>, source: std::io::Error) -> Self {
        Error::StorageFailure { key: key.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
