use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("store stream ended unexpectedly")]
    UnexpectedEof,

    #[error("failed to encode value for key {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: postcard::Error,
    },

    #[error("failed to decode value under key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: postcard::Error,
    },

    #[error("expected a {expected} under key {key}")]
    UnexpectedShape { key: String, expected: &'static str },
}

impl StoreError {
    /// Hiccups of the store client that are worth retrying after freeing local resources.
    /// Blocking-resource exhaustion surfaces as an [`io::ErrorKind::WouldBlock`] I/O error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::UnexpectedEof)
    }
}
