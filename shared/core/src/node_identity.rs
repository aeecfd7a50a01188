use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable peer identifier of a worker. Every store subkey a worker owns is derived from it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerKey(String);

#[derive(Error, Debug, PartialEq)]
pub enum ParseWorkerKeyError {
    #[error("worker key is empty")]
    Empty,
    #[error("worker key {0:?} contains whitespace or '_'")]
    InvalidChar(String),
}

impl WorkerKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ParseWorkerKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(ParseWorkerKeyError::Empty);
        }
        // '_' separates the components of store keys built from this identifier.
        if key.chars().any(|c| c.is_whitespace() || c == '_') {
            return Err(ParseWorkerKeyError::InvalidChar(key));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines and run names.
    pub fn fmt_short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkerKey {
    type Err = ParseWorkerKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for WorkerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
