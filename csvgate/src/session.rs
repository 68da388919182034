//! Upload sessions.
//!
//! A session is one client upload attempt. Its token names the session
//! directory on the server and keys the session's row in the log store,
//! so both tokens and file names are restricted to values that are safe
//! to use as a single path component.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{CsvgateError, CsvgateResult};

/// Maximum length of a session token.
const MAX_TOKEN_LENGTH: usize = 64;

/// Maximum length of a file name, in bytes.
const MAX_FILE_NAME_LENGTH: usize = 255;

/// The token of an upload session.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionToken(String);

/// The name of a file inside an upload session.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FileName(String);

impl SessionToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a token, validating it.
    pub fn new(token: String) -> CsvgateResult<Self> {
        let reason = if token.is_empty() {
            Some("must not be empty")
        } else if token.len() > MAX_TOKEN_LENGTH {
            Some("is too long")
        } else if !token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            Some("may only contain ASCII letters, digits, '-' and '_'")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CsvgateError::InvalidSessionToken { token, reason }),
            None => Ok(Self(token)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FileName {
    /// Creates a file name, validating it.
    pub fn new(name: String) -> CsvgateResult<Self> {
        let reason = if name.is_empty() {
            Some("must not be empty")
        } else if name.len() > MAX_FILE_NAME_LENGTH {
            Some("is too long")
        } else if name == "." || name == ".." {
            Some("must not be a relative directory")
        } else if name.contains(['/', '\\', '\0']) {
            Some("must not contain path separators")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CsvgateError::InvalidFileName { name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name of chunk `index` of this file.
    pub fn chunk_name(&self, index: u32) -> String {
        format!("{}.part{}", self.0, index)
    }
}

impl FromStr for SessionToken {
    type Err = CsvgateError;

    fn from_str(s: &str) -> CsvgateResult<Self> {
        Self::new(s.to_owned())
    }
}

impl FromStr for FileName {
    type Err = CsvgateError;

    fn from_str(s: &str) -> CsvgateResult<Self> {
        Self::new(s.to_owned())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SessionToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for FileName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(de::Error::custom)
    }
}
