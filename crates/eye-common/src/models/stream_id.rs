//! Stream identifiers.
//!
//! The broadcaster picks the id when it starts streaming; the viewer only ever
//! receives it from the catalog or the user, so any non-empty text is accepted.
//! Callers percent-encode it when it becomes a URL path segment
//! (`/ws/view/{id}`, `/past-streams/{id}`). The dot segments `.` and `..` are
//! refused because URL normalisation would collapse them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// Opaque token naming one broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Result<Self, CommonError> {
        let id = id.into();
        let reason = if id.is_empty() {
            Some("must not be empty")
        } else if id == "." || id == ".." {
            Some("must not be a dot segment")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(CommonError::InvalidStreamId { id, reason }),
            None => Ok(Self(id)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for StreamId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for StreamId {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_any_non_empty_text() {
        for id in ["abc123", "stream_8f2a", "9b1d-44c0", "unit 7", "a/b", "50%", "..."] {
            let parsed: StreamId = id.parse().unwrap();
            assert_eq!(parsed.as_str(), id);
        }
    }

    #[test]
    fn rejects_empty_and_dot_segments() {
        for id in ["", ".", ".."] {
            assert!(StreamId::new(id).is_err(), "{id:?} should be rejected");
        }
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let ok: StreamId = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(ok.to_string(), "abc123");
        let spaced: StreamId = serde_json::from_str("\"unit 7\"").unwrap();
        assert_eq!(spaced.as_str(), "unit 7");
        assert!(serde_json::from_str::<StreamId>("\"\"").is_err());
    }
}
