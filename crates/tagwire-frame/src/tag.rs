//! Message-type tags.
//!
//! A tag is a short, case-sensitive ASCII identifier such as `CHECK` or
//! `ERROR`. Two tags are built in; every other tag belongs to the application.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::{FrameError, Result};

/// Liveness check. The built-in handler replies with an empty payload.
pub const CHECK: &str = "CHECK";

/// Error report. The payload is a human-readable description.
pub const ERROR: &str = "ERROR";

/// Longest tag the one-byte length field can carry.
pub const MAX_TAG_LEN: usize = u8::MAX as usize;

/// A validated message-type tag.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(Arc<str>);

impl MessageType {
    /// Validate and wrap a tag.
    pub fn new(tag: impl AsRef<str>) -> Result<Self> {
        let tag = tag.as_ref();
        validate(tag)?;
        Ok(Self(Arc::from(tag)))
    }

    /// Parse a tag straight off the wire.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let tag = std::str::from_utf8(bytes).map_err(|_| {
            FrameError::InvalidTag(format!("not UTF-8 ({} bytes)", bytes.len()))
        })?;
        Self::new(tag)
    }

    /// The built-in `CHECK` tag.
    pub fn check() -> Self {
        Self(Arc::from(CHECK))
    }

    /// The built-in `ERROR` tag.
    pub fn error() -> Self {
        Self(Arc::from(ERROR))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `CHECK` and `ERROR`.
    pub fn is_builtin(&self) -> bool {
        matches!(self.as_str(), CHECK | ERROR)
    }
}

fn validate(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(FrameError::InvalidTag("empty".to_string()));
    }
    if tag.len() > MAX_TAG_LEN {
        return Err(FrameError::InvalidTag(format!(
            "{} bytes, max {MAX_TAG_LEN}",
            tag.len()
        )));
    }
    if let Some(c) = tag.chars().find(|c| !c.is_ascii_graphic()) {
        return Err(FrameError::InvalidTag(format!(
            "{tag:?} contains {c:?}; only printable ASCII without spaces is allowed"
        )));
    }
    Ok(())
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self.0)
    }
}

impl AsRef<str> for MessageType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MessageType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for MessageType {
    type Error = FrameError;

    fn try_from(tag: &str) -> Result<Self> {
        Self::new(tag)
    }
}

impl TryFrom<String> for MessageType {
    type Error = FrameError;

    fn try_from(tag: String) -> Result<Self> {
        Self::new(tag)
    }
}

impl std::str::FromStr for MessageType {
    type Err = FrameError;

    fn from_str(tag: &str) -> Result<Self> {
        Self::new(tag)
    }
}

impl PartialEq<str> for MessageType {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for MessageType {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}
