//! Strong type definitions for Tessera.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

/// Replica-private write counter assigned by a storage driver.
pub type LocalIndex = i64;

/// `max_local_index` of a driver that has never stored a document.
pub const NO_LOCAL_INDEX: LocalIndex = -1;

/// Microseconds since the Unix epoch.
pub type Timestamp = i64;

/// Address of a workspace, e.g. `+gardening.a1b2c3`.
///
/// Deserialization does not check syntax; documents from peers are checked
/// by the validator so a bad address becomes a validation outcome.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Parse and syntax-check a workspace address.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        check_workspace_address(s)?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Workspace({})", self.0)
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WorkspaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `+` name `.` suffix; name is 1-15 lowercase alphanumerics starting with a
/// letter, suffix is 1-53 lowercase alphanumerics.
pub fn check_workspace_address(s: &str) -> Result<(), ValidationError> {
    let err = || ValidationError::InvalidWorkspace(s.to_string());

    let rest = s.strip_prefix('+').ok_or_else(err)?;
    let (name, suffix) = rest.split_once('.').ok_or_else(err)?;

    let lower_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    if name.is_empty() || name.len() > 15 || !name.chars().all(lower_alnum) {
        return Err(err());
    }
    if !name.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(err());
    }
    if suffix.is_empty() || suffix.len() > 53 || !suffix.chars().all(lower_alnum) {
        return Err(err());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_parse() {
        assert!(WorkspaceId::parse("+gardening.abc123").is_ok());
        assert!(WorkspaceId::parse("+a.b").is_ok());

        assert!(WorkspaceId::parse("gardening.abc").is_err());
        assert!(WorkspaceId::parse("+gardening").is_err());
        assert!(WorkspaceId::parse("+Gardening.abc").is_err());
        assert!(WorkspaceId::parse("+1garden.abc").is_err());
        assert!(WorkspaceId::parse("+garden.").is_err());
        assert!(WorkspaceId::parse("+garden.a.b").is_err());
        assert!(WorkspaceId::parse("+waytoolongworkspacename.abc").is_err());
    }

    #[test]
    fn test_workspace_display() {
        let ws = WorkspaceId::parse("+club.xyz").unwrap();
        assert_eq!(ws.to_string(), "+club.xyz");
        assert_eq!(format!("{:?}", ws), "Workspace(+club.xyz)");
    }
}
