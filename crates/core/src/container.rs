//! Container hierarchy references.
//!
//! Research data is organised as group → project → session → acquisition,
//! with analyses attachable at any level. The job queue never walks the
//! hierarchy; it only records which containers a job reads from and writes to.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::ContainerId;

/// Level of a container in the hierarchy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Group,
    Project,
    Session,
    Acquisition,
    Analysis,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Group => "group",
            ContainerKind::Project => "project",
            ContainerKind::Session => "session",
            ContainerKind::Acquisition => "acquisition",
            ContainerKind::Analysis => "analysis",
        }
    }

    /// Collection name used in resource paths (`/sessions/{id}/...`).
    pub fn collection(&self) -> &'static str {
        match self {
            ContainerKind::Group => "groups",
            ContainerKind::Project => "projects",
            ContainerKind::Session => "sessions",
            ContainerKind::Acquisition => "acquisitions",
            ContainerKind::Analysis => "analyses",
        }
    }
}

impl core::fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(ContainerKind::Group),
            "project" => Ok(ContainerKind::Project),
            "session" => Ok(ContainerKind::Session),
            "acquisition" => Ok(ContainerKind::Acquisition),
            "analysis" => Ok(ContainerKind::Analysis),
            other => Err(DomainError::validation(format!(
                "unknown container kind '{other}'"
            ))),
        }
    }
}

/// Typed pointer at a single container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRef {
    #[serde(rename = "type")]
    pub kind: ContainerKind,
    pub id: ContainerId,
}

impl ContainerRef {
    pub fn new(kind: ContainerKind, id: ContainerId) -> Self {
        Self { kind, id }
    }

    /// Resource path of the container, e.g. `/acquisitions/{id}`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.kind.collection(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_uses_plural_collection() {
        let id = ContainerId::new();
        let r = ContainerRef::new(ContainerKind::Acquisition, id);
        assert_eq!(r.path(), format!("/acquisitions/{id}"));
    }

    #[test]
    fn kind_parses_from_its_display_form() {
        for kind in [
            ContainerKind::Group,
            ContainerKind::Project,
            ContainerKind::Session,
            ContainerKind::Acquisition,
            ContainerKind::Analysis,
        ] {
            assert_eq!(kind.to_string().parse::<ContainerKind>().unwrap(), kind);
        }
        assert!("subject".parse::<ContainerKind>().is_err());
    }

    #[test]
    fn container_ref_serializes_kind_as_type() {
        let r = ContainerRef::new(ContainerKind::Session, ContainerId::new());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["type"], "session");
    }
}
