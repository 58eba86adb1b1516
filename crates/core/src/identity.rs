//! Stable agent identity derivation.
//!
//! `AgentId` is a 32-hex-character string derived from host + project path
//! (+ optional subagent type). Re-running on the same host in the same
//! project yields the same id; moving the project folder would normally
//! change it, which is why config overrides (`agent_id_override`,
//! `project_path_override`) exist and MUST be honored ahead of derivation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// A stable 32-hex-character agent identifier.
///
/// Wrapped rather than a bare `String` so capability/channel strings can't
/// be passed where an agent id is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AgentId(String);

impl AgentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate and wrap an already-derived 32-hex string (e.g. read back
    /// from the KV identity cache or supplied via `agent_id_override`).
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.len() != 32 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidArgument(format!(
                "agent id must be 32 hex characters, got {raw:?}"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Derive a root agent id from host + project path.
    pub fn derive_root(hostname: &str, project_path: &str) -> Self {
        derive(&[hostname.as_bytes(), project_path.as_bytes(), b""])
    }

    /// Derive a subagent id that mixes in the parent id and subagent type,
    /// so sibling subagents under one parent never collide.
    pub fn derive_subagent(parent: &AgentId, subagent_type: &str) -> Self {
        derive(&[parent.0.as_bytes(), subagent_type.as_bytes()])
    }
}

fn derive(parts: &[&[u8]]) -> AgentId {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\0");
        }
        hasher.update(part);
    }
    let digest = hasher.finalize();
    AgentId(hex::encode(digest)[..32].to_string())
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AgentId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentId::parse(s)
    }
}

impl Serialize for AgentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AgentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AgentId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Resolves the caller's identity for this process, honoring config
/// overrides ahead of derivation.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    pub hostname: String,
    pub project_path: String,
    pub project_id_override: Option<String>,
    pub agent_id_override: Option<String>,
    pub subagent_type: Option<String>,
}

impl IdentityResolver {
    /// Resolve this process's `AgentId`: override wins, else derive.
    pub fn resolve(&self) -> Result<AgentId, Error> {
        if let Some(raw) = &self.agent_id_override {
            return AgentId::parse(raw);
        }
        let root = AgentId::derive_root(&self.hostname, &self.project_path);
        match &self.subagent_type {
            Some(t) if !t.is_empty() => Ok(AgentId::derive_subagent(&root, t)),
            _ => Ok(root),
        }
    }

    /// Resolve the project namespace: override wins, else derived from path.
    pub fn project_id(&self) -> String {
        if let Some(id) = &self.project_id_override {
            return id.clone();
        }
        let digest = Sha256::digest(self.project_path.as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_derivation_is_stable() {
        let a = AgentId::derive_root("host1", "/proj/a");
        let b = AgentId::derive_root("host1", "/proj/a");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn different_project_yields_different_id() {
        let a = AgentId::derive_root("host1", "/proj/a");
        let b = AgentId::derive_root("host1", "/proj/b");
        assert_ne!(a, b);
    }

    #[test]
    fn subagents_of_same_parent_do_not_collide() {
        let parent = AgentId::derive_root("host1", "/proj/a");
        let s1 = AgentId::derive_subagent(&parent, "reviewer");
        let s2 = AgentId::derive_subagent(&parent, "planner");
        assert_ne!(s1, s2);
    }

    #[test]
    fn parse_rejects_wrong_length_or_non_hex() {
        assert!(AgentId::parse("deadbeef").is_err());
        assert!(AgentId::parse(&"g".repeat(32)).is_err());
        assert!(AgentId::parse(&"a".repeat(32)).is_ok());
    }

    #[test]
    fn override_wins_over_derivation() {
        let resolver = IdentityResolver {
            hostname: "host1".into(),
            project_path: "/proj/a".into(),
            project_id_override: None,
            agent_id_override: Some("b".repeat(32)),
            subagent_type: None,
        };
        assert_eq!(resolver.resolve().unwrap().as_str(), "b".repeat(32));
    }

    #[test]
    fn subagent_type_changes_resolved_identity() {
        let base = IdentityResolver {
            hostname: "host1".into(),
            project_path: "/proj/a".into(),
            project_id_override: None,
            agent_id_override: None,
            subagent_type: None,
        };
        let sub = IdentityResolver {
            subagent_type: Some("reviewer".into()),
            ..base.clone()
        };
        assert_ne!(base.resolve().unwrap(), sub.resolve().unwrap());
    }
}
