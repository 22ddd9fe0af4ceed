//! Identifiers for teams, members, objectives and pin holders.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ModelError;

/// Identifier of a team, assigned by the backend when the team is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(pub i64);

impl TeamId {
    /// Raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "team#{}", self.0)
    }
}

/// Unique identifier for a team member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(Ulid);

impl MemberId {
    /// Generate a new MemberId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for MemberId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Namespaced key of an objective, written `namespace:key`.
///
/// Serialized as its string form so it can be used as a JSON map key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectiveKey {
    namespace: String,
    key: String,
}

impl ObjectiveKey {
    /// Build a key from its two parts. Neither part may be empty or contain `:`.
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Result<Self, ModelError> {
        let namespace = namespace.into();
        let key = key.into();
        if namespace.is_empty() || key.is_empty() || namespace.contains(':') || key.contains(':') {
            return Err(ModelError::InvalidKey(format!("{}:{}", namespace, key)));
        }
        Ok(Self { namespace, key })
    }

    /// Namespace part.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key part.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for ObjectiveKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

impl std::str::FromStr for ObjectiveKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((namespace, key)) => Self::new(namespace, key),
            None => Err(ModelError::InvalidKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for ObjectiveKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectiveKey> for String {
    fn from(key: ObjectiveKey) -> Self {
        key.to_string()
    }
}

/// Identity of whoever holds a cache pin (a plugin, a command, a scheduled job).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requester(pub String);

impl Requester {
    /// Create a new requester identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The engine itself.
    pub fn system() -> Self {
        Self("system".to_string())
    }
}

impl std::fmt::Display for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_objective_key_parse() {
        let key: ObjectiveKey = "quests:first_steps".parse().unwrap();
        assert_eq!(key.namespace(), "quests");
        assert_eq!(key.key(), "first_steps");
        assert_eq!(key.to_string(), "quests:first_steps");
    }

    #[test]
    fn test_objective_key_rejects_malformed() {
        assert!("no_namespace".parse::<ObjectiveKey>().is_err());
        assert!(":empty".parse::<ObjectiveKey>().is_err());
        assert!("empty:".parse::<ObjectiveKey>().is_err());
        assert!("a:b:c".parse::<ObjectiveKey>().is_err());
    }

    #[test]
    fn test_objective_key_as_json_map_key() {
        let mut map = BTreeMap::new();
        map.insert(ObjectiveKey::new("quests", "mine").unwrap(), 3u32);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"quests:mine":3}"#);

        let back: BTreeMap<ObjectiveKey, u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_member_id_from_str() {
        let id = MemberId::new();
        let parsed: MemberId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_team_id_display() {
        assert_eq!(TeamId(7).to_string(), "team#7");
    }
}
