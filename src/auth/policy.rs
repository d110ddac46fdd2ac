//! Actions, roles and the action → role policy table

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Operations on the relay that are subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Store (publish) an event
    Save,
    /// Run a subscription query
    Query,
}

impl Action {
    /// Every action the policy table must cover
    pub const ALL: [Action; 2] = [Action::Save, Action::Query];

    /// Parse a wire name (`save`, `query`)
    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "save" => Some(Action::Save),
            "query" => Some(Action::Query),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Save => "save",
            Action::Query => "query",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-character capability codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// `a`: no restriction (in a requirement) or no privilege (in a token)
    Anonymous,
    /// `r`
    Reader,
    /// `w`
    Writer,
    /// `s`: trusted service
    Service,
}

impl Role {
    pub fn from_code(c: char) -> Option<Role> {
        match c {
            'a' => Some(Role::Anonymous),
            'r' => Some(Role::Reader),
            'w' => Some(Role::Writer),
            's' => Some(Role::Service),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            Role::Anonymous => 'a',
            Role::Reader => 'r',
            Role::Writer => 'w',
            Role::Service => 's',
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleParseError {
    #[error("role set cannot be empty")]
    Empty,

    #[error("unknown role code '{0}': must be one of a, r, w, s")]
    UnknownCode(char),
}

/// A non-empty set of roles
///
/// The textual form is the concatenation of role codes, e.g. `"rw"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoleSet {
    roles: BTreeSet<Role>,
}

impl RoleSet {
    /// The `{a}` set: default for unassigned keys and unconfigured actions
    pub fn anonymous() -> Self {
        Self::single(Role::Anonymous)
    }

    pub fn single(role: Role) -> Self {
        Self {
            roles: BTreeSet::from([role]),
        }
    }

    /// Build a set from roles, rejecting an empty input
    pub fn from_roles(roles: impl IntoIterator<Item = Role>) -> Result<Self, RoleParseError> {
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            return Err(RoleParseError::Empty);
        }
        Ok(Self { roles })
    }

    /// Parse a string of role codes; duplicates collapse, surrounding
    /// whitespace is ignored
    pub fn parse(s: &str) -> Result<Self, RoleParseError> {
        let roles = s
            .trim()
            .chars()
            .map(|c| Role::from_code(c).ok_or(RoleParseError::UnknownCode(c)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_roles(roles)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// True if the two sets share at least one role
    pub fn intersects(&self, other: &RoleSet) -> bool {
        self.roles.iter().any(|r| other.roles.contains(r))
    }

    /// True if this is exactly `{a}`
    pub fn is_anonymous(&self) -> bool {
        self.roles.len() == 1 && self.contains(Role::Anonymous)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.roles.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Never true for a constructed set
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RoleSet {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for role in &self.roles {
            write!(f, "{}", role)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RoleSet {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleSet::parse(s)
    }
}

impl Serialize for RoleSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RoleSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        RoleSet::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown action '{0}': must be one of save, query")]
    UnknownAction(String),

    #[error("invalid roles for action '{action}': {source}")]
    InvalidRoles {
        action: String,
        #[source]
        source: RoleParseError,
    },
}

/// Finalized action → required roles table
///
/// Covers every [`Action`]; built once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    required: HashMap<Action, RoleSet>,
}

impl Policy {
    /// The unrestricted policy: every action requires `{a}`
    pub fn open() -> Self {
        Self {
            required: Action::ALL
                .iter()
                .map(|a| (*a, RoleSet::anonymous()))
                .collect(),
        }
    }

    /// Build from a configuration mapping of action names to role codes.
    /// Unspecified actions default to `{a}`.
    pub fn from_config(actions: &BTreeMap<String, String>) -> Result<Self, PolicyError> {
        let mut policy = Self::open();

        for (name, codes) in actions {
            let action =
                Action::parse(name).ok_or_else(|| PolicyError::UnknownAction(name.clone()))?;
            let roles = RoleSet::parse(codes).map_err(|source| PolicyError::InvalidRoles {
                action: name.clone(),
                source,
            })?;
            policy.required.insert(action, roles);
        }

        Ok(policy)
    }

    /// Build from already-typed requirements
    pub fn from_requirements(requirements: impl IntoIterator<Item = (Action, RoleSet)>) -> Self {
        let mut policy = Self::open();
        policy.required.extend(requirements);
        policy
    }

    /// Roles required for `action`, `{a}` if the table has no entry
    pub fn required(&self, action: Action) -> RoleSet {
        self.required
            .get(&action)
            .cloned()
            .unwrap_or_else(RoleSet::anonymous)
    }

    /// True if the action needs no authentication
    pub fn is_open(&self, action: Action) -> bool {
        self.required
            .get(&action)
            .map_or(true, RoleSet::is_anonymous)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::open()
    }
}
