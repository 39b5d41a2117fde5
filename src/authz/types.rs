use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::authz::errors::AuthzError;
use crate::authz::matcher::ResourcePattern;

/// Wildcard accepted in the action position of a policy tuple.
pub const ANY_ACTION: &str = "*";

/// Outcome a policy tuple asserts when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl FromStr for Effect {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "allow" => Ok(Effect::Allow),
            "deny" => Ok(Effect::Deny),
            other => Err(AuthzError::InvalidPolicy(format!(
                "effect must be `allow` or `deny`, got `{other}`"
            ))),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final answer of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// `(subject, resource pattern, action, effect)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyTuple {
    pub subject: String,
    pub pattern: ResourcePattern,
    pub action: String,
    pub effect: Effect,
}

impl PolicyTuple {
    /// Validates and builds a tuple from raw administrative input.
    pub fn new(
        subject: &str,
        pattern: &str,
        action: &str,
        effect: Effect,
    ) -> Result<Self, AuthzError> {
        let subject = required("subject", subject)?;
        let action = required("action", action)?;
        let pattern = ResourcePattern::parse(pattern)?;
        Ok(Self {
            subject,
            pattern,
            action,
            effect,
        })
    }

    pub fn applies_to_action(&self, action: &str) -> bool {
        self.action == action || self.action == ANY_ACTION
    }
}

impl fmt::Display for PolicyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.subject, self.pattern, self.action, self.effect
        )
    }
}

/// Directed membership relation `member -> role`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupingEdge {
    pub member: String,
    pub role: String,
}

impl GroupingEdge {
    pub fn new(member: &str, role: &str) -> Result<Self, AuthzError> {
        Ok(Self {
            member: required("member", member)?,
            role: required("role", role)?,
        })
    }
}

impl fmt::Display for GroupingEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.member, self.role)
    }
}

/// One record of the persisted policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyLine {
    Policy(PolicyTuple),
    Grouping(GroupingEdge),
}

/// A single administrative change, used for batched mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyChange {
    AddPolicy(PolicyTuple),
    RemovePolicy(PolicyTuple),
    AddGrouping(GroupingEdge),
    RemoveGrouping(GroupingEdge),
}

/// Everything that went into one decision, taken from a single snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub decision: Decision,
    /// The subject followed by every role it transitively holds.
    pub identities: Vec<String>,
    pub matched: Vec<PolicyView>,
}

/// Characters that would split a value across fields or records of the
/// persisted policy file.
const RESERVED_CHARS: [char; 3] = [',', '\n', '\r'];

pub(crate) fn reject_reserved(field: &str, value: &str) -> Result<(), AuthzError> {
    if value.contains(&RESERVED_CHARS[..]) {
        return Err(AuthzError::InvalidPolicy(format!(
            "`{field}` must not contain commas or line breaks"
        )));
    }
    Ok(())
}

fn required(field: &str, value: &str) -> Result<String, AuthzError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AuthzError::InvalidPolicy(format!("`{field}` must not be empty")));
    }
    reject_reserved(field, value)?;
    Ok(value.to_string())
}

// ---------- API request/response types ----------

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionRequest {
    pub subject: String,
    /// Resource pattern, e.g. "/products/{productId}"
    pub object: String,
    pub action: String,
    pub effect: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    pub subject: String,
    /// Concrete request path, e.g. "/products/12"
    pub object: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyView {
    pub subject: String,
    pub object: String,
    pub action: String,
    pub effect: Effect,
}

impl From<&PolicyTuple> for PolicyView {
    fn from(t: &PolicyTuple) -> Self {
        Self {
            subject: t.subject.clone(),
            object: t.pattern.to_string(),
            action: t.action.clone(),
            effect: t.effect,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
