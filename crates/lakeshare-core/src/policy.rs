//! In-memory model of cloud access policy documents.
//!
//! The model mirrors the JSON grammar closely enough to round-trip real
//! documents: `Action`, `Resource` and condition values accept either a
//! single string or an array, and are always written back as arrays.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Policy language version written on every document.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Statement id of the placeholder a document holds when it has nothing else.
pub const EMPTY_STATEMENT_SID: &str = "EmptyStatement";

/// A list of strings that may be encoded as one bare string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StringList(pub Vec<String>);

impl StringList {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(items.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    /// Append `value` unless already present. Returns whether it was added.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.contains(&value) {
            false
        } else {
            self.0.push(value);
            true
        }
    }

    /// Remove every occurrence of `value`. Returns whether anything was removed.
    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|v| v != value);
        before != self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(s) => StringList(vec![s]),
            OneOrMany::Many(v) => StringList(v),
        })
    }
}

impl From<Vec<String>> for StringList {
    fn from(v: Vec<String>) -> Self {
        Self(v)
    }
}

/// Allow or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// The `Principal` element of a resource policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Principal {
    /// `{"AWS": [...]}`
    Aws {
        #[serde(rename = "AWS")]
        aws: StringList,
    },
    /// A bare principal such as `"*"`.
    Wildcard(String),
    /// Service or federated principals, carried through untouched.
    Other(BTreeMap<String, StringList>),
}

impl Principal {
    pub fn any() -> Self {
        Principal::Wildcard("*".to_string())
    }

    pub fn aws<I, S>(arns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Principal::Aws {
            aws: StringList::new(arns),
        }
    }

    /// The AWS principal list, if this is one.
    pub fn aws_list(&self) -> Option<&StringList> {
        match self {
            Principal::Aws { aws } => Some(aws),
            Principal::Wildcard(_) | Principal::Other(_) => None,
        }
    }

    pub fn aws_list_mut(&mut self) -> Option<&mut StringList> {
        match self {
            Principal::Aws { aws } => Some(aws),
            Principal::Wildcard(_) | Principal::Other(_) => None,
        }
    }
}

/// Condition operator -> condition key -> values.
pub type Conditions = BTreeMap<String, BTreeMap<String, StringList>>;

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Sid", default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Action")]
    pub actions: StringList,
    #[serde(rename = "Resource", default)]
    pub resources: StringList,
    #[serde(rename = "Condition", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: Conditions,
}

impl Statement {
    /// An `Allow` statement with no principal or conditions.
    pub fn allow<A, R>(sid: impl Into<String>, actions: A, resources: R) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Self {
            sid: Some(sid.into()),
            effect: Effect::Allow,
            principal: None,
            actions: StringList::new(actions),
            resources: StringList::new(resources),
            conditions: Conditions::new(),
        }
    }

    /// The placeholder statement of an otherwise empty document.
    pub fn empty_placeholder() -> Self {
        Self::allow(EMPTY_STATEMENT_SID, ["none:null"], ["*"])
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    /// Add a condition value under `operator` / `key`.
    pub fn with_condition<I, S>(mut self, operator: &str, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .entry(operator.to_string())
            .or_default()
            .insert(key.to_string(), StringList::new(values));
        self
    }

    pub fn sid(&self) -> &str {
        self.sid.as_deref().unwrap_or("")
    }

    pub fn is_placeholder(&self) -> bool {
        self.sid() == EMPTY_STATEMENT_SID
    }

    pub fn condition(&self, operator: &str, key: &str) -> Option<&StringList> {
        self.conditions.get(operator).and_then(|keys| keys.get(key))
    }

    pub fn condition_mut(&mut self, operator: &str, key: &str) -> Option<&mut StringList> {
        self.conditions.get_mut(operator).and_then(|keys| keys.get_mut(key))
    }

    /// Compact JSON length of this statement.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }
}

/// A complete policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version", default = "default_version")]
    pub version: String,
    #[serde(rename = "Statement", default)]
    pub statements: Vec<Statement>,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PolicyDocument {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self {
            version: default_version(),
            statements,
        }
    }

    /// A document holding only the placeholder statement.
    pub fn empty() -> Self {
        Self::new(vec![Statement::empty_placeholder()])
    }

    /// Whether the document carries nothing but placeholders.
    pub fn is_effectively_empty(&self) -> bool {
        self.statements.iter().all(Statement::is_placeholder)
    }

    pub fn statement(&self, sid: &str) -> Option<&Statement> {
        self.statements.iter().find(|s| s.sid() == sid)
    }

    pub fn statement_mut(&mut self, sid: &str) -> Option<&mut Statement> {
        self.statements.iter_mut().find(|s| s.sid() == sid)
    }

    /// Insert `statement`, replacing any statement with the same sid.
    pub fn upsert(&mut self, statement: Statement) {
        match self.statements.iter_mut().find(|s| s.sid == statement.sid) {
            Some(existing) => *existing = statement,
            None => self.statements.push(statement),
        }
    }

    /// Remove every statement with the given sid. Returns whether any was removed.
    pub fn remove(&mut self, sid: &str) -> bool {
        let before = self.statements.len();
        self.statements.retain(|s| s.sid() != sid);
        before != self.statements.len()
    }

    /// Compact JSON length of the whole document.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_string(self).map(|s| s.len()).unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CoreError::MalformedPolicy(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::MalformedPolicy(e.to_string()))
    }
}
