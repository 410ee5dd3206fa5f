//! Shared types for the pattern knowledge store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Namespace that marks a pattern as protected regardless of its scope.
pub const PROTECTED_NAMESPACE: &str = "cortex";

/// Free-form key/value metadata attached to a pattern.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Visibility and maintenance scope of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternScope {
    /// Cross-project knowledge. Never decayed, consolidated or overwritten by imports.
    #[serde(alias = "generic", alias = "cortex")]
    Protected,
    /// Workspace-specific knowledge subject to maintenance.
    Application,
}

impl PatternScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternScope::Protected => "protected",
            PatternScope::Application => "application",
        }
    }
}

impl fmt::Display for PatternScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "protected" | "generic" | "cortex" => Ok(PatternScope::Protected),
            "application" => Ok(PatternScope::Application),
            other => Err(format!("unknown pattern scope: {other}")),
        }
    }
}

/// Kind of knowledge a pattern captures.
///
/// Unknown labels are preserved as `Other` so bundles from newer instances
/// still parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PatternType {
    Workflow,
    Intent,
    BugCatching,
    Solution,
    Fact,
    Convention,
    Other(String),
}

impl PatternType {
    pub fn as_str(&self) -> &str {
        match self {
            PatternType::Workflow => "workflow",
            PatternType::Intent => "intent",
            PatternType::BugCatching => "bug-catching",
            PatternType::Solution => "solution",
            PatternType::Fact => "fact",
            PatternType::Convention => "convention",
            PatternType::Other(label) => label,
        }
    }
}

impl From<String> for PatternType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "workflow" => PatternType::Workflow,
            "intent" => PatternType::Intent,
            "bug-catching" | "bug_catching" => PatternType::BugCatching,
            "solution" => PatternType::Solution,
            "fact" => PatternType::Fact,
            "convention" => PatternType::Convention,
            _ => PatternType::Other(s),
        }
    }
}

impl From<&str> for PatternType {
    fn from(s: &str) -> Self {
        PatternType::from(s.to_string())
    }
}

impl From<PatternType> for String {
    fn from(t: PatternType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for PatternType {
    fn default() -> Self {
        PatternType::Solution
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Types
// ─────────────────────────────────────────────────────────────────────────────

/// A stored unit of learned knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub title: String,
    pub content: String,
    pub pattern_type: PatternType,
    /// Trust score, always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub scope: PatternScope,
    pub namespaces: BTreeSet<String>,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    pub metadata: Metadata,
}

impl Pattern {
    /// Whether maintenance must leave this pattern untouched.
    pub fn is_protected(&self) -> bool {
        is_protected(self.scope, &self.namespaces)
    }

    /// Whether decay may touch this pattern.
    pub fn is_decayable(&self) -> bool {
        !self.is_pinned && !self.is_protected()
    }
}

/// The single protection predicate: protected scope or the sentinel namespace.
pub fn is_protected<'a, I>(scope: PatternScope, namespaces: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    scope == PatternScope::Protected
        || namespaces
            .into_iter()
            .any(|ns| ns.as_str() == PROTECTED_NAMESPACE)
}

/// Clamp a confidence score into `[0.0, 1.0]`. NaN becomes 0.0.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Append-only audit record written by decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayLogEntry {
    pub id: i64,
    pub pattern_id: String,
    pub old_confidence: f64,
    pub new_confidence: f64,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: i64,
    pub protected: i64,
    pub application: i64,
    pub pinned: i64,
    pub by_type: BTreeMap<String, i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Input Types
// ─────────────────────────────────────────────────────────────────────────────

/// Input for creating a new pattern
#[derive(Debug, Clone, Default)]
pub struct NewPattern {
    /// Generated when absent.
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    pub pattern_type: PatternType,
    /// Defaults to 0.5.
    pub confidence: Option<f64>,
    /// Defaults to `Application`.
    pub scope: Option<PatternScope>,
    pub namespaces: BTreeSet<String>,
    pub is_pinned: bool,
    pub metadata: Metadata,
}

impl NewPattern {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        pattern_type: impl Into<PatternType>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            pattern_type: pattern_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_scope(mut self, scope: PatternScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(namespace.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.is_pinned = true;
        self
    }
}

/// Partial update. `id` and `created_at` cannot change.
#[derive(Debug, Clone, Default)]
pub struct PatternUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub pattern_type: Option<PatternType>,
    pub confidence: Option<f64>,
    pub scope: Option<PatternScope>,
    pub namespaces: Option<BTreeSet<String>>,
    pub is_pinned: Option<bool>,
    pub metadata: Option<Metadata>,
}

impl PatternUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.pattern_type.is_none()
            && self.confidence.is_none()
            && self.scope.is_none()
            && self.namespaces.is_none()
            && self.is_pinned.is_none()
            && self.metadata.is_none()
    }

    /// Apply this update onto an existing pattern.
    pub(crate) fn apply_to(&self, pattern: &mut Pattern) {
        if let Some(title) = &self.title {
            pattern.title = title.clone();
        }
        if let Some(content) = &self.content {
            pattern.content = content.clone();
        }
        if let Some(pattern_type) = &self.pattern_type {
            pattern.pattern_type = pattern_type.clone();
        }
        if let Some(confidence) = self.confidence {
            pattern.confidence = clamp_confidence(confidence);
        }
        if let Some(scope) = self.scope {
            pattern.scope = scope;
        }
        if let Some(namespaces) = &self.namespaces {
            pattern.namespaces = namespaces.clone();
        }
        if let Some(is_pinned) = self.is_pinned {
            pattern.is_pinned = is_pinned;
        }
        if let Some(metadata) = &self.metadata {
            pattern.metadata = metadata.clone();
        }
    }
}

/// Filters for listing patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternFilter {
    pub pattern_type: Option<PatternType>,
    pub scope: Option<PatternScope>,
    pub namespace: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub pinned: Option<bool>,
    pub limit: Option<usize>,
}

/// Whether a write may touch protected patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteAccess {
    /// Protected patterns are rejected.
    #[default]
    Standard,
    /// Explicit administrative override; protected patterns may be changed.
    Administrative,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("generic".parse::<PatternScope>().unwrap(), PatternScope::Protected);
        assert_eq!("cortex".parse::<PatternScope>().unwrap(), PatternScope::Protected);
        assert_eq!(
            "application".parse::<PatternScope>().unwrap(),
            PatternScope::Application
        );
        assert!("global".parse::<PatternScope>().is_err());

        let scope: PatternScope = serde_json::from_str("\"generic\"").unwrap();
        assert_eq!(scope, PatternScope::Protected);
    }

    #[test]
    fn test_pattern_type_roundtrip() {
        assert_eq!(PatternType::from("bug-catching"), PatternType::BugCatching);
        assert_eq!(PatternType::BugCatching.as_str(), "bug-catching");

        let custom = PatternType::from("deployment");
        assert_eq!(custom, PatternType::Other("deployment".into()));
        assert_eq!(serde_json::to_string(&custom).unwrap(), "\"deployment\"");
    }

    #[test]
    fn test_protection_predicate() {
        let empty: BTreeSet<String> = BTreeSet::new();
        assert!(is_protected(PatternScope::Protected, &empty));
        assert!(!is_protected(PatternScope::Application, &empty));

        let sentinel: BTreeSet<String> = [PROTECTED_NAMESPACE.to_string()].into();
        assert!(is_protected(PatternScope::Application, &sentinel));
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }
}
