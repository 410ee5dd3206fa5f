//! Export bundle format and signature.
//!
//! A bundle is a JSON document exchanged between independent stores:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "export_date": "2026-01-01T00:00:00Z",
//!   "source_machine_id": "laptop",
//!   "cortex_version": "0.1.0",
//!   "total_patterns": 1,
//!   "patterns": { "<id>": { "title": "...", "content": "...", ... } },
//!   "signature": "<sha256 hex>"
//! }
//! ```
//!
//! The signature covers only bundle-level fields plus the sorted id list, not
//! pattern payloads. It is the SHA-256 of the canonical JSON encoding
//! (sorted keys, `", "` and `": "` separators, non-ASCII escaped as `\uXXXX`),
//! which keeps it byte-compatible with bundles produced elsewhere.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{
    clamp_confidence, Metadata, Pattern, PatternScope, PatternType, PROTECTED_NAMESPACE,
};
use crate::utils::{digests_match, sha256_hex};

/// Bundle format version written and accepted by this crate
pub const BUNDLE_VERSION: &str = "1.0";

const REQUIRED_FIELDS: [&str; 6] = [
    "version",
    "export_date",
    "source_machine_id",
    "total_patterns",
    "patterns",
    "signature",
];

/// One pattern inside a bundle, keyed by id in [`ExportBundle::patterns`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlePattern {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub pattern_type: PatternType,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Informational only; imports always land in application scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default)]
    pub namespaces: BTreeSet<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<String>,
    #[serde(default)]
    pub access_count: i64,
    #[serde(default, alias = "context")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_confidence() -> f64 {
    0.5
}

impl BundlePattern {
    pub fn from_pattern(pattern: &Pattern, tags: Vec<String>) -> Self {
        Self {
            title: pattern.title.clone(),
            content: pattern.content.clone(),
            pattern_type: pattern.pattern_type.clone(),
            confidence: pattern.confidence,
            scope: Some(pattern.scope.as_str().to_string()),
            namespaces: pattern.namespaces.clone(),
            is_pinned: pattern.is_pinned,
            created_at: Some(pattern.created_at.to_rfc3339()),
            last_accessed: Some(pattern.last_accessed.to_rfc3339()),
            access_count: pattern.access_count,
            metadata: pattern.metadata.clone(),
            tags,
        }
    }

    /// Build the local record for an imported pattern.
    ///
    /// Imports never grant protection: scope is forced to application, the
    /// sentinel namespace is dropped and the pin is cleared.
    pub fn to_pattern(&self, id: &str, now: DateTime<Utc>) -> Pattern {
        let mut namespaces = self.namespaces.clone();
        namespaces.remove(PROTECTED_NAMESPACE);

        Pattern {
            id: id.to_string(),
            title: self.title.clone(),
            content: self.content.clone(),
            pattern_type: self.pattern_type.clone(),
            confidence: clamp_confidence(self.confidence),
            scope: PatternScope::Application,
            namespaces,
            is_pinned: false,
            created_at: self.created_at.as_deref().and_then(parse_timestamp).unwrap_or(now),
            last_accessed: self
                .last_accessed
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(now),
            access_count: self.access_count.max(0),
            metadata: self.metadata.clone(),
        }
    }
}

/// Accept RFC 3339 or a naive ISO-8601 timestamp (read as UTC)
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A signed set of patterns exchanged between stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub version: String,
    pub export_date: String,
    pub source_machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cortex_version: Option<String>,
    pub total_patterns: u64,
    pub patterns: BTreeMap<String, BundlePattern>,
    pub signature: String,
}

impl ExportBundle {
    /// Create a signed bundle
    pub fn new(
        export_date: impl Into<String>,
        source_machine_id: impl Into<String>,
        patterns: BTreeMap<String, BundlePattern>,
    ) -> Result<Self> {
        let mut bundle = Self {
            version: BUNDLE_VERSION.to_string(),
            export_date: export_date.into(),
            source_machine_id: source_machine_id.into(),
            cortex_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            total_patterns: patterns.len() as u64,
            patterns,
            signature: String::new(),
        };
        bundle.signature = bundle.expected_signature()?;
        Ok(bundle)
    }

    /// Parse and validate a bundle document. Does not check the signature.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::validation(format!("bundle is not valid JSON: {e}")))?;
        let Some(object) = value.as_object() else {
            return Err(Error::validation("bundle must be a JSON object"));
        };

        for field in REQUIRED_FIELDS {
            if !object.contains_key(field) {
                return Err(Error::validation(format!("missing field: {field}")));
            }
        }

        if let Some(patterns) = object.get("patterns").and_then(Value::as_object) {
            for (id, pattern) in patterns {
                for field in ["title", "content"] {
                    if pattern.get(field).is_none() {
                        return Err(Error::validation(format!(
                            "pattern {id} is missing field: {field}"
                        )));
                    }
                }
            }
        }

        let bundle: Self = serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("malformed bundle: {e}")))?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Read and validate a bundle file
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Write the bundle as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Structural checks that do not involve the signature
    pub fn validate(&self) -> Result<()> {
        if self.version != BUNDLE_VERSION {
            return Err(Error::validation(format!(
                "unsupported bundle version: {} (supported: {BUNDLE_VERSION})",
                self.version
            )));
        }
        if self.source_machine_id.trim().is_empty() {
            return Err(Error::validation("source_machine_id must not be empty"));
        }
        if self.total_patterns != self.patterns.len() as u64 {
            return Err(Error::validation(format!(
                "total_patterns is {} but bundle contains {} patterns",
                self.total_patterns,
                self.patterns.len()
            )));
        }
        if self.patterns.keys().any(|id| id.trim().is_empty()) {
            return Err(Error::validation("bundle contains an empty pattern id"));
        }
        Ok(())
    }

    /// Signature recomputed from the bundle's current contents
    pub fn expected_signature(&self) -> Result<String> {
        let ids: Vec<&str> = self.patterns.keys().map(String::as_str).collect();
        compute_signature(
            &self.export_date,
            &self.source_machine_id,
            self.total_patterns,
            &ids,
        )
    }

    /// Fail with [`Error::Integrity`] if the stored signature does not match
    pub fn verify(&self) -> Result<()> {
        let expected = self.expected_signature()?;
        if !digests_match(&expected, &self.signature) {
            return Err(Error::integrity(expected, self.signature.clone()));
        }
        Ok(())
    }
}

/// SHA-256 over the canonical JSON of the bundle-level fields
pub fn compute_signature(
    export_date: &str,
    source_machine_id: &str,
    total_patterns: u64,
    pattern_ids: &[&str],
) -> Result<String> {
    let mut ids = pattern_ids.to_vec();
    ids.sort_unstable();

    let payload = json!({
        "export_date": export_date,
        "pattern_ids": ids,
        "source_machine_id": source_machine_id,
        "total_patterns": total_patterns,
    });
    Ok(sha256_hex(&canonical_json(&payload)?))
}

/// Serialize with sorted keys, spaced separators and ASCII-only output
fn canonical_json(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.bytes().all(|b| b.is_ascii() && b != 0x7f) {
            return writer.write_all(fragment.as_bytes());
        }
        // Anything outside printable ASCII, DEL included, becomes \uXXXX
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() && c != '\x7f' {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pattern(title: &str) -> BundlePattern {
        BundlePattern {
            title: title.to_string(),
            content: "content".to_string(),
            pattern_type: PatternType::Workflow,
            confidence: 0.8,
            scope: None,
            namespaces: BTreeSet::new(),
            is_pinned: false,
            created_at: None,
            last_accessed: None,
            access_count: 0,
            metadata: Metadata::new(),
            tags: Vec::new(),
        }
    }

    fn sample_bundle() -> ExportBundle {
        let patterns = BTreeMap::from([
            ("p2".to_string(), sample_pattern("two")),
            ("p1".to_string(), sample_pattern("one")),
        ]);
        ExportBundle::new("2026-01-01T00:00:00Z", "laptop", patterns).unwrap()
    }

    #[test]
    fn test_canonical_json_layout() {
        let payload = json!({"b": [1, 2], "a": "x"});
        let bytes = canonical_json(&payload).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a": "x", "b": [1, 2]}"#);

        let payload = json!({"k": "caf\u{e9}-\u{1F600}\n"});
        let bytes = canonical_json(&payload).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"k": "caf\u00e9-\ud83d\ude00\n"}"#
        );
    }

    #[test]
    fn test_signature_known_vectors() {
        assert_eq!(
            compute_signature("2026-01-01T00:00:00Z", "laptop", 2, &["p2", "p1"]).unwrap(),
            "9324ea5867ae9f5454b0db801b230688be5330a110f5d40344fa8cd8e1d1869d"
        );
        assert_eq!(
            compute_signature("2026-01-01T00:00:00Z", "caf\u{e9}-\u{1F600}", 2, &["p1", "p2"])
                .unwrap(),
            "3c743c0f33caa7a65ca4e574c190b0db7027dc557022d3e8be65bcec2e6a750e"
        );
        assert_eq!(
            compute_signature("2026-01-01T00:00:00Z", "lap\x7ftop", 2, &["p\x7f2", "p1"])
                .unwrap(),
            "d2ed8be8049d69d01ab79ed2a1e1cad639fd8d084ecdfbcf0be493da04a52bfe"
        );
    }

    #[test]
    fn test_canonical_json_escapes_delete() {
        let bytes = canonical_json(&json!({"k": "a\x7fb"})).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"k": "a\u007fb"}"#);
    }

    #[test]
    fn test_new_bundle_verifies() {
        let bundle = sample_bundle();
        assert_eq!(bundle.total_patterns, 2);
        assert_eq!(
            bundle.signature,
            "9324ea5867ae9f5454b0db801b230688be5330a110f5d40344fa8cd8e1d1869d"
        );
        bundle.verify().unwrap();

        let text = serde_json::to_string(&bundle).unwrap();
        let parsed = ExportBundle::parse(&text).unwrap();
        parsed.verify().unwrap();
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn test_tampered_ids_fail_verification() {
        let mut bundle = sample_bundle();
        let pattern = bundle.patterns.remove("p2").unwrap();
        bundle.patterns.insert("p3".to_string(), pattern);

        bundle.validate().unwrap();
        assert!(matches!(bundle.verify(), Err(Error::Integrity { .. })));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let mut value = serde_json::to_value(sample_bundle()).unwrap();
        value.as_object_mut().unwrap().remove("signature");
        let err = ExportBundle::parse(&value.to_string()).unwrap_err();
        assert!(err.to_string().contains("signature"));

        let mut value = serde_json::to_value(sample_bundle()).unwrap();
        value["patterns"]["p1"].as_object_mut().unwrap().remove("content");
        let err = ExportBundle::parse(&value.to_string()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("p1"));

        assert!(ExportBundle::parse("[1, 2]").is_err());
        assert!(ExportBundle::parse("not json").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_version_and_count() {
        let mut value = serde_json::to_value(sample_bundle()).unwrap();
        value["version"] = json!("2.0");
        assert!(ExportBundle::parse(&value.to_string())
            .unwrap_err()
            .to_string()
            .contains("unsupported"));

        let mut value = serde_json::to_value(sample_bundle()).unwrap();
        value["total_patterns"] = json!(3);
        assert!(matches!(
            ExportBundle::parse(&value.to_string()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_context_alias_and_sanitizing() {
        let text = r#"{
            "title": "t",
            "content": "c",
            "pattern_type": "intent",
            "confidence": 1.7,
            "scope": "generic",
            "namespaces": ["cortex", "web"],
            "is_pinned": true,
            "created_at": "2025-06-01T12:00:00.123456",
            "context": {"lang": "rust"}
        }"#;
        let bundled: BundlePattern = serde_json::from_str(text).unwrap();
        assert_eq!(bundled.metadata["lang"], json!("rust"));

        let now = Utc::now();
        let pattern = bundled.to_pattern("p1", now);
        assert_eq!(pattern.scope, PatternScope::Application);
        assert!(!pattern.is_protected());
        assert!(!pattern.is_pinned);
        assert_eq!(pattern.confidence, 1.0);
        assert_eq!(pattern.namespaces, BTreeSet::from(["web".to_string()]));
        assert_eq!(pattern.created_at.timestamp(), 1748779200);
        assert_eq!(pattern.last_accessed, now);
    }
}
