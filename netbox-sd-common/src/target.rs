//! Prometheus file-based service discovery data model.
//!
//! A file-SD document is a JSON array of target groups:
//!
//! ```json
//! [
//!   {
//!     "targets": ["10.0.0.5:9100"],
//!     "labels": { "role": "router", "status": "active" }
//!   }
//! ]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A set of scrape targets sharing the same labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    /// Scrape targets (`host`, `host:port` or a URL).
    pub targets: Vec<String>,

    /// Labels attached to every target of the group.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TargetGroup {
    /// Create a group with a single target and no labels.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            targets: vec![target.into()],
            labels: BTreeMap::new(),
        }
    }

    /// Create a group from a list of targets.
    pub fn with_targets(targets: Vec<String>) -> Self {
        Self {
            targets,
            labels: BTreeMap::new(),
        }
    }

    /// Add a label (builder style).
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Check the group is usable by Prometheus.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(Error::TargetGroup("group has no targets".to_string()));
        }
        if self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::TargetGroup("group has a blank target".to_string()));
        }
        if let Some(name) = self.labels.keys().find(|k| !is_valid_label_name(k)) {
            return Err(Error::TargetGroup(format!("invalid label name '{}'", name)));
        }
        Ok(())
    }
}

/// Full content of one file-SD output file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryDocument {
    groups: Vec<TargetGroup>,
}

impl DiscoveryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group after validating it.
    pub fn push(&mut self, group: TargetGroup) -> Result<()> {
        group.validate()?;
        self.groups.push(group);
        Ok(())
    }

    pub fn groups(&self) -> &[TargetGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of targets across all groups.
    pub fn target_count(&self) -> usize {
        self.groups.iter().map(|g| g.targets.len()).sum()
    }

    /// Serialize to the on-disk representation.
    ///
    /// Output is pretty-printed and newline-terminated. Labels are emitted in
    /// key order, so equal documents always produce identical bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(&self.groups)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Parse a document previously written by [`to_json_bytes`](Self::to_json_bytes).
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let groups: Vec<TargetGroup> = serde_json::from_slice(bytes)?;
        let mut doc = Self::new();
        for group in groups {
            doc.push(group)?;
        }
        Ok(doc)
    }
}

impl FromIterator<TargetGroup> for DiscoveryDocument {
    /// Collect groups without validation; use [`push`](Self::push) for untrusted input.
    fn from_iter<I: IntoIterator<Item = TargetGroup>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

/// Check a label name matches `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Runs of invalid characters become a single underscore and a leading
/// digit is prefixed with one. Leading underscores are kept so that
/// `__meta_*` discovery labels survive.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_replaced = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            result.push(c);
            last_was_replaced = false;
        } else if !last_was_replaced {
            result.push('_');
            last_was_replaced = true;
        }
    }

    // Remove trailing replacement underscores
    while result.ends_with('_') && !name.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_group_serialization() {
        let group = TargetGroup::new("10.0.0.5")
            .with_label("status", "active")
            .with_label("role", "router")
            .with_label("id", "7");

        let json = serde_json::to_string(&group).unwrap();
        assert_eq!(
            json,
            r#"{"targets":["10.0.0.5"],"labels":{"id":"7","role":"router","status":"active"}}"#
        );
    }

    #[test]
    fn test_target_group_without_labels_parses() {
        let group: TargetGroup = serde_json::from_str(r#"{"targets":["a:1"]}"#).unwrap();
        assert_eq!(group.targets, vec!["a:1"]);
        assert!(group.labels.is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let group = TargetGroup::with_targets(vec![]);
        assert!(group.validate().is_err());

        let group = TargetGroup::new("  ");
        assert!(group.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_label_name() {
        let group = TargetGroup::new("host").with_label("bad-name", "x");
        let err = group.validate().unwrap_err().to_string();
        assert!(err.contains("bad-name"));
    }

    #[test]
    fn test_document_push_validates() {
        let mut doc = DiscoveryDocument::new();
        assert!(doc.push(TargetGroup::with_targets(vec![])).is_err());
        assert!(doc.is_empty());

        doc.push(TargetGroup::new("a")).unwrap();
        doc.push(TargetGroup::with_targets(vec!["b".into(), "c".into()]))
            .unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.target_count(), 3);
    }

    #[test]
    fn test_document_bytes_are_stable() {
        let mut a = TargetGroup::new("h1");
        a.labels.insert("z".into(), "1".into());
        a.labels.insert("a".into(), "2".into());

        let mut b = TargetGroup::new("h1");
        b.labels.insert("a".into(), "2".into());
        b.labels.insert("z".into(), "1".into());

        let doc_a: DiscoveryDocument = vec![a].into_iter().collect();
        let doc_b: DiscoveryDocument = vec![b].into_iter().collect();

        let bytes = doc_a.to_json_bytes().unwrap();
        assert_eq!(bytes, doc_b.to_json_bytes().unwrap());
        assert!(bytes.ends_with(b"\n"));
    }

    #[test]
    fn test_empty_document_is_empty_array() {
        let doc = DiscoveryDocument::new();
        assert_eq!(doc.to_json_bytes().unwrap(), b"[]\n");
    }

    #[test]
    fn test_document_parses_back() {
        let group = TargetGroup::new("10.0.0.1:9100").with_label("site", "ams1");
        let doc: DiscoveryDocument = vec![group].into_iter().collect();
        let bytes = doc.to_json_bytes().unwrap();

        let parsed = DiscoveryDocument::from_json_slice(&bytes).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_is_valid_label_name() {
        assert!(is_valid_label_name("role"));
        assert!(is_valid_label_name("__meta_netbox_site"));
        assert!(is_valid_label_name("_x1"));
        assert!(!is_valid_label_name(""));
        assert!(!is_valid_label_name("1abc"));
        assert!(!is_valid_label_name("a-b"));
    }

    #[test]
    fn test_sanitize_label_name() {
        assert_eq!(sanitize_label_name("site"), "site");
        assert_eq!(sanitize_label_name("device-id"), "device_id");
        assert_eq!(sanitize_label_name("rack.unit"), "rack_unit");
        assert_eq!(sanitize_label_name("a -- b"), "a_b");
    }

    #[test]
    fn test_sanitize_label_name_keeps_meta_prefix() {
        assert_eq!(
            sanitize_label_name("__meta_netbox_site_name"),
            "__meta_netbox_site_name"
        );
    }

    #[test]
    fn test_sanitize_label_name_leading_digit_and_empty() {
        assert_eq!(sanitize_label_name("1rack"), "_1rack");
        assert_eq!(sanitize_label_name(""), "label");
        assert_eq!(sanitize_label_name("é"), "label");
    }
}
