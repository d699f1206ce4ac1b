use std::collections::HashSet;
use std::path::Path;

use crate::error::{SchemaError, StoreError};
use crate::schema::{PolicyFile, PolicyRecords};

/// Load policy rows from a YAML file on disk.
///
/// Validates the file after deserialization (version check, unique rule names).
pub fn load_policy(path: impl AsRef<Path>) -> Result<PolicyRecords, StoreError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
        path: path.display().to_string(),
        source,
    })?;
    load_policy_from_str(&contents).map_err(|err| match err {
        StoreError::Parse { source, .. } => StoreError::Parse {
            path: path.display().to_string(),
            source,
        },
        other => other,
    })
}

/// Parse and validate policy rows from a YAML string.
pub fn load_policy_from_str(yaml: &str) -> Result<PolicyRecords, StoreError> {
    let file: PolicyFile = serde_yml::from_str(yaml).map_err(|source| StoreError::Parse {
        path: "<inline>".to_string(),
        source,
    })?;
    validate(&file)?;
    Ok(file.into())
}

/// Run post-deserialization validation checks.
fn validate(file: &PolicyFile) -> Result<(), SchemaError> {
    if file.version != "1.0" {
        return Err(SchemaError::UnsupportedVersion(file.version.clone()));
    }

    let mut seen = HashSet::new();
    for rule in &file.rules {
        if rule.name.is_empty() {
            return Err(SchemaError::EmptyRuleName);
        }
        if !seen.insert(&rule.name) {
            return Err(SchemaError::DuplicateRule(rule.name.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_minimal_policy() {
        let yaml = r#"
version: "1.0"
sources: []
rules: []
"#;
        let records = load_policy_from_str(yaml).unwrap();
        assert!(records.sources.is_empty());
        assert!(records.rules.is_empty());
    }

    #[test]
    fn reject_wrong_version() {
        let yaml = r#"
version: "2.0"
"#;
        let err = load_policy_from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("unsupported policy version"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn reject_duplicate_rule_names() {
        let yaml = r#"
version: "1.0"
rules:
  - name: "dup"
    type: exact
    value: "http://a/"
    action: allow
  - name: "dup"
    type: exact
    value: "http://b/"
    action: block
"#;
        let err = load_policy_from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("duplicate rule name"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn reject_empty_rule_name() {
        let yaml = r#"
version: "1.0"
rules:
  - name: ""
    type: exact
    value: "http://a/"
    action: allow
"#;
        let err = load_policy_from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("must not be empty"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn reject_malformed_yaml() {
        let err = load_policy_from_str("version: [").unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }), "unexpected error: {err}");
    }

    #[test]
    fn load_from_nonexistent_file() {
        let err = load_policy("/does/not/exist.yaml").unwrap_err();
        assert!(
            err.to_string().contains("failed to read policy file"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn parse_error_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, "version: [").unwrap();
        let err = load_policy(&path).unwrap_err();
        assert!(
            err.to_string().contains("policy.yaml"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn load_complex_policy() {
        let yaml = r#"
version: "1.0"
sources:
  - source: "127.0.0.1/32"
    rules: ["bob-tunnel"]
  - source: "127.0.0.0/8"
    rules: ["habets", "google-search"]
rules:
  - name: "bob-tunnel"
    type: https-domain
    value: "9.10.0.1"
    action: allow
  - name: "habets"
    type: domain
    value: ".habets.se"
    action: allow
  - name: "google-search"
    type: regex
    value: "http://www\\.google\\.co\\.uk/url\\?.*"
    action: allow
"#;
        let records = load_policy_from_str(yaml).unwrap();
        assert_eq!(records.sources.len(), 3);
        assert_eq!(records.rules.len(), 3);
        assert_eq!(records.sources[1].source, "127.0.0.0/8");
        assert_eq!(records.sources[1].rule, "habets");
    }
}
