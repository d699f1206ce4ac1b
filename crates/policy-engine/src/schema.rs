use serde::{Deserialize, Serialize};

/// One `(source pattern, rule name)` pair reachable through the
/// source → group → ACL → rule membership chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRuleRow {
    pub source: String,
    pub rule: String,
}

/// One row of the rule table, still in textual form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    pub action: String,
}

/// A point-in-time read of everything a snapshot is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRecords {
    /// In store order; rule order within a source is significant.
    pub sources: Vec<SourceRuleRow>,
    pub rules: Vec<RuleRow>,
}

/// Top-level layout of a YAML policy file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyFile {
    /// Schema version; currently must be "1.0".
    pub version: String,
    /// Sources and the rules that apply to them, in evaluation order.
    #[serde(default)]
    pub sources: Vec<SourceBlock>,
    #[serde(default)]
    pub rules: Vec<RuleRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBlock {
    /// CIDR network or `address/mask` pair.
    pub source: String,
    #[serde(default)]
    pub rules: Vec<String>,
}

impl From<PolicyFile> for PolicyRecords {
    fn from(file: PolicyFile) -> Self {
        let sources = file
            .sources
            .into_iter()
            .flat_map(|entry| {
                let source = entry.source;
                entry.rules.into_iter().map(move |rule| SourceRuleRow {
                    source: source.clone(),
                    rule,
                })
            })
            .collect();
        Self {
            sources,
            rules: file.rules,
        }
    }
}
