use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use crate::decision::Action;
use crate::error::SchemaError;
use crate::rule::{Rule, RuleKind};
use crate::schema::PolicyRecords;
use crate::source::AddressMatcher;

/// A source matcher and the names of the rules that apply to it, in
/// evaluation order.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub matcher: AddressMatcher,
    pub rules: Vec<String>,
}

/// A compiled rule with the action it resolves to.
#[derive(Debug, Clone)]
pub struct RuleAction {
    pub rule: Rule,
    pub action: Action,
}

/// Immutable, fully built policy.  Replaced wholesale on reload.
pub struct PolicySnapshot {
    /// Most specific matcher first; equal specificity keeps load order.
    entries: Vec<SourceEntry>,
    rules: HashMap<String, RuleAction>,
}

impl fmt::Debug for PolicySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySnapshot")
            .field("num_sources", &self.entries.len())
            .field("num_rules", &self.rules.len())
            .finish()
    }
}

impl PolicySnapshot {
    /// Build a snapshot from store rows.
    ///
    /// Source rows with an unparseable address are skipped with a warning.
    /// Anything wrong with the rule table (unknown type or action, a pattern
    /// that does not compile, a dangling rule reference) fails the build.
    pub fn build(records: PolicyRecords) -> Result<Self, SchemaError> {
        let mut rules = HashMap::with_capacity(records.rules.len());
        for row in &records.rules {
            let kind: RuleKind = row.kind.parse().map_err(|kind| SchemaError::UnknownRuleType {
                rule: row.name.clone(),
                kind,
            })?;
            let action: Action =
                row.action
                    .parse()
                    .map_err(|action| SchemaError::UnknownAction {
                        rule: row.name.clone(),
                        action,
                    })?;
            let rule = Rule::compile(&row.name, kind, &row.value)?;
            rules.insert(row.name.clone(), RuleAction { rule, action });
        }

        // Group rows by canonical matcher text, keeping first-seen order.
        let mut entries: Vec<SourceEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for row in records.sources {
            let matcher: AddressMatcher = match row.source.parse() {
                Ok(m) => m,
                Err(err) => {
                    warn!(source = %row.source, rule = %row.rule, error = %err, "skipping invalid source");
                    continue;
                }
            };
            if !rules.contains_key(&row.rule) {
                return Err(SchemaError::MissingRule {
                    source_pattern: row.source,
                    rule: row.rule,
                });
            }
            let key = matcher.to_string();
            match index.get(&key) {
                Some(&i) => entries[i].rules.push(row.rule),
                None => {
                    index.insert(key, entries.len());
                    entries.push(SourceEntry {
                        matcher,
                        rules: vec![row.rule],
                    });
                }
            }
        }

        // `sort_by` is stable, which keeps ties in load order.
        entries.sort_by(|a, b| b.matcher.specificity().cmp(&a.matcher.specificity()));

        debug!(
            num_sources = entries.len(),
            num_rules = rules.len(),
            "policy snapshot built"
        );

        Ok(Self { entries, rules })
    }

    /// An empty snapshot: every request gets the default action.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            rules: HashMap::new(),
        }
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn rule(&self, name: &str) -> Option<&RuleAction> {
        self.rules.get(name)
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }
}
