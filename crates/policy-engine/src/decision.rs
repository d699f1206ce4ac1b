use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The outcome attached to a rule, and the result of deciding a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Placeholder for a request that could not be decided at all.
    None,
    /// Deny the request and record it in the block log.
    Block,
    /// Deny the request without logging it (proxy-internal traffic).
    Ignore,
    /// Let the request through.
    Allow,
}

/// Action taken when no rule matches.
pub const DEFAULT_ACTION: Action = Action::Block;

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::None => "none",
            Action::Block => "block",
            Action::Ignore => "ignore",
            Action::Allow => "allow",
        }
    }

    /// Whether a request decided with this action belongs in the block log.
    pub fn is_logged_denial(&self) -> bool {
        matches!(self, Action::Block | Action::None)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the action column of a rule row.  `none` is never stored, so it
/// is rejected along with anything unknown.
impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Action::Block),
            "ignore" => Ok(Action::Ignore),
            "allow" => Ok(Action::Allow),
            other => Err(other.to_string()),
        }
    }
}

/// The outcome of deciding one request against a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The resolved action to take.
    pub action: Action,
    /// Name of the rule that matched, if any.
    pub matched_rule: Option<String>,
    /// True when the decision came from the internal-scheme shortcut.
    pub internal: bool,
}

impl Decision {
    /// No rule matched; the default action applies.
    pub fn no_match() -> Self {
        Self {
            action: DEFAULT_ACTION,
            matched_rule: None,
            internal: false,
        }
    }

    /// The request could not be evaluated at all.
    pub fn undecided() -> Self {
        Self {
            action: Action::None,
            matched_rule: None,
            internal: false,
        }
    }

    /// Proxy-internal request, never blocked or logged.
    pub fn internal() -> Self {
        Self {
            action: Action::Ignore,
            matched_rule: None,
            internal: true,
        }
    }

    /// A rule matched.
    pub fn matched(rule: impl Into<String>, action: Action) -> Self {
        Self {
            action,
            matched_rule: Some(rule.into()),
            internal: false,
        }
    }

    /// Whether anything (a rule or the internal shortcut) matched.
    pub fn is_match(&self) -> bool {
        self.internal || self.matched_rule.is_some()
    }
}
