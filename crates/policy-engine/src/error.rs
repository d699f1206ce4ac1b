use thiserror::Error;

/// A source address pattern that is neither CIDR nor a valid `addr/mask`
/// pair.  Such rows are dropped while building a snapshot.
#[derive(Debug, Error)]
#[error("{pattern:?} is neither a CIDR network nor an address/mask pair: {reason}")]
pub struct AddressParseError {
    pub pattern: String,
    pub reason: String,
}

/// Problems with the policy data as a whole.  Any of these fails the entire
/// snapshot build; the caller keeps serving the previous snapshot.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown rule type {kind:?} for rule {rule:?}")]
    UnknownRuleType { rule: String, kind: String },

    #[error("unknown action {action:?} for rule {rule:?}")]
    UnknownAction { rule: String, action: String },

    #[error("compiling pattern {pattern:?} for rule {rule:?}: {source}")]
    InvalidPattern {
        rule: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("source {source_pattern:?} references unknown rule {rule:?}")]
    MissingRule {
        source_pattern: String,
        rule: String,
    },

    #[error("unsupported policy version {0:?}; only \"1.0\" is supported")]
    UnsupportedVersion(String),

    #[error("rule name must not be empty")]
    EmptyRuleName,

    #[error("duplicate rule name {0:?}")]
    DuplicateRule(String),
}

/// A rule could not interpret the request it was asked to check.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("failed to parse URL {target:?}: {source}")]
    InvalidUrl {
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to parse HTTPS host:port {target:?}: {reason}")]
    InvalidHostPort { target: String, reason: &'static str },
}

/// Failure to decide a single request.
#[derive(Debug, Error)]
pub enum DecideError {
    #[error("source is not a valid address: {0:?}")]
    InvalidSource(String),
}

/// Failure to read policy rows from a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yml::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}
