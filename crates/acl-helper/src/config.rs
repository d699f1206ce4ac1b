use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::cli::Cli;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Where refused requests are recorded; nothing is recorded when unset.
    #[serde(default)]
    pub block_log: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default)]
    pub policy_file: Option<PathBuf>,
    #[serde(default = "default_reload_interval")]
    pub reload_interval_ms: u64,
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            policy_file: None,
            reload_interval_ms: default_reload_interval(),
            reload_timeout_ms: default_reload_timeout(),
        }
    }
}

impl PolicyConfig {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms)
    }

    pub fn reload_timeout(&self) -> Duration {
        Duration::from_millis(self.reload_timeout_ms)
    }

    /// The store to read policy from.  A database wins over a policy file.
    pub fn source(&self) -> anyhow::Result<PolicySource> {
        match (&self.database_url, &self.policy_file) {
            (Some(url), other) => {
                if let Some(file) = other {
                    warn!(
                        database = %url,
                        policy_file = %file.display(),
                        "both a database and a policy file are configured; using the database"
                    );
                }
                Ok(PolicySource::Database(url.clone()))
            }
            (None, Some(file)) => Ok(PolicySource::File(file.clone())),
            (None, None) => anyhow::bail!(
                "no policy configured: set policy.database_url or policy.policy_file, or pass --db / --policy"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    Database(String),
    File(PathBuf),
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Diagnostic log destination; stderr when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_reload_interval() -> u64 {
    1000
}

fn default_reload_timeout() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Apply command line overrides on top of file values.
    pub fn merge_cli(&mut self, cli: &Cli) {
        if let Some(ref db) = cli.db {
            self.policy.database_url = Some(db.clone());
        }
        if let Some(ref policy) = cli.policy {
            self.policy.policy_file = Some(policy.clone());
        }
        if let Some(ref path) = cli.block_log {
            self.block_log = Some(path.clone());
        }
        if let Some(ref path) = cli.log {
            self.logging.file = Some(path.clone());
        }
        if let Some(level) = cli.level_override() {
            self.logging.level = level.to_string();
        }
    }
}

/// Load configuration from a YAML file.
///
/// A missing file yields the defaults with a warning, so the helper can be
/// driven from the command line alone.
pub fn load(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "configuration file not found; using defaults"
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: Config = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load(Path::new("/does/not/exist.yaml")).unwrap();
        assert_eq!(cfg.policy.reload_interval(), Duration::from_secs(1));
        assert_eq!(cfg.policy.reload_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.block_log.is_none());
        assert!(cfg.policy.source().is_err());
    }

    #[test]
    fn parses_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helper.yaml");
        std::fs::write(
            &path,
            r#"
policy:
  database_url: "sqlite:///var/lib/squid/policy.db"
  reload_interval_ms: 250
block_log: /var/log/squid/blocked.log
logging:
  level: debug
  file: /var/log/squid/helper.log
"#,
        )
        .unwrap();

        let cfg = load(&path).unwrap();
        assert_eq!(cfg.policy.reload_interval(), Duration::from_millis(250));
        assert_eq!(cfg.policy.reload_timeout_ms, 5000);
        assert_eq!(
            cfg.policy.source().unwrap(),
            PolicySource::Database("sqlite:///var/lib/squid/policy.db".into())
        );
        assert_eq!(
            cfg.block_log,
            Some(PathBuf::from("/var/log/squid/blocked.log"))
        );
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helper.yaml");
        std::fs::write(&path, "policy: [").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn database_wins_over_policy_file() {
        let mut cfg = Config::default();
        cfg.policy.policy_file = Some(PathBuf::from("policy.yaml"));
        cfg.policy.database_url = Some("sqlite://p.db".into());
        assert_eq!(
            cfg.policy.source().unwrap(),
            PolicySource::Database("sqlite://p.db".into())
        );
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut cfg = Config::default();
        cfg.policy.policy_file = Some(PathBuf::from("from-file.yaml"));
        cfg.logging.level = "warn".into();

        let cli = Cli::try_parse_from([
            "acl-helper",
            "--policy",
            "from-cli.yaml",
            "--block-log",
            "blocked.log",
            "-v",
            "2",
        ])
        .unwrap();
        cfg.merge_cli(&cli);

        assert_eq!(
            cfg.policy.source().unwrap(),
            PolicySource::File(PathBuf::from("from-cli.yaml"))
        );
        assert_eq!(cfg.block_log, Some(PathBuf::from("blocked.log")));
        assert_eq!(cfg.logging.level, "debug");
    }
}
