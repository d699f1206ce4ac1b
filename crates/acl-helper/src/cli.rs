use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "acl-helper",
    version,
    about = "Squid external ACL helper: answers OK/ERR per request from a policy store"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "acl-helper.yaml")]
    pub config: PathBuf,

    /// SQLite policy database, e.g. `sqlite:///var/lib/squid/policy.db`
    /// (overrides config file setting)
    #[arg(long, env = "ACL_HELPER_DB")]
    pub db: Option<String>,

    /// YAML policy file (overrides config file setting)
    #[arg(short, long)]
    pub policy: Option<PathBuf>,

    /// File refused requests are appended to
    #[arg(long)]
    pub block_log: Option<PathBuf>,

    /// Diagnostic log file; stderr when unset
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Verbosity: 0 warnings only, 1 per-request denials, 2 every line
    /// received and replied (overrides config file setting)
    #[arg(short, long)]
    pub verbose: Option<u8>,
}

impl Cli {
    /// Log level implied by `-v`, if any was given.
    pub fn level_override(&self) -> Option<&'static str> {
        self.verbose.map(|v| match v {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    }
}
