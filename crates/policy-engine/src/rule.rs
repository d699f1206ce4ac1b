//! Request predicates.
//!
//! Every rule is one of five closed variants.  Plain HTTP requests carry an
//! absolute URL as target and the protocol label `HTTP`; CONNECT tunnels
//! carry `host:port` and the label `NONE`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;
use regex::Regex;
use url::Url;

use crate::error::{RuleError, SchemaError};

/// Protocol label squid uses for plain HTTP requests.
pub const PROTO_HTTP: &str = "HTTP";

/// Protocol label squid uses for CONNECT tunnels.
pub const PROTO_CONNECT: &str = "NONE";

pub const METHOD_CONNECT: &str = "CONNECT";

/// Targets with this prefix are squid management requests.  They are never
/// blocked and never logged.
pub const INTERNAL_SCHEME_PREFIX: &str = "cache_object://";

const HTTP_DEFAULT_PORT: &str = "80";
const HTTPS_DEFAULT_PORT: &str = "443";
const ANY_PORT: &str = "*";

/// A borrowed view of one request as received from the proxy.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub protocol: &'a str,
    pub source: &'a str,
    pub method: &'a str,
    /// Already percent-decoded.
    pub target: &'a str,
}

/// The `type` column of a rule row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Exact,
    Domain,
    Regex,
    HttpsDomain,
    HttpsRegex,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Exact => "exact",
            RuleKind::Domain => "domain",
            RuleKind::Regex => "regex",
            RuleKind::HttpsDomain => "https-domain",
            RuleKind::HttpsRegex => "https-regex",
        }
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(RuleKind::Exact),
            "domain" => Ok(RuleKind::Domain),
            "regex" => Ok(RuleKind::Regex),
            "https-domain" => Ok(RuleKind::HttpsDomain),
            "https-regex" => Ok(RuleKind::HttpsRegex),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub enum Rule {
    Exact { value: String },
    Domain(HostPattern),
    Regex(Regex),
    HttpsDomain(HostPattern),
    HttpsRegex(Regex),
}

impl Rule {
    /// Compile a rule row.  `name` is only used for error reporting.
    pub fn compile(name: &str, kind: RuleKind, value: &str) -> Result<Self, SchemaError> {
        let anchored = |value: &str| {
            Regex::new(&format!("^(?:{value})$")).map_err(|source| SchemaError::InvalidPattern {
                rule: name.to_string(),
                pattern: value.to_string(),
                source,
            })
        };

        Ok(match kind {
            RuleKind::Exact => Rule::Exact {
                value: value.to_string(),
            },
            RuleKind::Domain => Rule::Domain(HostPattern::new(value, HTTP_DEFAULT_PORT)),
            RuleKind::Regex => Rule::Regex(anchored(value)?),
            RuleKind::HttpsDomain => {
                Rule::HttpsDomain(HostPattern::new(value, HTTPS_DEFAULT_PORT))
            }
            RuleKind::HttpsRegex => Rule::HttpsRegex(anchored(value)?),
        })
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Exact { .. } => RuleKind::Exact,
            Rule::Domain(_) => RuleKind::Domain,
            Rule::Regex(_) => RuleKind::Regex,
            Rule::HttpsDomain(_) => RuleKind::HttpsDomain,
            Rule::HttpsRegex(_) => RuleKind::HttpsRegex,
        }
    }

    /// Whether this rule matches `req`.  The source address is not
    /// consulted here; source scoping happens in the snapshot.
    pub fn check(&self, req: &Request<'_>) -> Result<bool, RuleError> {
        match self {
            Rule::Exact { value } => Ok(req.protocol == PROTO_HTTP && req.target == value),
            Rule::Regex(re) => Ok(req.protocol == PROTO_HTTP && re.is_match(req.target)),
            Rule::HttpsRegex(re) => Ok(req.protocol == PROTO_CONNECT && re.is_match(req.target)),
            Rule::Domain(pattern) => {
                if req.protocol != PROTO_HTTP || pattern.is_empty() {
                    return Ok(false);
                }
                let url = Url::parse(req.target).map_err(|source| RuleError::InvalidUrl {
                    target: req.target.to_string(),
                    source,
                })?;
                let host = match url.host_str() {
                    Some(h) => h.trim_start_matches('[').trim_end_matches(']'),
                    None => "",
                };
                // The parser drops a scheme's default port, so read it from the text.
                let port = written_port(req.target).unwrap_or(HTTP_DEFAULT_PORT);
                Ok(pattern.matches(host, port))
            }
            Rule::HttpsDomain(pattern) => {
                if req.protocol != PROTO_CONNECT || req.method != METHOD_CONNECT {
                    return Ok(false);
                }
                if pattern.is_empty() {
                    return Ok(false);
                }
                let (host, port) =
                    split_host_port(req.target).map_err(|reason| RuleError::InvalidHostPort {
                        target: req.target.to_string(),
                        reason,
                    })?;
                Ok(pattern.matches(&host.to_ascii_lowercase(), port))
            }
        }
    }
}

/// The value of a `domain` or `https-domain` rule: a host (name, literal
/// address or CIDR) with an optional port, which may be `*`.
#[derive(Debug, Clone)]
pub struct HostPattern {
    host: String,
    port: String,
    cidr: Option<IpNet>,
    suffix: bool,
}

impl HostPattern {
    fn new(value: &str, default_port: &str) -> Self {
        let (host, port) = match split_host_port(value) {
            Ok((host, port)) => (host, port),
            Err(_) => (value, default_port),
        };
        let host = normalize_host(host);
        Self {
            cidr: host.parse().ok(),
            suffix: value.starts_with('.'),
            host,
            port: port.to_string(),
        }
    }

    fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    fn matches(&self, host: &str, port: &str) -> bool {
        if self.port != ANY_PORT && self.port != port {
            return false;
        }
        if host == self.host {
            return true;
        }
        if let Some(cidr) = &self.cidr {
            if let Ok(ip) = host.parse::<IpAddr>() {
                if cidr.contains(&ip) {
                    return true;
                }
            }
        }
        if self.suffix {
            // ".example.com" also covers the bare "example.com".
            if self.host.strip_prefix('.') == Some(host) {
                return true;
            }
            if host.ends_with(&self.host) {
                return true;
            }
        }
        false
    }
}

/// Lowercase and IDNA-encode a rule host the way the URL parser treats
/// request hosts.  Addresses and CIDR networks are only lowercased.
fn normalize_host(host: &str) -> String {
    let (dot, name) = match host.strip_prefix('.') {
        Some(rest) => (".", rest),
        None => ("", host),
    };
    match url::Host::parse(name) {
        Ok(url::Host::Domain(domain)) => format!("{dot}{domain}"),
        _ => host.to_ascii_lowercase(),
    }
}

/// The port of an absolute URL exactly as written in its authority, if any.
fn written_port(target: &str) -> Option<&str> {
    let (_, rest) = target.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);
    split_host_port(host_port).ok().map(|(_, port)| port)
}

/// Split `host:port` or `[v6]:port`.  A bare IPv6 address, a missing port
/// or an empty port is an error.
fn split_host_port(s: &str) -> Result<(&str, &str), &'static str> {
    if let Some(rest) = s.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or("missing ']' in address")?;
        let port = after.strip_prefix(':').ok_or("missing port in address")?;
        if port.is_empty() {
            return Err("missing port in address");
        }
        return Ok((host, port));
    }
    let (host, port) = s.rsplit_once(':').ok_or("missing port in address")?;
    if host.contains(':') {
        return Err("too many colons in address");
    }
    if port.is_empty() {
        return Err("missing port in address");
    }
    Ok((host, port))
}
