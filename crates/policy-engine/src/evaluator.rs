use std::net::IpAddr;

use tracing::{trace, warn};

use crate::decision::Decision;
use crate::error::DecideError;
use crate::rule::{Request, INTERNAL_SCHEME_PREFIX};
use crate::snapshot::PolicySnapshot;

impl PolicySnapshot {
    /// Decide one request.
    ///
    /// First match wins: matchers are visited most specific first, and for
    /// every matcher containing the source its rules are tried in order.
    /// A matcher whose rules all miss falls through to the next one.  With
    /// no hit at all the default action applies.
    ///
    /// The only error is an unparseable source address; the internal-scheme
    /// shortcut is checked before that so squid's own management requests
    /// are never refused.
    pub fn decide(&self, req: &Request<'_>) -> Result<Decision, DecideError> {
        if req.target.starts_with(INTERNAL_SCHEME_PREFIX) {
            return Ok(Decision::internal());
        }

        let source: IpAddr = req
            .source
            .parse()
            .map_err(|_| DecideError::InvalidSource(req.source.to_string()))?;

        for entry in self.entries() {
            if !entry.matcher.contains(source) {
                continue;
            }
            for name in &entry.rules {
                let Some(ra) = self.rule(name) else {
                    continue;
                };
                match ra.rule.check(req) {
                    Ok(true) => {
                        trace!(rule = %name, matcher = %entry.matcher, action = %ra.action, "rule matched");
                        return Ok(Decision::matched(name.clone(), ra.action));
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(rule = %name, kind = %ra.rule.kind(), error = %err, "failed to evaluate rule");
                    }
                }
            }
        }

        Ok(Decision::no_match())
    }
}
