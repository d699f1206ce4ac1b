use anyhow::{Context, Result};
use block_log::{BlockLog, BlockRecord};
use policy_engine::{Action, Decision, Request};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::protocol::{decode_target, Reply, RequestLine, Verdict};
use crate::reloader::PolicyReloader;

/// The request loop.  One line in, one reply out, strictly in order.
#[derive(Debug)]
pub struct Helper {
    reloader: PolicyReloader,
    block_log: Option<BlockLog>,
}

impl Helper {
    pub fn new(reloader: PolicyReloader, block_log: Option<BlockLog>) -> Self {
        Self {
            reloader,
            block_log,
        }
    }

    /// Serve requests until end of input.
    ///
    /// Per-request problems never end the loop; only a failure to read a
    /// line or to write a reply does.
    pub async fn run<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .await
                .context("failed to read request")?;
            if n == 0 {
                info!("end of input; shutting down");
                return Ok(());
            }

            self.reloader.refresh_if_stale().await;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            debug!(line = %line, "received");

            let Some(reply) = self.handle_line(line) else {
                continue;
            };

            debug!(reply = %reply, "replying");
            writer
                .write_all(format!("{reply}\n").as_bytes())
                .await
                .context("failed to write reply")?;
            writer.flush().await.context("failed to flush reply")?;
        }
    }

    /// Decide one request line.  `None` when there is no token to answer to.
    fn handle_line(&self, line: &str) -> Option<Reply> {
        let req = match RequestLine::parse(line) {
            Ok(req) => req,
            Err(err) => {
                warn!(line = %line, error = %err, "malformed request line");
                return err.token().map(|token| Reply::new(token, Verdict::Err));
            }
        };

        let target = match decode_target(req.target) {
            Ok(target) => target,
            Err(err) => {
                warn!(line = %line, error = %err, "failed to decode request target");
                return Some(Reply::new(req.token, Verdict::Err));
            }
        };

        let snapshot = self.reloader.snapshot();
        let decision = snapshot
            .decide(&Request {
                protocol: req.protocol,
                source: req.source,
                method: req.method,
                target: &target,
            })
            .unwrap_or_else(|err| {
                warn!(line = %line, error = %err, "decision failed");
                Decision::undecided()
            });

        debug!(
            matched = decision.is_match(),
            rule = decision.matched_rule.as_deref().unwrap_or("-"),
            action = %decision.action,
            "decided"
        );

        if decision.action.is_logged_denial() {
            info!(
                action = %decision.action,
                source = req.source,
                method = req.method,
                target = %target,
                "request denied"
            );
            self.record_block(req.source, req.method, &target);
        }

        let verdict = match decision.action {
            Action::Allow => Verdict::Ok,
            Action::Block | Action::Ignore | Action::None => Verdict::Err,
        };
        Some(Reply::new(req.token, verdict))
    }

    fn record_block(&self, source: &str, method: &str, target: &str) {
        let Some(log) = &self.block_log else {
            return;
        };
        if let Err(err) = log.append(&BlockRecord::new(source, method, target)) {
            warn!(path = %log.path().display(), error = %err, "failed to write block log");
        }
    }
}
