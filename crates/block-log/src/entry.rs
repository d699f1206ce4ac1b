use std::fmt;

use chrono::{DateTime, Utc};

/// One refused request, rendered in squid's native access.log layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub method: String,
    /// Decoded request target.
    pub target: String,
}

impl BlockRecord {
    /// Record stamped with the current time.
    pub fn new(
        source: impl Into<String>,
        method: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            method: method.into(),
            target: target.into(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Seconds since the epoch with microsecond precision.
    fn epoch_seconds(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Renders the line without its trailing newline.
impl fmt::Display for BlockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} 0 {} DENIED 0 {} {} - HIER/- foo/bar",
            self.epoch_seconds(),
            self.source,
            self.method,
            self.target
        )
    }
}
