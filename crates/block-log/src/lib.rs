//! Log of requests the ACL helper refused.
//!
//! Lines use squid's native access.log layout so existing log tooling can
//! read them:
//!
//! ```text
//! 1400000000.250000 0 127.0.0.1 DENIED 0 GET http://ads.example.com/ - HIER/- foo/bar
//! ```
//!
//! Writes take an exclusive advisory lock and are synced to disk, so several
//! helper processes may append to the same file.
//!
//! ```rust,no_run
//! use block_log::{BlockLog, BlockRecord};
//!
//! let log = BlockLog::new("/var/log/squid/blocked.log").unwrap();
//! log.append(&BlockRecord::new("127.0.0.1", "GET", "http://ads.example.com/"))
//!     .unwrap();
//! ```

pub mod entry;
pub mod writer;

pub use entry::BlockRecord;
pub use writer::{BlockLog, BlockLogError};
