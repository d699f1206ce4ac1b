//! # policy-engine
//!
//! Access policy for the squid ACL helper.  Policy rows come from a
//! [`PolicyStore`] (SQLite or YAML), are compiled into an immutable
//! [`PolicySnapshot`], and every proxied request is decided against that
//! snapshot.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use policy_engine::{loader, PolicySnapshot, Request};
//!
//! let records = loader::load_policy("policy.yaml").unwrap();
//! let snapshot = PolicySnapshot::build(records).unwrap();
//! let decision = snapshot
//!     .decide(&Request {
//!         protocol: "HTTP",
//!         source: "127.0.0.1",
//!         method: "GET",
//!         target: "http://www.habets.se/",
//!     })
//!     .unwrap();
//! println!("{:?}", decision);
//! ```

mod decision;
mod error;
mod evaluator;
pub mod loader;
pub mod rule;
mod schema;
mod snapshot;
pub mod source;
mod sql;
mod store;

pub use decision::{Action, Decision, DEFAULT_ACTION};
pub use error::{AddressParseError, DecideError, RuleError, SchemaError, StoreError};
pub use rule::{Request, Rule, RuleKind};
pub use schema::{PolicyFile, PolicyRecords, RuleRow, SourceBlock, SourceRuleRow};
pub use snapshot::{PolicySnapshot, RuleAction, SourceEntry};
pub use source::AddressMatcher;
pub use sql::SqlStore;
pub use store::{FileStore, PolicyStore};
