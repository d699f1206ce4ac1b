//! SQLite-backed policy store.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::error::StoreError;
use crate::schema::{PolicyRecords, RuleRow, SourceRuleRow};
use crate::store::PolicyStore;

/// Every `(source, rule)` pair reachable through group membership and ACL
/// grants.  Rows of one source are adjacent; within a source, rules keep
/// the order in which access and ACL entries were created.
const SOURCE_RULES: &str = r#"
SELECT sources.source AS source, rules.rule_id AS rule
FROM sources
JOIN members ON sources.source_id = members.source_id
JOIN groups ON members.group_id = groups.group_id
JOIN groupaccess ON groups.group_id = groupaccess.group_id
JOIN acls ON groupaccess.acl_id = acls.acl_id
JOIN aclrules ON acls.acl_id = aclrules.acl_id
JOIN rules ON aclrules.rule_id = rules.rule_id
ORDER BY sources.source, groupaccess.rowid, aclrules.rowid
"#;

const RULES: &str = r#"
SELECT rule_id, type, value, action
FROM rules
"#;

/// Policy read from the admin console's SQLite database.
pub struct SqlStore {
    pool: SqlitePool,
    url: String,
}

impl SqlStore {
    /// Open the database read-only.  Accepts `sqlite:` URLs or plain paths.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn parse_source_row(row: &SqliteRow) -> Result<SourceRuleRow, sqlx::Error> {
        Ok(SourceRuleRow {
            source: row.try_get("source")?,
            rule: row.try_get("rule")?,
        })
    }

    fn parse_rule_row(row: &SqliteRow) -> Result<RuleRow, sqlx::Error> {
        Ok(RuleRow {
            name: row.try_get("rule_id")?,
            kind: row.try_get("type")?,
            value: row.try_get("value")?,
            action: row.try_get("action")?,
        })
    }
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore").field("url", &self.url).finish()
    }
}

#[async_trait]
impl PolicyStore for SqlStore {
    async fn load(&self) -> Result<PolicyRecords, StoreError> {
        // Both queries inside one transaction so they see the same data.
        let mut tx = self.pool.begin().await?;

        let sources = sqlx::query(SOURCE_RULES)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(Self::parse_source_row)
            .collect::<Result<Vec<_>, _>>()?;

        let rules = sqlx::query(RULES)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(Self::parse_rule_row)
            .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;

        Ok(PolicyRecords { sources, rules })
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.url.trim_start_matches("sqlite:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::Action;
    use crate::error::SchemaError;
    use crate::rule::Request;
    use crate::snapshot::PolicySnapshot;

    const SCHEMA: &str = include_str!("../testdata/schema.sql");
    const FIXTURE: &str = include_str!("../testdata/policy.sql");

    async fn setup_store() -> SqlStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database");
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .expect("Failed to create schema");
        sqlx::raw_sql(FIXTURE)
            .execute(&pool)
            .await
            .expect("Failed to load fixture");
        SqlStore::from_pool(pool, "sqlite::memory:")
    }

    async fn snapshot(store: &SqlStore) -> PolicySnapshot {
        let records = store.load().await.expect("load failed");
        PolicySnapshot::build(records).expect("build failed")
    }

    #[tokio::test]
    async fn loads_rows_from_membership_chain() {
        let store = setup_store().await;
        let records = store.load().await.unwrap();
        assert_eq!(records.rules.len(), 18);
        // Every source row, including the unparseable one.
        assert_eq!(records.sources.len(), 34);
        assert_eq!(records.sources[0].source, "0.0.0.0/1");
        assert!(records
            .sources
            .iter()
            .any(|r| r.source == "not-an-address"));
    }

    #[tokio::test]
    async fn rules_within_a_source_keep_acl_order() {
        let store = setup_store().await;
        let records = store.load().await.unwrap();
        let local: Vec<&str> = records
            .sources
            .iter()
            .filter(|r| r.source == "127.0.0.0/8")
            .map(|r| r.rule.as_str())
            .collect();
        assert_eq!(&local[..3], &["ads", "cachemgr", "unencrypted"]);
        assert_eq!(local.len(), 15);
    }

    #[tokio::test]
    async fn snapshot_order_is_most_specific_first() {
        let store = setup_store().await;
        let snap = snapshot(&store).await;
        let order: Vec<String> = snap
            .entries()
            .iter()
            .map(|e| e.matcher.to_string())
            .collect();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], "127.0.0.1/32");
        assert_eq!(order[1], "127.0.0.0/8");
        assert_eq!(order[2], "0.0.0.0/1");
        assert_eq!(order[3], "129.99.0.1/255.255.0.255");
        assert!(order[4].ends_with("/::ffff:ffff"));
    }

    #[tokio::test]
    async fn fixture_decisions() {
        let store = setup_store().await;
        let snap = snapshot(&store).await;

        let cases: &[(&str, &str, &str, &str, bool)] = &[
            // domain
            ("HTTP", "127.0.0.1", "GET", "http://www.unencrypted.habets.se/", true),
            ("HTTP", "127.0.0.1", "GET", "http://www.unencrypted.habets.se:8080/", false),
            ("HTTP", "128.0.0.1", "GET", "http://www.unencrypted.habets.se/", false),
            ("HTTP", "127.0.0.1", "GET", "http://www.unencrypted.habets.co.uk/", false),
            // CIDR
            ("HTTP", "127.0.0.1", "GET", "http://9.1.2.3/blah", true),
            ("HTTP", "127.0.0.1", "GET", "http://9.1.2.3:8080/blah", true),
            ("HTTP", "127.0.0.1", "GET", "http://9.1.2.3:8081/blah", false),
            ("HTTP", "127.0.0.1", "GET", "http://9.2.2.3/blah", false),
            ("NONE", "127.0.0.1", "CONNECT", "9.2.2.3:443", true),
            ("NONE", "127.0.0.1", "CONNECT", "9.2.2.3:8443", true),
            ("NONE", "127.0.0.1", "CONNECT", "9.2.2.3:9443", false),
            ("NONE", "127.0.0.1", "CONNECT", "9.1.2.3:443", false),
            // wildcard port
            ("HTTP", "127.0.0.1", "GET", "http://9.9.0.1/blah", true),
            ("HTTP", "127.0.0.1", "GET", "http://9.9.0.1:80/blah", true),
            ("HTTP", "127.0.0.1", "GET", "http://9.9.0.1:8080/blah", true),
            ("NONE", "127.0.0.1", "CONNECT", "9.9.0.1", false),
            ("NONE", "127.0.0.1", "CONNECT", "9.9.0.1:443", true),
            ("NONE", "127.0.0.1", "CONNECT", "9.9.0.1:8443", true),
            // bob's own rule, not granted to the rest of local
            ("NONE", "127.0.0.1", "CONNECT", "9.10.0.1:443", true),
            ("NONE", "127.0.0.2", "CONNECT", "9.10.0.1:443", false),
            // literal addresses; missing port means 80
            ("HTTP", "127.0.0.1", "GET", "http://1.2.3.4/path/blah", true),
            ("HTTP", "127.0.0.1", "GET", "http://1.2.3.4:80/path/blah", true),
            ("HTTP", "127.0.0.1", "GET", "http://1.2.3.4:8080/path/blah", false),
            ("HTTP", "127.0.0.1", "GET", "http://1.2.3.5/path/blah", false),
            ("HTTP", "127.0.0.1", "GET", "http://1.2.3.5:80/path/blah", false),
            ("HTTP", "127.0.0.1", "GET", "http://1.2.3.5:8080/path/blah", true),
            // regex
            ("HTTP", "127.0.0.1", "GET", "http://www.google.co.uk/url?foo=bar", true),
            ("HTTP", "127.0.0.1", "GET", "http://www.google.co.uk/", false),
            // https-domain
            ("NONE", "127.0.0.1", "CONNECT", "www.habets.se:443", true),
            ("NONE", "127.0.0.1", "CONNECT", "www.habets.se:8443", false),
            ("NONE", "127.0.0.1", "CONNECT", "www.habets.co.uk:443", false),
            ("NONE", "127.0.0.1", "CONNECT", "www.port.com:443", false),
            ("NONE", "127.0.0.1", "CONNECT", "www.port.com:8443", true),
            ("NONE", "127.0.0.1", "CONNECT", "www.github.com:443", false),
            ("NONE", "127.0.0.1", "CONNECT", "github.com:443", true),
            // lower half of v4 space
            ("HTTP", "10.0.0.1", "GET", "http://half.example.com/", true),
            ("HTTP", "10.0.0.1", "GET", "http://www.unencrypted.habets.se/", false),
            // IPv6 mask
            ("HTTP", "2001:db8::1234:5678", "GET", "http://www.unencrypted.habets.se/", true),
            ("HTTP", "2001:db8::1234:5679", "GET", "http://www.unencrypted.habets.se/", false),
            // IPv4 mask
            ("HTTP", "129.99.0.1", "GET", "http://www.unencrypted.habets.se/", true),
            ("HTTP", "129.99.99.1", "GET", "http://www.unencrypted.habets.se/", true),
            ("HTTP", "129.99.0.2", "GET", "http://www.unencrypted.habets.se/", false),
            ("HTTP", "129.99.99.2", "GET", "http://www.unencrypted.habets.se/", false),
        ];

        for &(protocol, source, method, target, allowed) in cases {
            let req = Request {
                protocol,
                source,
                method,
                target,
            };
            let d = snap.decide(&req).expect("decide failed");
            assert_eq!(
                d.action == Action::Allow,
                allowed,
                "wrong decision {d:?} for {req:?}"
            );
        }
    }

    #[tokio::test]
    async fn block_and_ignore_rules_resolve_to_their_action() {
        let store = setup_store().await;
        let snap = snapshot(&store).await;

        let d = snap
            .decide(&Request {
                protocol: "HTTP",
                source: "127.0.0.5",
                method: "GET",
                target: "http://ads.example.com/banner",
            })
            .unwrap();
        assert_eq!(d.action, Action::Block);
        assert_eq!(d.matched_rule.as_deref(), Some("ads"));

        let d = snap
            .decide(&Request {
                protocol: "HTTP",
                source: "127.0.0.5",
                method: "GET",
                target: "http://localhost/squid-internal-mgr/",
            })
            .unwrap();
        assert_eq!(d.action, Action::Ignore);
    }

    #[tokio::test]
    async fn reloading_unchanged_store_gives_identical_decisions() {
        let store = setup_store().await;
        let first = snapshot(&store).await;
        let second = snapshot(&store).await;

        let requests = [
            ("HTTP", "127.0.0.1", "GET", "http://www.unencrypted.habets.se/"),
            ("NONE", "127.0.0.2", "CONNECT", "9.10.0.1:443"),
            ("HTTP", "129.99.99.1", "GET", "http://www.unencrypted.habets.se/"),
            ("HTTP", "200.0.0.1", "GET", "http://half.example.com/"),
            ("HTTP", "127.0.0.1", "GET", "http://ads.example.com/banner"),
        ];
        for (protocol, source, method, target) in requests {
            let req = Request {
                protocol,
                source,
                method,
                target,
            };
            assert_eq!(first.decide(&req).unwrap(), second.decide(&req).unwrap());
        }
    }

    #[tokio::test]
    async fn unknown_rule_type_fails_the_whole_build() {
        let store = setup_store().await;
        sqlx::query("INSERT INTO rules(rule_id, type, value, action) VALUES('odd', 'glob', '*', 'allow')")
            .execute(store.pool())
            .await
            .unwrap();
        let records = store.load().await.unwrap();
        let err = PolicySnapshot::build(records).unwrap_err();
        assert!(
            matches!(err, SchemaError::UnknownRuleType { ref kind, .. } if kind == "glob"),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn missing_tables_are_a_store_error() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqlStore::from_pool(pool, "sqlite::memory:");
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn describe_mentions_database() {
        let store = setup_store().await;
        assert_eq!(store.describe(), "sqlite::memory:");
    }
}
