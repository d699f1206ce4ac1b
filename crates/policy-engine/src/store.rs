use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::loader;
use crate::schema::PolicyRecords;

/// Read-only access to the policy rows a snapshot is built from.
///
/// Implementations are re-read on every reload; they must return a
/// consistent point-in-time view or an error.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load(&self) -> Result<PolicyRecords, StoreError>;

    /// Short human-readable identification for logs.
    fn describe(&self) -> String;
}

/// Policy kept in a YAML file, re-read on every load.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PolicyStore for FileStore {
    async fn load(&self) -> Result<PolicyRecords, StoreError> {
        loader::load_policy(&self.path)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
