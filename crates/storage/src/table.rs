//! Wide-column style table over an object store.
//!
//! Each row is one JSON object at `{prefix}/{table}/{partition}/{row}.json`.
//! Partition and row keys must already be key-encoded (no `/`). Filtering is
//! done after listing, so queries are scans of a table or one partition.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutPayload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::StorageBackend;
use crate::error::StorageError;

/// Upper bound of rows committed together.
pub const MAX_BATCH_SIZE: usize = 100;

/// Rows fetched at once while scanning.
const SCAN_CONCURRENCY: usize = 16;

const ROW_SUFFIX: &str = ".json";

#[derive(Clone)]
pub struct TableStore {
    store: Arc<dyn ObjectStore>,
    root: Vec<String>,
    table: String,
}

impl TableStore {
    pub fn new(backend: &StorageBackend, table: &str) -> Self {
        let root = backend
            .prefix()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            store: backend.store(),
            root,
            table: table.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    fn dir(&self, partition: Option<&str>) -> Path {
        let mut parts: Vec<&str> = self.root.iter().map(String::as_str).collect();
        parts.push(&self.table);
        if let Some(p) = partition {
            parts.push(p);
        }
        Path::from_iter(parts)
    }

    fn row_path(&self, partition: &str, row: &str) -> Result<Path, StorageError> {
        for key in [partition, row] {
            if key.is_empty() || key.contains('/') {
                return Err(StorageError::Other(format!(
                    "invalid key '{key}' for table {}",
                    self.table
                )));
            }
        }
        Ok(self.dir(Some(partition)).child(format!("{row}{ROW_SUFFIX}")))
    }

    /// Insert or replace one row.
    pub async fn put<T: Serialize>(&self, partition: &str, row: &str, value: &T) -> Result<(), StorageError> {
        let path = self.row_path(partition, row)?;
        let body = serde_json::to_vec(value)?;
        self.store.put(&path, PutPayload::from(body)).await?;
        Ok(())
    }

    /// Insert a row only when none exists yet. Returns `false` when the row
    /// was already there. Atomic on stores with conditional puts; elsewhere
    /// it is a read followed by a write.
    pub async fn put_if_absent<T: Serialize>(&self, partition: &str, row: &str, value: &T) -> Result<bool, StorageError> {
        let path = self.row_path(partition, row)?;
        let body = serde_json::to_vec(value)?;
        match self
            .store
            .put_opts(&path, PutPayload::from(body.clone()), PutMode::Create.into())
            .await
        {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. }) => Ok(false),
            Err(object_store::Error::NotImplemented) => match self.store.head(&path).await {
                Ok(_) => Ok(false),
                Err(object_store::Error::NotFound { .. }) => {
                    self.store.put(&path, PutPayload::from(body)).await?;
                    Ok(true)
                }
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace many rows of one partition. Rows are committed in
    /// chunks of at most [`MAX_BATCH_SIZE`], up to `max_concurrency` chunks at
    /// a time. Returns the number of rows written.
    ///
    /// All or nothing: when any row fails, the rows this call already wrote
    /// are deleted again before the error is returned.
    pub async fn put_batch<T: Serialize>(
        &self,
        partition: &str,
        rows: &[(String, T)],
        max_concurrency: usize,
    ) -> Result<usize, StorageError> {
        let mut staged = Vec::with_capacity(rows.len());
        for (row, value) in rows {
            staged.push((self.row_path(partition, row)?, PutPayload::from(serde_json::to_vec(value)?)));
        }
        let chunks: Vec<Vec<(Path, PutPayload)>> = staged
            .chunks(MAX_BATCH_SIZE)
            .map(<[(Path, PutPayload)]>::to_vec)
            .collect();

        let store = self.store.clone();
        let results: Vec<(Vec<Path>, Option<object_store::Error>)> = stream::iter(chunks)
            .map(move |chunk| {
                let store = store.clone();
                async move {
                    let mut written = Vec::with_capacity(chunk.len());
                    for (path, payload) in chunk {
                        if let Err(e) = store.put(&path, payload).await {
                            return (written, Some(e));
                        }
                        written.push(path);
                    }
                    (written, None)
                }
            })
            .buffer_unordered(max_concurrency.max(1))
            .collect()
            .await;

        let mut written = Vec::new();
        let mut failure = None;
        for (paths, error) in results {
            written.extend(paths);
            if failure.is_none() {
                failure = error;
            }
        }

        if let Some(e) = failure {
            warn!(table = %self.table, partition, undo = written.len(), error = %e, "batch failed, removing written rows");
            for path in &written {
                match self.store.delete(path).await {
                    Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                    Err(undo) => warn!(table = %self.table, path = %path, error = %undo, "row left behind by failed batch"),
                }
            }
            return Err(e.into());
        }

        debug!(table = %self.table, partition, rows = written.len(), "batch committed");
        Ok(written.len())
    }

    /// Fetch one row, `None` when absent.
    pub async fn get<T: DeserializeOwned>(&self, partition: &str, row: &str) -> Result<Option<T>, StorageError> {
        let path = self.row_path(partition, row)?;
        match self.store.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// All rows of one partition, or of the whole table when `partition` is
    /// `None`. Rows that fail to decode are logged and skipped.
    pub async fn scan<T: DeserializeOwned>(&self, partition: Option<&str>) -> Result<Vec<T>, StorageError> {
        Ok(self.fetch(partition).await?.into_iter().map(|(_, row)| row).collect())
    }

    /// Delete every row of `partition` (or of the table) matching `expired`.
    /// Rows that fail to decode are left alone. Returns the number deleted.
    pub async fn delete_where<T, F>(&self, partition: Option<&str>, expired: F) -> Result<usize, StorageError>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let mut deleted = 0;
        for (location, row) in self.fetch::<T>(partition).await? {
            if !expired(&row) {
                continue;
            }
            match self.store.delete(&location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => deleted += 1,
                Err(e) => return Err(e.into()),
            }
        }
        if deleted > 0 {
            debug!(table = %self.table, deleted, "rows expired");
        }
        Ok(deleted)
    }

    async fn fetch<T: DeserializeOwned>(&self, partition: Option<&str>) -> Result<Vec<(Path, T)>, StorageError> {
        let dir = self.dir(partition);
        let locations: Vec<Path> = match self.store.list(Some(&dir)).try_collect::<Vec<_>>().await {
            Ok(metas) => metas
                .into_iter()
                .map(|m| m.location)
                .filter(|l| l.as_ref().ends_with(ROW_SUFFIX))
                .collect(),
            Err(object_store::Error::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let store = self.store.clone();
        let fetched: Vec<(Path, Option<_>)> = stream::iter(locations)
            .map(move |location| {
                let store = store.clone();
                async move {
                    match store.get(&location).await {
                        Ok(result) => Ok::<_, object_store::Error>((location, Some(result.bytes().await?))),
                        // deleted between list and get
                        Err(object_store::Error::NotFound { .. }) => Ok((location, None)),
                        Err(e) => Err(e),
                    }
                }
            })
            .buffered(SCAN_CONCURRENCY)
            .try_collect()
            .await?;

        let mut rows = Vec::with_capacity(fetched.len());
        for (location, bytes) in fetched {
            let Some(bytes) = bytes else { continue };
            match serde_json::from_slice(&bytes) {
                Ok(row) => rows.push((location, row)),
                Err(e) => warn!(table = %self.table, path = %location, error = %e, "skipping undecodable row"),
            }
        }
        Ok(rows)
    }

    pub async fn delete(&self, partition: &str, row: &str) -> Result<(), StorageError> {
        let path = self.row_path(partition, row)?;
        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::testing::FaultyStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        n: u32,
    }

    fn table() -> TableStore {
        TableStore::new(&StorageBackend::memory(), "t")
    }

    #[tokio::test]
    async fn put_then_get() {
        let t = table();
        t.put("p", "!a!b", &Row { n: 1 }).await.unwrap();
        assert_eq!(t.get::<Row>("p", "!a!b").await.unwrap(), Some(Row { n: 1 }));
        assert_eq!(t.get::<Row>("p", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_is_upsert() {
        let t = table();
        t.put("p", "r", &Row { n: 1 }).await.unwrap();
        t.put("p", "r", &Row { n: 2 }).await.unwrap();
        assert_eq!(t.scan::<Row>(Some("p")).await.unwrap(), vec![Row { n: 2 }]);
    }

    #[tokio::test]
    async fn scan_partition_and_table() {
        let t = table();
        t.put("p1", "a", &Row { n: 1 }).await.unwrap();
        t.put("p2", "b", &Row { n: 2 }).await.unwrap();
        assert_eq!(t.scan::<Row>(Some("p1")).await.unwrap().len(), 1);
        assert_eq!(t.scan::<Row>(None).await.unwrap().len(), 2);
        assert!(t.scan::<Row>(Some("empty")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_spans_several_chunks() {
        let t = table();
        let rows: Vec<(String, Row)> = (0..250).map(|n| (format!("r{n}"), Row { n })).collect();
        assert_eq!(t.put_batch("p", &rows, 4).await.unwrap(), 250);
        assert_eq!(t.scan::<Row>(Some("p")).await.unwrap().len(), 250);
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_behind() {
        let (store, backend) = FaultyStore::new().into_backend();
        let t = TableStore::new(&backend, "t");
        store.fail_puts_after(150);
        let rows: Vec<(String, Row)> = (0..250).map(|n| (format!("r{n}"), Row { n })).collect();

        assert!(t.put_batch("p", &rows, 1).await.is_err());
        assert_eq!(store.puts(), 150);
        assert!(t.scan::<Row>(Some("p")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_batch_keeps_earlier_batches() {
        let (store, backend) = FaultyStore::new().into_backend();
        let t = TableStore::new(&backend, "t");
        t.put("p", "kept", &Row { n: 0 }).await.unwrap();
        store.fail_puts_after(3);
        let rows: Vec<(String, Row)> = (1..=5).map(|n| (format!("r{n}"), Row { n })).collect();

        assert!(t.put_batch("p", &rows, 4).await.is_err());
        assert_eq!(t.scan::<Row>(Some("p")).await.unwrap(), vec![Row { n: 0 }]);
    }

    #[tokio::test]
    async fn scan_fails_when_listing_fails() {
        let (_store, backend) = FaultyStore::new().fail_reads_under("t").into_backend();
        let t = TableStore::new(&backend, "t");
        assert!(t.scan::<Row>(None).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let t = table();
        t.put("p", "r", &Row { n: 1 }).await.unwrap();
        t.delete("p", "r").await.unwrap();
        t.delete("p", "r").await.unwrap();
        assert_eq!(t.get::<Row>("p", "r").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_if_absent_keeps_first_row() {
        let t = table();
        assert!(t.put_if_absent("p", "r", &Row { n: 1 }).await.unwrap());
        assert!(!t.put_if_absent("p", "r", &Row { n: 2 }).await.unwrap());
        assert_eq!(t.get::<Row>("p", "r").await.unwrap(), Some(Row { n: 1 }));
    }

    #[tokio::test]
    async fn delete_where_removes_matching_rows() {
        let t = table();
        for n in 0..6 {
            t.put(if n % 2 == 0 { "even" } else { "odd" }, &format!("r{n}"), &Row { n }).await.unwrap();
        }
        assert_eq!(t.delete_where::<Row, _>(None, |r| r.n < 3).await.unwrap(), 3);
        assert_eq!(t.delete_where::<Row, _>(Some("odd"), |r| r.n == 5).await.unwrap(), 1);

        let mut left: Vec<u32> = t.scan::<Row>(None).await.unwrap().into_iter().map(|r| r.n).collect();
        left.sort();
        assert_eq!(left, vec![3, 4]);
    }

    #[tokio::test]
    async fn rejects_unencoded_keys() {
        let t = table();
        assert!(t.put("p", "a/b", &Row { n: 1 }).await.is_err());
        assert!(t.put("", "a", &Row { n: 1 }).await.is_err());
    }

    #[tokio::test]
    async fn local_filesystem_backend() {
        let dir = tempfile::tempdir().unwrap();
        let t = TableStore::new(&StorageBackend::local(dir.path()).unwrap(), "t");
        assert!(t.scan::<Row>(None).await.unwrap().is_empty());
        t.put("p", "r", &Row { n: 9 }).await.unwrap();
        assert_eq!(t.scan::<Row>(None).await.unwrap(), vec![Row { n: 9 }]);
        assert!(dir.path().join("t").join("p").join("r.json").exists());
    }
}
