//! In-memory object store with injectable failures, for exercising store
//! error paths.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMultipartOpts, PutOptions,
    PutPayload, PutResult, Result,
};

use crate::backend::StorageBackend;

/// Wraps [`InMemory`]. Reads or writes under a path prefix can be made to
/// fail, and puts can be given a budget after which every put fails.
#[derive(Debug)]
pub struct FaultyStore {
    inner: InMemory,
    puts: AtomicUsize,
    put_budget: AtomicUsize,
    failing_reads: Option<String>,
    failing_writes: Option<String>,
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemory::new(),
            puts: AtomicUsize::new(0),
            put_budget: AtomicUsize::new(usize::MAX),
            failing_reads: None,
            failing_writes: None,
        }
    }

    /// `list` and `get` fail for paths starting with `prefix`.
    pub fn fail_reads_under(mut self, prefix: &str) -> Self {
        self.failing_reads = Some(prefix.to_string());
        self
    }

    /// `put` fails for paths starting with `prefix`.
    pub fn fail_writes_under(mut self, prefix: &str) -> Self {
        self.failing_writes = Some(prefix.to_string());
        self
    }

    /// Allow `n` more successful puts, then fail every put.
    pub fn fail_puts_after(&self, n: usize) {
        self.put_budget.store(self.puts.load(Ordering::SeqCst) + n, Ordering::SeqCst);
    }

    /// Successful puts so far.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn into_backend(self) -> (Arc<Self>, StorageBackend) {
        let store = Arc::new(self);
        let backend = StorageBackend::Memory(store.clone());
        (store, backend)
    }

    fn matches(rule: &Option<String>, location: &str) -> bool {
        rule.as_deref().is_some_and(|prefix| location.starts_with(prefix))
    }
}

fn injected() -> object_store::Error {
    object_store::Error::Generic {
        store: "faulty",
        source: "injected fault".into(),
    }
}

impl fmt::Display for FaultyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultyStore({})", self.inner)
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put_opts(&self, location: &Path, payload: PutPayload, opts: PutOptions) -> Result<PutResult> {
        if Self::matches(&self.failing_writes, location.as_ref()) {
            return Err(injected());
        }
        let budget = self.put_budget.load(Ordering::SeqCst);
        if self
            .puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < budget).then_some(n + 1))
            .is_err()
        {
            return Err(injected());
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(&self, location: &Path, opts: PutMultipartOpts) -> Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        if Self::matches(&self.failing_reads, location.as_ref()) {
            return Err(injected());
        }
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, Result<ObjectMeta>> {
        if prefix.is_some_and(|p| Self::matches(&self.failing_reads, p.as_ref())) {
            return stream::iter(vec![Err(injected())]).boxed();
        }
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}
