use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use tracing::info;

use chaos_core::config::{AwsConfig, Config};

use crate::error::StorageError;

/// Where the inventory, schedule and activity tables live.
#[derive(Clone)]
pub enum StorageBackend {
    Local(LocalBackend),
    S3(S3Backend),
    Memory(Arc<dyn ObjectStore>),
}

impl StorageBackend {
    /// S3 when AWS is configured, local filesystem otherwise.
    pub fn from_config(config: &Config) -> Result<Self, StorageError> {
        if config.aws.is_configured() {
            Self::s3(&config.aws)
        } else {
            std::fs::create_dir_all(&config.storage.data_dir)?;
            Self::local(&config.storage.data_dir)
        }
    }

    pub fn local(data_dir: &Path) -> Result<Self, StorageError> {
        Ok(StorageBackend::Local(LocalBackend::new(data_dir)?))
    }

    pub fn s3(aws: &AwsConfig) -> Result<Self, StorageError> {
        Ok(StorageBackend::S3(S3Backend::new(aws)?))
    }

    pub fn memory() -> Self {
        StorageBackend::Memory(Arc::new(InMemory::new()))
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        match self {
            StorageBackend::Local(b) => b.store.clone(),
            StorageBackend::S3(b) => b.store.clone(),
            StorageBackend::Memory(store) => store.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageBackend::S3(_))
    }

    /// Key prefix under which all tables are written.
    pub fn prefix(&self) -> &str {
        match self {
            StorageBackend::S3(b) => &b.prefix,
            _ => "",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            StorageBackend::Local(b) => format!("local:{}", b.data_dir.display()),
            StorageBackend::S3(b) => format!("s3://{}/{}", b.bucket, b.prefix),
            StorageBackend::Memory(_) => "memory".to_string(),
        }
    }
}

/// Local filesystem backend.
#[derive(Clone)]
pub struct LocalBackend {
    pub store: Arc<dyn ObjectStore>,
    pub data_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(data_dir: &Path) -> Result<Self, StorageError> {
        let canonical = std::fs::canonicalize(data_dir).unwrap_or_else(|_| data_dir.to_path_buf());
        let store = LocalFileSystem::new_with_prefix(&canonical)?;
        info!(data_dir = %canonical.display(), "Storage: local backend");
        Ok(Self {
            store: Arc::new(store),
            data_dir: canonical,
        })
    }
}

/// S3 backend.
#[derive(Clone)]
pub struct S3Backend {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub prefix: String,
}

impl S3Backend {
    pub fn new(aws: &AwsConfig) -> Result<Self, StorageError> {
        let bucket = aws
            .s3_bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BUCKET not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(&aws.region);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(ref token) = aws.session_token {
            builder = builder.with_token(token);
        }

        match aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            Some(endpoint) => {
                // object_store requires an absolute URL
                let endpoint_url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.to_string()
                } else {
                    format!("https://{endpoint}")
                };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_allow_http(endpoint_url.starts_with("http://"))
                    .with_endpoint(endpoint_url);
            }
            None => {
                builder = builder.with_url(format!("s3://{bucket}"));
            }
        }

        let store = builder.build()?;

        let prefix = aws
            .s3_prefix
            .as_deref()
            .unwrap_or("")
            .trim_matches('/')
            .to_string();

        info!(bucket, prefix = %prefix, region = %aws.region, "Storage: S3 backend");

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            prefix,
        })
    }
}
