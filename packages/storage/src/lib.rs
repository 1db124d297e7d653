//! Object storage used by the pipeline to read and clean up uploaded files.
//!
//! Goal:
//! - S3-compatible storage in production/staging
//! - On-disk storage for local dev
//! - In-memory storage for tests
//!
//! Objects are addressed by `(bucket, key)`. One `object_store` backend is
//! built lazily per bucket and cached for the lifetime of the `Storage`.

use std::collections::HashMap;
use std::io;
use std::path::{Path as FsPath, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use object_store::path::Path;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

/// Buffered reader over an object's content.
pub type ObjectReader = Box<dyn AsyncBufRead + Unpin + Send>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl StorageError {
    /// Whether the error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

impl S3Config {
    /// Plain AWS S3 in `region`, credentials from the ambient environment.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            allow_http: false,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            virtual_hosted_style: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    /// Each bucket is a subdirectory of `root`.
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
        }
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to s3
    ///
    /// S3 env vars (S3-compatible):
    /// - `AWS_REGION` (default: `us-east-1`, or `default_region` when given)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (`true`/`false`, default: auto true if endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (`true`/`false`, default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem env vars:
    /// - `STORAGE_FS_ROOT` (default: `./data/object_store`)
    pub fn from_env(default_region: Option<&str>) -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").ok().and_then(non_empty);

        let cfg = match backend.as_deref() {
            Some("s3") | None => Self::s3(read_s3_config(default_region)?),
            Some("filesystem") | Some("fs") => {
                let root = std::env::var("STORAGE_FS_ROOT")
                    .ok()
                    .and_then(non_empty)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("./data/object_store"));
                Self::filesystem(root)
            }
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(cfg)
    }
}

#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    backend: StorageBackendConfig,
    buckets: Arc<Mutex<HashMap<String, Arc<dyn ObjectStore>>>>,
}

impl Storage {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn kind_str(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let kind = match &cfg.backend {
            StorageBackendConfig::S3(_) => StorageKind::S3,
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(root)?;
                StorageKind::Filesystem
            }
            StorageBackendConfig::Memory => StorageKind::Memory,
        };

        Ok(Self {
            kind,
            backend: cfg.backend,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn from_env(default_region: Option<&str>) -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env(default_region)?)
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::InvalidConfig(
                "bucket name must not be empty".to_string(),
            ));
        }

        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| StorageError::InvalidConfig("bucket cache poisoned".to_string()))?;
        if let Some(store) = buckets.get(bucket) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = match &self.backend {
            StorageBackendConfig::S3(s3) => Arc::new(build_s3(s3, bucket)?),
            StorageBackendConfig::Filesystem { root } => {
                let dir = root.join(bucket);
                ensure_dir(&dir)?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(&dir)?)
            }
            StorageBackendConfig::Memory => Arc::new(object_store::memory::InMemory::new()),
        };
        buckets.insert(bucket.to_string(), store.clone());
        Ok(store)
    }

    fn to_path(key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidConfig(
                "object key must not be empty".to_string(),
            ));
        }
        Ok(Path::from(key))
    }

    pub async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
    ) -> Result<(), StorageError> {
        let store = self.bucket(bucket)?;
        let path = Self::to_path(key)?;
        store
            .put(&path, object_store::PutPayload::from(bytes))
            .await?;
        Ok(())
    }

    pub async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        let store = self.bucket(bucket)?;
        let path = Self::to_path(key)?;
        let res = store.get(&path).await?;
        Ok(res.bytes().await?)
    }

    /// Open an object for streaming reads.
    ///
    /// The request is issued eagerly, so a missing object fails here rather
    /// than on the first read.
    pub async fn get_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectReader, StorageError> {
        let store = self.bucket(bucket)?;
        let path = Self::to_path(key)?;
        let res = store.get(&path).await?;
        let stream = res.into_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    pub async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let store = self.bucket(bucket)?;
        let path = Self::to_path(key)?;
        store.delete(&path).await?;
        Ok(())
    }

    pub async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let store = self.bucket(bucket)?;
        let path = Self::to_path(key)?;
        match store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool_env(var_name: &str) -> Result<Option<bool>, StorageError> {
    let v = match std::env::var(var_name) {
        Ok(v) => v,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => {
            return Err(StorageError::InvalidConfig(format!(
                "failed reading {var_name}: {e}"
            )));
        }
    };

    let normalized = v.trim().to_ascii_lowercase();
    let parsed = match normalized.as_str() {
        "1" | "true" | "yes" | "y" => true,
        "0" | "false" | "no" | "n" => false,
        _ => {
            return Err(StorageError::InvalidConfig(format!(
                "invalid boolean for {var_name}={v} (expected true/false)"
            )));
        }
    };
    Ok(Some(parsed))
}

fn read_s3_config(default_region: Option<&str>) -> Result<S3Config, StorageError> {
    let region = std::env::var("AWS_REGION")
        .ok()
        .and_then(non_empty)
        .or_else(|| default_region.map(str::to_string))
        .unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = std::env::var("S3_ENDPOINT").ok().and_then(non_empty);
    let allow_http = match parse_bool_env("S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.trim_start().to_ascii_lowercase().starts_with("http://")),
    };

    let virtual_hosted_style = parse_bool_env("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);

    let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().and_then(non_empty);
    let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .ok()
        .and_then(non_empty);
    let session_token = std::env::var("AWS_SESSION_TOKEN").ok().and_then(non_empty);

    Ok(S3Config {
        region,
        endpoint,
        allow_http,
        access_key_id,
        secret_access_key,
        session_token,
        virtual_hosted_style,
    })
}

fn build_s3(cfg: &S3Config, bucket: &str) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_region(&cfg.region)
        .with_virtual_hosted_style_request(cfg.virtual_hosted_style);

    if let Some(endpoint) = &cfg.endpoint {
        builder = builder.with_endpoint(endpoint);
    }
    if cfg.allow_http {
        builder = builder.with_allow_http(true);
    }
    if let Some(access_key_id) = &cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = &cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }
    if let Some(session_token) = &cfg.session_token {
        builder = builder.with_token(session_token);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory())?;
        storage
            .put_bytes("uploads", "hello.txt", Bytes::from("hi"))
            .await?;
        let got = storage.get_bytes("uploads", "hello.txt").await?;
        assert_eq!(got, Bytes::from("hi"));
        Ok(())
    }

    #[tokio::test]
    async fn buckets_are_isolated() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory())?;
        storage.put_bytes("a", "same.txt", Bytes::from("one")).await?;

        assert!(storage.exists("a", "same.txt").await?);
        assert!(!storage.exists("b", "same.txt").await?);
        let missing = storage.get_bytes("b", "same.txt").await;
        assert!(missing.is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn filesystem_stream_and_delete() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let storage = Storage::new(StorageConfig::filesystem(dir.path()))?;

        storage
            .put_bytes("docs", "nested/file.txt", Bytes::from("streamed content"))
            .await?;
        assert!(dir.path().join("docs").join("nested").join("file.txt").exists());

        let mut reader = storage.get_reader("docs", "nested/file.txt").await?;
        let mut text = String::new();
        reader.read_to_string(&mut text).await?;
        assert_eq!(text, "streamed content");

        storage.delete("docs", "nested/file.txt").await?;
        assert!(!storage.exists("docs", "nested/file.txt").await?);
        Ok(())
    }

    #[tokio::test]
    async fn missing_object_fails_on_open() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory())?;
        let res = storage.get_reader("uploads", "nope.txt").await;
        assert!(res.is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_empty_names() -> Result<(), StorageError> {
        let storage = Storage::new(StorageConfig::memory())?;
        assert!(matches!(
            storage.get_bytes("", "k").await,
            Err(StorageError::InvalidConfig(_))
        ));
        assert!(matches!(
            storage.get_bytes("b", "/").await,
            Err(StorageError::InvalidConfig(_))
        ));
        Ok(())
    }
}
