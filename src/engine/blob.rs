use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use ts_rs::TS;

use crate::error::AppError;

// ============================================================================
// Types
// ============================================================================

/// Result of a successful upload. `locator` is what attachments reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StoredBlob {
    pub locator: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct FetchedBlob {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobMeta {
    filename: String,
    mime_type: String,
}

/// Opaque storage for attachment bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>, filename: &str, mime_type: &str) -> Result<StoredBlob, AppError>;

    async fn get(&self, locator: &str) -> Result<FetchedBlob, AppError>;

    /// Best-effort; failures are logged, not returned.
    async fn delete(&self, locator: &str);
}

/// Run `fut`, turning an expired deadline into `Transient`.
pub async fn bounded<T, F>(timeout: Duration, op: &str, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Transient(format!(
            "blob store {op} timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

// ============================================================================
// Timeout decorator
// ============================================================================

/// Applies one deadline to every call on the wrapped store.
pub struct BoundedBlobStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S: BlobStore> BoundedBlobStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for BoundedBlobStore<S> {
    async fn put(&self, bytes: Vec<u8>, filename: &str, mime_type: &str) -> Result<StoredBlob, AppError> {
        bounded(self.timeout, "put", self.inner.put(bytes, filename, mime_type)).await
    }

    async fn get(&self, locator: &str) -> Result<FetchedBlob, AppError> {
        bounded(self.timeout, "get", self.inner.get(locator)).await
    }

    async fn delete(&self, locator: &str) {
        if tokio::time::timeout(self.timeout, self.inner.delete(locator))
            .await
            .is_err()
        {
            tracing::warn!(locator, "Blob delete timed out");
        }
    }
}

// ============================================================================
// Local filesystem store
// ============================================================================

/// Content-addressed store under a directory. The locator is the SHA-256 of
/// the bytes, so identical uploads share one file.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn is_locator(locator: &str) -> bool {
        locator.len() == 64 && locator.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
    }

    fn paths(&self, locator: &str) -> Result<(PathBuf, PathBuf), AppError> {
        if !Self::is_locator(locator) {
            return Err(AppError::NotFound(format!("Blob {locator}")));
        }
        let dir = self.root.join(&locator[..2]);
        Ok((dir.join(locator), dir.join(format!("{locator}.meta.json"))))
    }

    async fn read_meta(path: &Path) -> Option<BlobMeta> {
        let raw = tokio::fs::read(path).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: Vec<u8>, filename: &str, mime_type: &str) -> Result<StoredBlob, AppError> {
        let locator = hex::encode(Sha256::digest(&bytes));
        let (path, meta_path) = self.paths(&locator)?;
        let size_bytes = bytes.len() as u64;

        let write = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if tokio::fs::try_exists(&path).await? {
                return Ok::<(), std::io::Error>(());
            }
            let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;
            let meta = serde_json::to_vec(&BlobMeta {
                filename: filename.to_string(),
                mime_type: mime_type.to_string(),
            })
            .map_err(std::io::Error::other)?;
            tokio::fs::write(&meta_path, meta).await
        };
        write
            .await
            .map_err(|e| AppError::UploadFailed(format!("{filename}: {e}")))?;

        tracing::debug!(locator = %locator, size_bytes, "Blob stored");
        Ok(StoredBlob { locator, size_bytes })
    }

    async fn get(&self, locator: &str) -> Result<FetchedBlob, AppError> {
        let (path, meta_path) = self.paths(locator)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(format!("Blob {locator}")));
            }
            Err(e) => return Err(AppError::Transient(format!("blob read failed: {e}"))),
        };
        let meta = Self::read_meta(&meta_path).await;
        Ok(FetchedBlob {
            bytes,
            mime_type: meta.as_ref().map(|m| m.mime_type.clone()),
            filename: meta.map(|m| m.filename),
        })
    }

    async fn delete(&self, locator: &str) {
        let Ok((path, meta_path)) = self.paths(locator) else {
            return;
        };
        for p in [path, meta_path] {
            if let Err(e) = tokio::fs::remove_file(&p).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(locator, error = %e, "Blob delete failed");
                }
            }
        }
    }
}

// ============================================================================
// Remote HTTP store
// ============================================================================

/// Client for an external blob service:
/// `POST /blobs` (raw body) → `{locator, size_bytes}`, `GET /blobs/{locator}`,
/// `DELETE /blobs/{locator}`.
pub struct HttpBlobStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Build a request, authenticated when an API key is configured.
    fn authed(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, bytes: Vec<u8>, filename: &str, mime_type: &str) -> Result<StoredBlob, AppError> {
        let upload_err = |e: reqwest::Error| AppError::UploadFailed(format!("{filename}: {e}"));
        self.authed(reqwest::Method::POST, "/blobs")
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .header("x-filename", filename)
            .body(bytes)
            .send()
            .await
            .map_err(upload_err)?
            .error_for_status()
            .map_err(upload_err)?
            .json()
            .await
            .map_err(upload_err)
    }

    async fn get(&self, locator: &str) -> Result<FetchedBlob, AppError> {
        let path = format!("/blobs/{}", urlencode_segment(locator));
        let resp = self.authed(reqwest::Method::GET, &path).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("Blob {locator}")));
        }
        let resp = resp.error_for_status()?;
        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let filename = resp
            .headers()
            .get("x-filename")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedBlob {
            bytes,
            mime_type,
            filename,
        })
    }

    async fn delete(&self, locator: &str) {
        let path = format!("/blobs/{}", urlencode_segment(locator));
        let result = self
            .authed(reqwest::Method::DELETE, &path)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            tracing::warn!(locator, error = %e, "Remote blob delete failed");
        }
    }
}

fn urlencode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
