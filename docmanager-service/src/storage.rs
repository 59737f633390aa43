//! Object storage for raw document bytes.
//!
//! Objects live under `storage.data_dir/objects`, addressed by slash
//! separated keys. Read access from outside goes through HMAC-signed URLs
//! that the API verifies before serving.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult, StorageError};

type HmacSha256 = Hmac<Sha256>;

/// A time-limited link to one object
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Stores and retrieves raw document bytes
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> ServiceResult<()>;

    async fn get(&self, key: &str) -> ServiceResult<Bytes>;

    /// Remove an object; `false` when it was already gone
    async fn delete(&self, key: &str) -> ServiceResult<bool>;

    /// Link granting read access to `key` for `expires_in`
    fn presigned_url(&self, key: &str, expires_in: Duration) -> ServiceResult<PresignedUrl>;

    /// Check the query of a link produced by [`ObjectStore::presigned_url`]
    fn verify_presigned(&self, key: &str, expires: i64, signature: &str) -> ServiceResult<()>;
}

/// Signs and verifies object URLs
#[derive(Clone)]
pub struct UrlSigner {
    keyed: HmacSha256,
}

impl UrlSigner {
    pub fn new(secret: &str) -> ServiceResult<Self> {
        let keyed =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| ServiceError::Config {
                message: format!("Invalid signing secret: {}", e),
            })?;
        Ok(Self { keyed })
    }

    fn mac(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    /// Hex signature over `"{key}\n{expires}"`
    pub fn sign(&self, key: &str, expires: i64) -> String {
        hex::encode(self.mac(key, expires).finalize().into_bytes())
    }

    /// Check a signature and its expiry against `now` (unix seconds)
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> ServiceResult<()> {
        if expires < now {
            return Err(StorageError::InvalidSignature.into());
        }

        let provided = hex::decode(signature).map_err(|_| StorageError::InvalidSignature)?;
        self.mac(key, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature)?;

        Ok(())
    }
}

/// Filesystem-backed object store
pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner, public_base_url: String) -> Self {
        Self {
            root: root.into(),
            signer,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Map a key to a path, refusing anything that escapes the root
    fn path_for(&self, key: &str) -> ServiceResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Keys are relative, slash separated, and never climb out of the store.
pub fn validate_key(key: &str) -> ServiceResult<()> {
    let invalid = || {
        ServiceError::Storage(StorageError::InvalidKey {
            key: key.to_string(),
        })
    };

    if key.is_empty() || key.contains('\\') || key.starts_with('/') {
        return Err(invalid());
    }

    let all_normal = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal {
        return Err(invalid());
    }

    Ok(())
}

fn io_error(key: &str, source: std::io::Error) -> ServiceError {
    if source.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound {
            key: key.to_string(),
        }
        .into()
    } else {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
        .into()
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, data: Bytes) -> ServiceResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io {
                    key: key.to_string(),
                    source: e,
                })?;
        }

        tokio::fs::write(&path, &data).await.map_err(|e| StorageError::Io {
            key: key.to_string(),
            source: e,
        })?;

        debug!(key = %key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> ServiceResult<Bytes> {
        let path = self.path_for(key)?;
        let data = tokio::fs::read(&path).await.map_err(|e| io_error(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> ServiceResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn presigned_url(&self, key: &str, expires_in: Duration) -> ServiceResult<PresignedUrl> {
        validate_key(key)?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).map_err(|e| ServiceError::Internal {
                message: format!("Invalid presign expiry: {}", e),
            })?;
        let expires = expires_at.timestamp();
        let signature = self.signer.sign(key, expires);

        Ok(PresignedUrl {
            url: format!(
                "{}/objects/{}?expires={}&signature={}",
                self.public_base_url, key, expires, signature
            ),
            expires_at,
        })
    }

    fn verify_presigned(&self, key: &str, expires: i64, signature: &str) -> ServiceResult<()> {
        validate_key(key)?;
        self.signer
            .verify(key, expires, signature, Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> LocalObjectStore {
        LocalObjectStore::new(
            dir,
            UrlSigner::new("secret").unwrap(),
            "http://localhost:8080/".to_string(),
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store
            .put("documents/report.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();
        assert_eq!(
            store.get("documents/report.pdf").await.unwrap(),
            Bytes::from_static(b"%PDF")
        );

        assert!(store.delete("documents/report.pdf").await.unwrap());
        assert!(!store.delete("documents/report.pdf").await.unwrap());

        let err = store.get("documents/report.pdf").await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Storage(StorageError::NotFound { .. })
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_keys_cannot_escape_root() {
        assert!(validate_key("documents/a.pdf").is_ok());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("documents/../../x").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn test_presigned_url_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let presigned = store
            .presigned_url("documents/a.pdf", Duration::from_secs(300))
            .unwrap();
        assert!(
            presigned
                .url
                .starts_with("http://localhost:8080/objects/documents/a.pdf?expires=")
        );

        let expires = presigned.expires_at.timestamp();
        let signature = presigned.url.rsplit("signature=").next().unwrap();
        let signer = UrlSigner::new("secret").unwrap();
        let now = Utc::now().timestamp();

        assert!(signer.verify("documents/a.pdf", expires, signature, now).is_ok());
        assert!(store.verify_presigned("documents/a.pdf", expires, signature).is_ok());
        assert!(store.verify_presigned("documents/b.pdf", expires, signature).is_err());
        // Expired
        assert!(
            signer
                .verify("documents/a.pdf", expires, signature, expires + 1)
                .is_err()
        );
        // Tampered key, expiry or signature
        assert!(signer.verify("documents/b.pdf", expires, signature, now).is_err());
        assert!(signer.verify("documents/a.pdf", expires + 60, signature, now).is_err());
        assert!(signer.verify("documents/a.pdf", expires, "00ff", now).is_err());
        assert!(
            UrlSigner::new("other")
                .unwrap()
                .verify("documents/a.pdf", expires, signature, now)
                .is_err()
        );
    }
}
