use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MAX_FILENAME_LEN: usize = 100;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key")]
    InvalidKey,

    #[error("invalid download signature")]
    BadSignature,

    #[error("download link expired")]
    Expired,

    #[error("invalid signing key")]
    SigningKey,

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt object metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    content_type: String,
    size: u64,
}

/// An object opened for reading.
pub struct StoredObject {
    pub file: fs::File,
    pub content_type: String,
    pub size: u64,
}

/// Disk-backed object store for message attachments.
///
/// Object bytes live at `{dir}/objects/{key}` and their metadata at
/// `{dir}/meta/{key}.json`. Keys are opaque to callers: `<uuid>` or
/// `<uuid>.<filename>`. Downloads go through time-limited URLs signed with
/// HMAC-SHA256, so the file route itself needs no bearer token.
pub struct ObjectStore {
    objects: PathBuf,
    meta: PathBuf,
    mac: HmacSha256,
    public_url: String,
}

impl ObjectStore {
    pub async fn new(dir: PathBuf, signing_key: &[u8], public_url: &str) -> Result<Self, StorageError> {
        let objects = dir.join("objects");
        let meta = dir.join("meta");
        fs::create_dir_all(&objects).await?;
        fs::create_dir_all(&meta).await?;
        info!("Object storage directory: {}", dir.display());

        let mac = HmacSha256::new_from_slice(signing_key).map_err(|_| StorageError::SigningKey)?;

        Ok(Self {
            objects,
            meta,
            mac,
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Store `bytes` under a fresh key and return the key.
    pub async fn put_object(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: Option<&str>,
    ) -> Result<String, StorageError> {
        let id = Uuid::new_v4();
        let key = match filename.and_then(sanitize_filename) {
            Some(name) => format!("{}.{}", id, name),
            None => id.to_string(),
        };

        let content_type = if content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            content_type.to_string()
        };
        let meta = ObjectMeta {
            content_type,
            size: bytes.len() as u64,
        };

        // Bytes first: an object without metadata is invisible to readers.
        fs::write(self.objects.join(&key), bytes).await?;
        fs::write(self.meta_path(&key), serde_json::to_vec(&meta)?).await?;

        info!("Stored object {} ({} bytes)", key, meta.size);
        Ok(key)
    }

    pub fn presign_download_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.presign_download_url_at(key, ttl, chrono::Utc::now().timestamp())
    }

    /// Build a download URL that stays valid until `now + ttl` (unix seconds).
    pub fn presign_download_url_at(&self, key: &str, ttl: Duration, now: i64) -> Result<String, StorageError> {
        validate_key(key)?;
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = now.saturating_add(ttl);
        let signature = hex::encode(self.signer(key, expires).finalize().into_bytes());
        Ok(format!(
            "{}/files/{}?expires={}&signature={}",
            self.public_url, key, expires, signature
        ))
    }

    /// Check a presigned URL's parameters. The signature is checked before
    /// the expiry so a forged link never reports as merely expired.
    pub fn verify_download(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), StorageError> {
        validate_key(key)?;

        let provided = hex::decode(signature).map_err(|_| StorageError::BadSignature)?;
        self.signer(key, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::BadSignature)?;

        if now >= expires {
            return Err(StorageError::Expired);
        }
        Ok(())
    }

    /// Open a stored object. `None` if the key was never written.
    pub async fn open_object(&self, key: &str) -> Result<Option<StoredObject>, StorageError> {
        validate_key(key)?;

        let raw = match fs::read(self.meta_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let meta: ObjectMeta = serde_json::from_slice(&raw)?;

        let file = match fs::File::open(self.objects.join(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(StoredObject {
            file,
            content_type: meta.content_type,
            size: meta.size,
        }))
    }

    /// Remove an object. Metadata goes first so a half-removed object is
    /// already unreadable. Returns `false` if nothing was stored under `key`.
    pub async fn delete_object(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;

        let had_meta = remove_if_present(&self.meta_path(key)).await?;
        let had_bytes = remove_if_present(&self.objects.join(key)).await?;
        if had_meta || had_bytes {
            info!("Deleted object {}", key);
        }
        Ok(had_meta || had_bytes)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.meta.join(format!("{}.json", key))
    }

    fn signer(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }
}

async fn remove_if_present(path: &std::path::Path) -> Result<bool, StorageError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Keys must be a hyphenated UUID, optionally followed by `.` and a
/// filename made of `[A-Za-z0-9._-]` without `..`. Nothing else ever
/// reaches the filesystem.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let (id, name) = match key.split_once('.') {
        Some((id, name)) => (id, Some(name)),
        None => (key, None),
    };

    if id.len() != 36 || id.parse::<Uuid>().is_err() {
        return Err(StorageError::InvalidKey);
    }

    if let Some(name) = name {
        let allowed = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if name.is_empty() || !allowed || name.contains("..") {
            return Err(StorageError::InvalidKey);
        }
    }

    Ok(())
}

fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let mut name: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    while name.contains("..") {
        name = name.replace("..", ".");
    }

    let name = name.trim_matches('.');
    if name.is_empty() {
        return None;
    }

    Some(name.chars().take(MAX_FILENAME_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const SECRET: &[u8] = b"test-signing-key";

    async fn store(dir: &tempfile::TempDir) -> ObjectStore {
        ObjectStore::new(dir.path().to_path_buf(), SECRET, "http://files.test/")
            .await
            .unwrap()
    }

    fn signature_of(url: &str) -> &str {
        url.split("signature=").nth(1).unwrap()
    }

    #[tokio::test]
    async fn put_then_open_returns_bytes_and_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let key = store
            .put_object(b"hello", "text/plain", Some("notes/Report 1.txt"))
            .await
            .unwrap();
        assert!(key.ends_with(".Report_1.txt"), "key was {}", key);
        validate_key(&key).unwrap();

        let mut obj = store.open_object(&key).await.unwrap().unwrap();
        assert_eq!(obj.content_type, "text/plain");
        assert_eq!(obj.size, 5);

        let mut buf = Vec::new();
        obj.file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn missing_content_type_falls_back_to_octet_stream() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let key = store.put_object(b"\x00\x01", "", None).await.unwrap();
        assert_eq!(key.len(), 36);

        let obj = store.open_object(&key).await.unwrap().unwrap();
        assert_eq!(obj.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn unknown_key_opens_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let key = Uuid::new_v4().to_string();
        assert!(store.open_object(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn presigned_url_verifies_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let key = format!("{}.a.png", Uuid::new_v4());

        let url = store
            .presign_download_url_at(&key, Duration::from_secs(60), 1_000)
            .unwrap();
        assert!(url.starts_with(&format!("http://files.test/files/{}?expires=1060&", key)));

        let sig = signature_of(&url);
        store.verify_download(&key, 1060, sig, 1_059).unwrap();
        assert!(matches!(
            store.verify_download(&key, 1060, sig, 1_060),
            Err(StorageError::Expired)
        ));
    }

    #[tokio::test]
    async fn deleted_object_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let key = store.put_object(b"bye", "text/plain", Some("x.txt")).await.unwrap();
        assert!(store.delete_object(&key).await.unwrap());
        assert!(store.open_object(&key).await.unwrap().is_none());
        assert!(!store.delete_object(&key).await.unwrap());
        assert!(matches!(store.delete_object("../x").await, Err(StorageError::InvalidKey)));
    }

    #[tokio::test]
    async fn huge_ttl_saturates_instead_of_wrapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let key = Uuid::new_v4().to_string();

        let url = store.presign_download_url_at(&key, Duration::MAX, 1_000).unwrap();
        assert!(url.contains(&format!("expires={}&", i64::MAX)), "url was {}", url);
        store
            .verify_download(&key, i64::MAX, signature_of(&url), 1_000)
            .unwrap();
    }

    #[tokio::test]
    async fn tampered_links_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        let key = Uuid::new_v4().to_string();
        let other = Uuid::new_v4().to_string();

        let url = store
            .presign_download_url_at(&key, Duration::from_secs(60), 1_000)
            .unwrap();
        let sig = signature_of(&url);

        // Extended expiry, different key, garbage signature.
        assert!(matches!(
            store.verify_download(&key, 9_999, sig, 1_000),
            Err(StorageError::BadSignature)
        ));
        assert!(matches!(
            store.verify_download(&other, 1060, sig, 1_000),
            Err(StorageError::BadSignature)
        ));
        assert!(matches!(
            store.verify_download(&key, 1060, "zz", 1_000),
            Err(StorageError::BadSignature)
        ));
    }

    #[test]
    fn key_validation_blocks_traversal() {
        let id = Uuid::new_v4();
        assert!(validate_key(&id.to_string()).is_ok());
        assert!(validate_key(&format!("{}.file.txt", id)).is_ok());

        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("not-a-uuid.txt").is_err());
        assert!(validate_key(&id.simple().to_string()).is_err());
        assert!(validate_key(&format!("{}./x", id)).is_err());
        assert!(validate_key(&format!("{}...", id)).is_err());
        assert!(validate_key(&format!("{}.", id)).is_err());
    }

    #[test]
    fn filenames_are_reduced_to_safe_basenames() {
        assert_eq!(sanitize_filename("photo.jpg").as_deref(), Some("photo.jpg"));
        assert_eq!(sanitize_filename("C:\\tmp\\a b.pdf").as_deref(), Some("a_b.pdf"));
        assert_eq!(sanitize_filename("../../x..y").as_deref(), Some("x.y"));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(&"a".repeat(300)).map(|n| n.len()), Some(MAX_FILENAME_LEN));
    }
}
