use async_trait::async_trait;
use dashmap::DashMap;
use roadwatch_core::error::MediaUploadError;
use roadwatch_core::store::MediaStore;
use roadwatch_core::types::MediaBlob;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, info};

const REF_PREFIX: &str = "sha256-";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub content_type: String,
}

/// Content-addressed photo storage on the local disk. The same bytes always
/// map to the same reference, so a retried upload is a no-op.
pub struct DiskMediaStore {
    root: PathBuf,
    max_bytes: usize,
    index: DashMap<String, StoredMedia>,
}

impl DiskMediaStore {
    pub fn new(root: PathBuf, max_bytes: usize) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&root)?;
        info!("Media store at {:?}, photos up to {} bytes", root, max_bytes);
        Ok(Self {
            root,
            max_bytes,
            index: DashMap::new(),
        })
    }

    /// `sha256-` followed by 64 lowercase hex digits. Anything else could
    /// escape the media directory and is refused.
    pub fn is_valid_ref(reference: &str) -> bool {
        reference
            .strip_prefix(REF_PREFIX)
            .map_or(false, |hex| {
                hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            })
    }

    fn path_for(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }

    /// Read a stored photo back. Unknown references answer `None`.
    pub async fn fetch(&self, reference: &str) -> std::io::Result<Option<(StoredMedia, Vec<u8>)>> {
        if !Self::is_valid_ref(reference) {
            return Ok(None);
        }
        let bytes = match tokio::fs::read(self.path_for(reference)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        // files written before a restart have no recorded content type
        let meta = self
            .index
            .get(reference)
            .map(|m| m.clone())
            .unwrap_or_else(|| StoredMedia {
                content_type: FALLBACK_CONTENT_TYPE.to_string(),
            });
        Ok(Some((meta, bytes)))
    }
}

fn reference_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", REF_PREFIX, hex)
}

fn map_io(e: std::io::Error) -> MediaUploadError {
    match e.kind() {
        ErrorKind::PermissionDenied => MediaUploadError::PermissionDenied(e.to_string()),
        _ => MediaUploadError::Transport(e.to_string()),
    }
}

#[async_trait]
impl MediaStore for DiskMediaStore {
    async fn upload(&self, blob: &MediaBlob) -> Result<String, MediaUploadError> {
        if blob.bytes.len() > self.max_bytes {
            return Err(MediaUploadError::TooLarge {
                size: blob.bytes.len(),
                limit: self.max_bytes,
            });
        }

        let reference = reference_for(&blob.bytes);
        let path = self.path_for(&reference);
        if tokio::fs::try_exists(&path).await.map_err(map_io)? {
            debug!("Photo {} already stored", reference);
        } else {
            // write to a temp name first so a reader never sees half a file
            let tmp = path.with_extension("part");
            tokio::fs::write(&tmp, &blob.bytes).await.map_err(map_io)?;
            tokio::fs::rename(&tmp, &path).await.map_err(map_io)?;
            debug!("Stored photo {} ({} bytes)", reference, blob.bytes.len());
        }

        self.index.insert(
            reference.clone(),
            StoredMedia {
                content_type: blob.content_type.clone(),
            },
        );
        Ok(reference)
    }
}
