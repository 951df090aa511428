//! Local media store keyed by entry id and deterministic file name.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use lexi_core::EntryId;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// `{entry_id}/{file_name}` with path separators in the name flattened.
    pub fn media_relative_path(&self, entry_id: EntryId, file_name: &str) -> anyhow::Result<PathBuf> {
        let flattened: String = file_name
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
            .collect();
        let flattened = flattened.trim_start_matches('.').trim();
        if flattened.is_empty() {
            bail!("media file name {file_name:?} is empty after sanitising");
        }
        Ok(PathBuf::from(entry_id.to_string()).join(flattened))
    }

    /// Writes `bytes` under the deterministic name via temp file + rename.
    ///
    /// An existing file with identical content is left untouched and reported as deduplicated;
    /// differing content replaces it.
    pub async fn store_bytes(
        &self,
        entry_id: EntryId,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredFile> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.media_relative_path(entry_id, file_name)?;
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating media directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking media path {}", absolute_path.display()))?
        {
            let existing = fs::read(&absolute_path)
                .await
                .with_context(|| format!("reading existing media {}", absolute_path.display()))?;
            if Self::sha256_hex(&existing) == content_hash {
                return Ok(StoredFile {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                });
            }
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp media file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp media file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp media file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp media {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredFile {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }
}
