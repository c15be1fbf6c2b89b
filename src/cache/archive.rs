use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::AlbumId;

/// Read-through disk cache for album zip archives.
///
/// Archives are fetched into a staging file first and only promoted with an
/// atomic rename, so a crashed or aborted download never leaves a truncated
/// archive where a hit would find it.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    dir: PathBuf,
}

impl ArchiveCache {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create archive cache directory {:?}", dir))?;
        Ok(Self { dir })
    }

    fn file_name(album: &AlbumId) -> String {
        let safe = album
            .as_str()
            .replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        format!("album-{}.zip", safe)
    }

    fn final_path(&self, album: &AlbumId) -> PathBuf {
        self.dir.join(Self::file_name(album))
    }

    /// Path a download should be staged into before [`ArchiveCache::commit`].
    /// Unique per call, so concurrent downloads of the same album never
    /// write into each other's staging file.
    pub fn staging_path(&self, album: &AlbumId) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.part",
            Self::file_name(album),
            Uuid::new_v4().simple()
        ))
    }

    /// Path of the cached archive, if a non-empty one exists on disk.
    pub async fn cached_path(&self, album: &AlbumId) -> Option<PathBuf> {
        let path = self.final_path(album);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                debug!("archive cache hit for album {}", album);
                Some(path)
            }
            _ => None,
        }
    }

    /// Promote a staged download to its final name.
    pub async fn commit(&self, album: &AlbumId, staged: &Path) -> Result<PathBuf> {
        let path = self.final_path(album);
        tokio::fs::rename(staged, &path)
            .await
            .with_context(|| format!("failed to promote staged archive {:?}", staged))?;
        info!("cached archive for album {} at {:?}", album, path);
        Ok(path)
    }

    /// Drop a cached archive. Returns whether one existed.
    pub async fn evict(&self, album: &AlbumId) -> Result<bool> {
        let path = self.final_path(album);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                Err(e).with_context(|| format!("failed to evict cached archive {:?}", path))
            }
        }
    }
}
