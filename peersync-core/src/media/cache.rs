//! Local media cache
//!
//! Where pulled audio and cover bytes land on a watcher.

use std::fmt;
use std::io;
use std::path::PathBuf;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Kind of media a peer can pull
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Cover,
}

impl MediaKind {
    fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Cover => "covers",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Cover => write!(f, "cover"),
        }
    }
}

/// Cache failures
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to read {kind} for {song_id}: {source}")]
    Read {
        kind: MediaKind,
        song_id: String,
        source: io::Error,
    },

    #[error("Failed to write {kind} for {song_id}: {source}")]
    Write {
        kind: MediaKind,
        song_id: String,
        source: io::Error,
    },
}

/// Local Cache Probe contract
pub trait MediaCache: Send + Sync {
    /// Path of the cached media, if present
    fn exists<'a>(&'a self, kind: MediaKind, song_id: &'a str) -> BoxFuture<'a, Option<PathBuf>>;

    /// Cached bytes, or `None` on a miss
    fn read<'a>(
        &'a self,
        kind: MediaKind,
        song_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>>;

    /// Store bytes and return where they landed
    fn write<'a>(
        &'a self,
        kind: MediaKind,
        song_id: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<PathBuf, CacheError>>;
}

/// Filesystem cache rooted at a directory
///
/// Layout: `<root>/audio/<id>` and `<root>/covers/<id>`.
#[derive(Debug, Clone)]
pub struct FsMediaCache {
    root: PathBuf,
}

impl FsMediaCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Song ids come from remote peers, so only a safe subset becomes a file name
    fn path_for(&self, kind: MediaKind, song_id: &str) -> PathBuf {
        let file_name: String = song_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(kind.dir_name()).join(file_name)
    }
}

impl MediaCache for FsMediaCache {
    fn exists<'a>(&'a self, kind: MediaKind, song_id: &'a str) -> BoxFuture<'a, Option<PathBuf>> {
        async move {
            let path = self.path_for(kind, song_id);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => Some(path),
                _ => None,
            }
        }
        .boxed()
    }

    fn read<'a>(
        &'a self,
        kind: MediaKind,
        song_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CacheError>> {
        async move {
            match tokio::fs::read(self.path_for(kind, song_id)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(source) => Err(CacheError::Read {
                    kind,
                    song_id: song_id.to_string(),
                    source,
                }),
            }
        }
        .boxed()
    }

    fn write<'a>(
        &'a self,
        kind: MediaKind,
        song_id: &'a str,
        bytes: Vec<u8>,
    ) -> BoxFuture<'a, Result<PathBuf, CacheError>> {
        async move {
            let path = self.path_for(kind, song_id);
            let write_err = |source| CacheError::Write {
                kind,
                song_id: song_id.to_string(),
                source,
            };

            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await.map_err(write_err)?;
            }
            tokio::fs::write(&path, &bytes).await.map_err(write_err)?;

            debug!("Cached {} bytes of {} for {} at {}", bytes.len(), kind, song_id, path.display());
            Ok(path)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("peersync-cache-{}", rand::random::<u64>()))
    }

    #[tokio::test]
    async fn test_write_then_exists_and_read() {
        let root = temp_root();
        let cache = FsMediaCache::new(&root);

        assert!(cache.exists(MediaKind::Audio, "s1").await.is_none());
        assert!(cache.read(MediaKind::Audio, "s1").await.unwrap().is_none());

        let path = cache.write(MediaKind::Audio, "s1", vec![1, 2, 3]).await.unwrap();
        assert_eq!(path, root.join("audio").join("s1"));
        assert_eq!(cache.exists(MediaKind::Audio, "s1").await, Some(path));
        assert_eq!(cache.read(MediaKind::Audio, "s1").await.unwrap(), Some(vec![1, 2, 3]));

        // Covers live in their own directory
        assert!(cache.exists(MediaKind::Cover, "s1").await.is_none());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_song_ids_cannot_escape_root() {
        let cache = FsMediaCache::new("/cache");
        let path = cache.path_for(MediaKind::Cover, "../../etc/passwd");
        assert_eq!(path, PathBuf::from("/cache/covers/______etc_passwd"));
    }
}
