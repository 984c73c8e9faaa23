//! Media this peer can serve
//!
//! A broadcaster plays songs from its own library, which is not the pull
//! cache. The application publishes those files here so pull requests from
//! watchers can be answered; anything not published falls back to the cache.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::cache::{CacheError, MediaCache, MediaKind};

#[derive(Debug, Default)]
pub struct LocalLibrary {
    files: HashMap<(MediaKind, String), PathBuf>,
}

impl LocalLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a local file available to peers
    pub fn publish(&mut self, kind: MediaKind, song_id: impl Into<String>, path: impl Into<PathBuf>) {
        self.files.insert((kind, song_id.into()), path.into());
    }

    pub fn get(&self, kind: MediaKind, song_id: &str) -> Option<&PathBuf> {
        self.files.get(&(kind, song_id.to_string()))
    }

    /// Bytes to answer a pull: published file first, then the cache
    pub async fn load(
        &self,
        cache: &dyn MediaCache,
        kind: MediaKind,
        song_id: &str,
    ) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(path) = self.get(kind, song_id) {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    debug!("Serving {} for {} from library ({} bytes)", kind, song_id, bytes.len());
                    return Ok(Some(bytes));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    warn!("Published {} for {} is gone: {}", kind, song_id, path.display());
                }
                Err(source) => {
                    return Err(CacheError::Read {
                        kind,
                        song_id: song_id.to_string(),
                        source,
                    });
                }
            }
        }

        cache.read(kind, song_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FsMediaCache;

    #[tokio::test]
    async fn test_library_before_cache() {
        let root = std::env::temp_dir().join(format!("peersync-library-{}", rand::random::<u64>()));
        let cache = FsMediaCache::new(root.join("cache"));
        cache.write(MediaKind::Audio, "s1", vec![9]).await.unwrap();
        cache.write(MediaKind::Audio, "s2", vec![2]).await.unwrap();

        let library_file = root.join("s1.flac");
        std::fs::write(&library_file, [1, 1, 1]).unwrap();

        let mut library = LocalLibrary::new();
        library.publish(MediaKind::Audio, "s1", &library_file);

        assert_eq!(library.load(&cache, MediaKind::Audio, "s1").await.unwrap(), Some(vec![1, 1, 1]));
        assert_eq!(library.load(&cache, MediaKind::Audio, "s2").await.unwrap(), Some(vec![2]));
        assert_eq!(library.load(&cache, MediaKind::Cover, "s1").await.unwrap(), None);

        // A vanished library file falls back to the cache
        std::fs::remove_file(&library_file).unwrap();
        assert_eq!(library.load(&cache, MediaKind::Audio, "s1").await.unwrap(), Some(vec![9]));

        let _ = std::fs::remove_dir_all(&root);
    }
}
