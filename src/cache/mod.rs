use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Origin of a transcript, used to namespace cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Youtube,
    Podcast,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Youtube => "youtube",
            SourceType::Podcast => "podcast",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the cache key for a (source type, source identifier) pair.
///
/// The key is a SHA-256 hex digest over `"{type}:{source}"`, so the same pair
/// always maps to the same key and the same identifier under a different
/// source type never does. The result is filesystem-safe (lowercase hex).
pub fn derive_key(source_type: SourceType, source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Metadata persisted alongside a transcript.
///
/// The known fields are what the cache listing surfaces; callers can attach
/// arbitrary extra fields (format flags, save path) through `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub source_type: String,

    /// Original identifier: video ID or audio URL.
    pub source: String,

    pub title: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CacheMetadata {
    pub fn new(
        source_type: SourceType,
        source: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source_type: source_type.as_str().to_string(),
            source: source.into(),
            title: title.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Attach a caller-supplied extra field.
    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// A cached transcript record, one JSON file per key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub transcript: String,
    pub metadata: CacheMetadata,
    pub cached_at: DateTime<Utc>,
    pub cache_key: String,
}

/// Listing view of a cache entry, without the transcript body.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub cache_key: String,
    pub cached_at: DateTime<Utc>,
    pub source_type: String,
    pub title: String,
    pub source: String,
}

/// File-based transcript cache rooted at an explicit directory.
///
/// Entries are immutable once written; re-storing a key overwrites the record
/// wholesale. Concurrent writers to the same key race with last-write-wins
/// semantics; there is no locking and no eviction.
#[derive(Debug, Clone)]
pub struct TranscriptCache {
    root: PathBuf,
}

impl TranscriptCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key))
    }

    /// Look up a cached transcript by key.
    ///
    /// A missing record, an unreadable record, and a record that fails to
    /// parse all count as a miss, so callers fall through to re-fetching.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);

        if !path.exists() {
            return None;
        }

        let content = match fs_err::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::debug!("cache read failed for {}: {}", path.display(), err);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!("cache entry malformed at {}: {}", path.display(), err);
                None
            }
        }
    }

    /// Persist a transcript under the given key, overwriting any existing
    /// record. Creates the cache root if absent. Write failures propagate.
    pub fn store(&self, key: &str, transcript: &str, metadata: CacheMetadata) -> Result<()> {
        fs_err::create_dir_all(&self.root)
            .context("Failed to create cache directory")?;

        let entry = CacheEntry {
            transcript: transcript.to_string(),
            metadata,
            cached_at: Utc::now(),
            cache_key: key.to_string(),
        };

        let content = serde_json::to_string_pretty(&entry)
            .context("Failed to serialize cache entry")?;

        fs_err::write(self.entry_path(key), content)
            .context("Failed to write cache entry")?;

        Ok(())
    }

    /// List cached transcripts, most recently modified first, up to `limit`.
    ///
    /// Ordering follows file modification time rather than the `cached_at`
    /// field, since an external rewrite changes the former but not the
    /// latter. Entries that fail to parse are skipped.
    pub fn list(&self, limit: usize) -> Vec<CacheSummary> {
        let entries = match fs_err::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "json").unwrap_or(false))
            .filter_map(|path| {
                let modified = path.metadata().ok()?.modified().ok()?;
                Some((path, modified))
            })
            .collect();

        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.truncate(limit);

        files
            .into_iter()
            .filter_map(|(path, _)| {
                let content = fs_err::read_to_string(&path).ok()?;
                let entry: CacheEntry = serde_json::from_str(&content).ok()?;
                Some(CacheSummary {
                    cache_key: entry.cache_key,
                    cached_at: entry.cached_at,
                    source_type: entry.metadata.source_type,
                    title: entry.metadata.title,
                    source: entry.metadata.source,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_cache() -> (TempDir, TranscriptCache) {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let cache = TranscriptCache::new(dir.path());
        (dir, cache)
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let key1 = derive_key(SourceType::Youtube, "dQw4w9WgXcQ");
        let key2 = derive_key(SourceType::Youtube, "dQw4w9WgXcQ");
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_derive_key_is_hex_sha256() {
        let key = derive_key(SourceType::Podcast, "https://audio.example.com/ep.mp3");
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_derive_key_differs_by_source() {
        let key1 = derive_key(SourceType::Youtube, "aaaaaaaaaaa");
        let key2 = derive_key(SourceType::Youtube, "bbbbbbbbbbb");
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_derive_key_namespaced_by_source_type() {
        let key1 = derive_key(SourceType::Youtube, "abc12345678");
        let key2 = derive_key(SourceType::Podcast, "abc12345678");
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_lookup_on_empty_cache_is_miss() {
        let (_dir, cache) = make_cache();
        let key = derive_key(SourceType::Youtube, "never_written");
        assert!(cache.lookup(&key).is_none());
    }

    #[test]
    fn test_store_and_lookup_roundtrip() {
        let (_dir, cache) = make_cache();
        let key = derive_key(SourceType::Youtube, "dQw4w9WgXcQ");
        let metadata = CacheMetadata::new(SourceType::Youtube, "dQw4w9WgXcQ", "X")
            .with_extra("format", "markdown");

        cache.store(&key, "hello world", metadata).expect("store failed");

        let entry = cache.lookup(&key).expect("expected cache hit");
        assert_eq!(entry.transcript, "hello world");
        assert_eq!(entry.metadata.title, "X");
        assert_eq!(entry.metadata.source_type, "youtube");
        assert_eq!(entry.metadata.extra.get("format").and_then(|v| v.as_str()), Some("markdown"));
        assert_eq!(entry.cache_key, key);
    }

    #[test]
    fn test_store_creates_missing_root() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let nested = dir.path().join("a").join("b");
        let cache = TranscriptCache::new(&nested);

        let key = derive_key(SourceType::Podcast, "https://example.com/ep.mp3");
        let metadata = CacheMetadata::new(SourceType::Podcast, "https://example.com/ep.mp3", "Ep");
        cache.store(&key, "text", metadata).expect("store failed");

        assert!(nested.exists());
        assert!(cache.lookup(&key).is_some());
    }

    #[test]
    fn test_corrupt_entry_is_miss() {
        let (_dir, cache) = make_cache();
        let key = derive_key(SourceType::Youtube, "corrupted11");

        fs_err::create_dir_all(cache.root()).unwrap();
        fs_err::write(cache.root().join(format!("{}.json", key)), "{not json").unwrap();

        assert!(cache.lookup(&key).is_none());
    }

    #[test]
    fn test_overwrite_leaves_latest_transcript() {
        let (_dir, cache) = make_cache();
        let key = derive_key(SourceType::Youtube, "dQw4w9WgXcQ");

        let metadata = CacheMetadata::new(SourceType::Youtube, "dQw4w9WgXcQ", "first");
        cache.store(&key, "first transcript", metadata).unwrap();

        let metadata = CacheMetadata::new(SourceType::Youtube, "dQw4w9WgXcQ", "second");
        cache.store(&key, "second transcript", metadata).unwrap();

        let entry = cache.lookup(&key).expect("expected cache hit");
        assert_eq!(entry.transcript, "second transcript");
        assert_eq!(entry.metadata.title, "second");
    }

    #[test]
    fn test_list_orders_newest_first_and_caps() {
        let (_dir, cache) = make_cache();

        let key1 = derive_key(SourceType::Youtube, "older_video");
        cache
            .store(&key1, "old", CacheMetadata::new(SourceType::Youtube, "older_video", "Old"))
            .unwrap();

        // File mtimes need to actually differ for the ordering to be observable
        std::thread::sleep(std::time::Duration::from_millis(100));

        let key2 = derive_key(SourceType::Podcast, "https://example.com/new.mp3");
        cache
            .store(
                &key2,
                "new",
                CacheMetadata::new(SourceType::Podcast, "https://example.com/new.mp3", "New"),
            )
            .unwrap();

        let listed = cache.list(1);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cache_key, key2);
        assert_eq!(listed[0].title, "New");

        let listed = cache.list(10);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].cache_key, key2);
        assert_eq!(listed[1].cache_key, key1);
    }

    #[test]
    fn test_list_skips_unparsable_entries() {
        let (_dir, cache) = make_cache();

        let key = derive_key(SourceType::Youtube, "good_video_");
        cache
            .store(&key, "ok", CacheMetadata::new(SourceType::Youtube, "good_video_", "Good"))
            .unwrap();
        fs_err::write(cache.root().join("deadbeef.json"), "not json at all").unwrap();

        let listed = cache.list(10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].cache_key, key);
    }

    #[test]
    fn test_list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let cache = TranscriptCache::new(dir.path().join("never_created"));
        assert!(cache.list(10).is_empty());
    }
}
