//! File-based conversation cache.
//!
//! Each conversation is one JSON file under `cache_dir`:
//! ```text
//! {cache_dir}/
//!   {conversation_id}.json
//! ```
//! Saves go through a temp file and an atomic rename so a crash mid-write
//! never corrupts an existing record.

use std::path::PathBuf;

use tokio::fs;

use crate::store::error::{StorageError, StorageResult};
use crate::store::ConversationRecord;

/// Local cache of conversation records, one JSON file per conversation.
#[derive(Debug, Clone)]
pub struct FileConversationCache {
    cache_dir: PathBuf,
}

impl FileConversationCache {
    /// Create a new cache rooted at `cache_dir`.
    ///
    /// The directory is created on first save.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{id}.json"))
    }

    /// Persist a record, creating the cache directory if needed.
    pub async fn save(&self, record: &ConversationRecord) -> StorageResult<()> {
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| StorageError::file_io(&self.cache_dir, e))?;

        let final_path = self.record_path(&record.id);
        let temp_path = self.cache_dir.join(format!("{}.json.tmp", record.id));

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| StorageError::file_io(&final_path, e))?;

        Ok(())
    }

    /// Load one record, or `None` if it was never cached.
    pub async fn load(&self, id: &str) -> StorageResult<Option<ConversationRecord>> {
        let path = self.record_path(id);

        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };

        let record = serde_json::from_str(&contents)
            .map_err(|e| StorageError::file_deserialization(&path, e.to_string()))?;

        Ok(Some(record))
    }

    /// List all cached records, newest first.
    ///
    /// Malformed files are skipped rather than failing the whole listing.
    pub async fn list(&self) -> StorageResult<Vec<ConversationRecord>> {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&self.cache_dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::file_io(&self.cache_dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }

            let contents = match fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            let Ok(record) = serde_json::from_str::<ConversationRecord>(&contents) else {
                tracing::warn!(path = %path.display(), "skipping malformed conversation record");
                continue;
            };
            records.push(record);
        }

        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    /// Records with turns not yet acknowledged by the server.
    pub async fn list_pending(&self) -> StorageResult<Vec<ConversationRecord>> {
        let mut records = self.list().await?;
        records.retain(|r| r.pending());
        Ok(records)
    }

    /// Delete one record. Deleting a record that does not exist is a no-op.
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.record_path(id);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::file_io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Role, Turn};
    use tempfile::TempDir;

    fn create_cache(temp_dir: &TempDir) -> FileConversationCache {
        FileConversationCache::new(temp_dir.path().join("conversations"))
    }

    fn sample_record(id: &str, prompt: &str) -> ConversationRecord {
        let mut record = ConversationRecord::new(id);
        record.push_turn(Turn::new(Role::User, prompt));
        record.push_turn(Turn::new(Role::Assistant, "An answer."));
        record
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        let record = sample_record("conv1", "What is gravity?");
        cache.save(&record).await.unwrap();

        let loaded = cache.load("conv1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "conv1");
        assert_eq!(loaded.title.as_deref(), Some("What is gravity?"));
        assert_eq!(loaded.turns, record.turns);
        assert_eq!(loaded.synced_turns, 0);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        assert!(cache.load("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_sorted_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        let mut older = sample_record("older", "first question");
        older.updated_at = chrono::Utc::now() - chrono::Duration::hours(1);
        cache.save(&older).await.unwrap();
        cache.save(&sample_record("newer", "second question")).await.unwrap();

        let records = cache.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "newer");
        assert_eq!(records[1].id, "older");
    }

    #[tokio::test]
    async fn list_skips_malformed_files() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        cache.save(&sample_record("good", "hello")).await.unwrap();
        tokio::fs::write(
            temp_dir.path().join("conversations").join("bad.json"),
            b"{not json",
        )
        .await
        .unwrap();

        let records = cache.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "good");
    }

    #[tokio::test]
    async fn list_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        assert!(cache.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_listing_filters_synced() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        let mut synced = sample_record("synced", "a");
        synced.mark_synced();
        cache.save(&synced).await.unwrap();
        cache.save(&sample_record("unsynced", "b")).await.unwrap();

        let pending = cache.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "unsynced");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let cache = create_cache(&temp_dir);

        cache.save(&sample_record("conv1", "hello")).await.unwrap();
        cache.delete("conv1").await.unwrap();
        assert!(cache.load("conv1").await.unwrap().is_none());

        cache.delete("conv1").await.unwrap();
    }
}
