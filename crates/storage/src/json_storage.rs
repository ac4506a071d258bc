//! JSON file storage implementation.
//!
//! Stores one pretty-printed JSON file per item under `knowledge/` and
//! `rounds/`.

use super::{KnowledgeStore, Result, StorageError};
use evoloop_core::{KnowledgeId, KnowledgeItem, RoundEvent, RunId};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
}

impl JsonStorage {
    /// Create storage, creating the data directories if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("knowledge")).await?;
        fs::create_dir_all(root.join("rounds")).await?;

        Ok(Self { root })
    }

    fn knowledge_path(&self, id: KnowledgeId) -> PathBuf {
        self.root.join("knowledge").join(format!("{}.json", id))
    }

    fn round_path(&self, key: &str) -> PathBuf {
        self.root.join("rounds").join(format!("{}.json", key))
    }

    /// Load a knowledge item, failing if it does not exist.
    pub async fn require_knowledge(&self, id: KnowledgeId) -> Result<KnowledgeItem> {
        self.load_knowledge(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("knowledge {}", id)))
    }
}

#[async_trait::async_trait]
impl KnowledgeStore for JsonStorage {
    async fn save_knowledge(&mut self, item: &KnowledgeItem) -> Result<()> {
        let path = self.knowledge_path(item.id);
        let json = serde_json::to_string_pretty(item)?;
        fs::write(&path, json.as_bytes()).await?;
        debug!(id = %item.id, "Saved knowledge item");
        Ok(())
    }

    async fn load_knowledge(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        read_json(&self.knowledge_path(id)).await
    }

    async fn list_knowledge(&self) -> Result<Vec<KnowledgeItem>> {
        let mut items: Vec<KnowledgeItem> = list_dir(&self.root.join("knowledge")).await?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn save_round(&mut self, event: &RoundEvent) -> Result<()> {
        let key = event.key();
        let json = serde_json::to_string_pretty(event)?;
        fs::write(self.round_path(&key), json.as_bytes()).await?;
        debug!(key = %key, "Saved round event");
        Ok(())
    }

    async fn list_rounds(&self, run_id: Option<RunId>) -> Result<Vec<RoundEvent>> {
        let mut events: Vec<RoundEvent> = list_dir(&self.root.join("rounds")).await?;
        if let Some(run_id) = run_id {
            events.retain(|e| e.run_id == run_id);
        }
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.round.cmp(&b.round)));
        Ok(events)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable {}: {}", entry.path().display(), e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoloop_core::Implementation;

    #[tokio::test]
    async fn test_knowledge_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();

        let item = KnowledgeItem::new(
            "name: mom\ndescription: momentum",
            Some(Implementation::new("df['mom'] = df.close.pct_change(20)")),
            "final decision: accepted",
            true,
            1,
        );
        storage.save_knowledge(&item).await.unwrap();

        let loaded = storage.load_knowledge(item.id).await.unwrap();
        assert_eq!(loaded.as_ref(), Some(&item));
        assert_eq!(storage.list_knowledge().await.unwrap().len(), 1);
        assert_eq!(storage.require_knowledge(item.id).await.unwrap(), item);
    }

    #[tokio::test]
    async fn test_missing_knowledge() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();

        let id = KnowledgeId::new();
        assert!(storage.load_knowledge(id).await.unwrap().is_none());
        assert!(matches!(
            storage.require_knowledge(id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rounds_filtered_by_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();

        let run = RunId::new();
        let other = RunId::new();
        for round in 1..=3 {
            storage.save_round(&RoundEvent::new(run, round)).await.unwrap();
        }
        storage.save_round(&RoundEvent::new(other, 1)).await.unwrap();

        let rounds = storage.list_rounds(Some(run)).await.unwrap();
        assert_eq!(rounds.iter().map(|e| e.round).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(storage.list_rounds(None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = JsonStorage::new(dir.path()).await.unwrap();

        let item = KnowledgeItem::new("name: vol", None, "final decision: rejected", false, 2);
        storage.save_knowledge(&item).await.unwrap();
        std::fs::write(dir.path().join("knowledge/broken.json"), "{ not json").unwrap();

        let items = storage.list_knowledge().await.unwrap();
        assert_eq!(items, vec![item]);
    }
}
