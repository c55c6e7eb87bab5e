//! Progress record for resumable image generation.
//!
//! `generation_progress.json` lists which image slots of a story folder
//! succeeded and which failed (slot 0 is the cover, slot `n` is page `n`).
//! It is read before the image stage and rewritten after every attempt, so
//! a crashed or rate-limited run can be restarted without paying for images
//! that already exist.
//!
//! Writes are serialised by an in-process async mutex. There is no locking
//! across processes; two concurrent runs on one folder race on this file.

use crate::error::StorybookError;
use crate::storage::StoryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// File name of the record inside a story folder.
pub const PROGRESS_FILE: &str = "generation_progress.json";

/// Persisted success/failure sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationProgress {
    #[serde(default)]
    pub succeeded: BTreeSet<usize>,
    #[serde(default)]
    pub failed: BTreeSet<usize>,
    /// Stored image location per succeeded slot.
    #[serde(default)]
    pub locations: BTreeMap<usize, String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl GenerationProgress {
    pub fn is_succeeded(&self, slot: usize) -> bool {
        self.succeeded.contains(&slot)
    }

    pub fn mark_succeeded(&mut self, slot: usize, location: impl Into<String>) {
        self.failed.remove(&slot);
        self.succeeded.insert(slot);
        self.locations.insert(slot, location.into());
        self.updated_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, slot: usize) {
        if !self.succeeded.contains(&slot) {
            self.failed.insert(slot);
        }
        self.updated_at = Some(Utc::now());
    }
}

/// The record for one folder, shared by concurrent image jobs.
pub struct ProgressTracker {
    store: Arc<dyn StoryStore>,
    key: String,
    state: Mutex<GenerationProgress>,
}

impl ProgressTracker {
    /// Read the record for `folder`. Missing or unreadable means empty.
    pub async fn load(store: Arc<dyn StoryStore>, folder: &str) -> Self {
        let key = format!("{folder}/{PROGRESS_FILE}");
        let state = match store.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<GenerationProgress>(&bytes) {
                Ok(p) => {
                    debug!(
                        "resuming {folder}: {} succeeded, {} failed",
                        p.succeeded.len(),
                        p.failed.len()
                    );
                    p
                }
                Err(e) => {
                    warn!("Ignoring unreadable progress record for '{folder}': {e}");
                    GenerationProgress::default()
                }
            },
            Ok(None) => GenerationProgress::default(),
            Err(e) => {
                warn!("Could not read progress record for '{folder}': {e}");
                GenerationProgress::default()
            }
        };
        Self {
            store,
            key,
            state: Mutex::new(state),
        }
    }

    pub async fn snapshot(&self) -> GenerationProgress {
        self.state.lock().await.clone()
    }

    pub async fn record_success(&self, slot: usize, location: &str) -> Result<(), StorybookError> {
        let mut state = self.state.lock().await;
        state.mark_succeeded(slot, location);
        self.persist(&state).await
    }

    pub async fn record_failure(&self, slot: usize) -> Result<(), StorybookError> {
        let mut state = self.state.lock().await;
        state.mark_failed(slot);
        self.persist(&state).await
    }

    // Called with the lock held so writes land in order.
    async fn persist(&self, state: &GenerationProgress) -> Result<(), StorybookError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| StorybookError::Internal(format!("progress serialisation failed: {e}")))?;
        self.store.put(&self.key, json).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    #[test]
    fn success_clears_failure() {
        let mut p = GenerationProgress::default();
        p.mark_failed(3);
        p.mark_succeeded(3, "/stories/a/page3.png");
        assert!(p.is_succeeded(3));
        assert!(p.failed.is_empty());

        p.mark_failed(3);
        assert!(p.failed.is_empty(), "a succeeded slot never becomes failed");
    }

    #[test]
    fn json_shape() {
        let mut p = GenerationProgress::default();
        p.mark_succeeded(0, "cover");
        p.mark_failed(2);
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["succeeded"], serde_json::json!([0]));
        assert_eq!(v["failed"], serde_json::json!([2]));
        assert_eq!(v["locations"]["0"], "cover");
    }

    #[tokio::test]
    async fn tracker_persists_every_update() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn StoryStore> = Arc::new(LocalStore::new(dir.path(), None));

        let tracker = ProgressTracker::load(Arc::clone(&store), "story").await;
        assert_eq!(tracker.snapshot().await, GenerationProgress::default());
        tracker.record_success(1, "p1").await.unwrap();
        tracker.record_failure(2).await.unwrap();

        let reloaded = ProgressTracker::load(store, "story").await.snapshot().await;
        assert!(reloaded.is_succeeded(1));
        assert!(reloaded.failed.contains(&2));
        assert_eq!(reloaded.locations[&1], "p1");
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn StoryStore> = Arc::new(LocalStore::new(dir.path(), None));
        store
            .put("story/generation_progress.json", b"not json".to_vec())
            .await
            .unwrap();
        let tracker = ProgressTracker::load(store, "story").await;
        assert_eq!(tracker.snapshot().await, GenerationProgress::default());
    }
}
