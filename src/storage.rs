//! Story persistence.
//!
//! Every story lives in one folder named after its title:
//!
//! ```text
//! stories/
//! └── ana_y_la_verdad/
//!     ├── story.json
//!     ├── cover.png
//!     ├── page1.png … pageN.png
//!     ├── character_profile.png      (optional)
//!     ├── generation_progress.json
//!     └── Ana y la verdad.pdf        (when rendered)
//! ```
//!
//! The pipeline only sees the [`StoryStore`] trait. [`LocalStore`] is the
//! filesystem implementation; an object-store backend would implement the
//! same four calls.

use crate::error::StorybookError;
use crate::story::StoryDocument;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the story document inside a folder.
pub const STORY_FILE: &str = "story.json";

/// Maximum length of a derived folder name.
const MAX_FOLDER_LEN: usize = 60;

/// Key-value access to story files. Keys are `folder/file` paths.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any previous value. Returns the
    /// public location of the stored object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorybookError>;

    /// Read `key`; `Ok(None)` when it does not exist.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorybookError>;

    /// Names of all top-level folders, sorted.
    async fn list_folders(&self) -> Result<Vec<String>, StorybookError>;

    /// Public location of `key` (a URL path or a filesystem path).
    fn location(&self, key: &str) -> String;

    /// Map a location produced by [`StoryStore::location`] back to its key.
    fn key_for_location(&self, location: &str) -> Option<String>;
}

/// Filesystem store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl LocalStore {
    /// `public_base` is the URL prefix under which `root` is served
    /// (e.g. `/stories`). Without one, locations are filesystem paths.
    pub fn new(root: impl Into<PathBuf>, public_base: Option<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.map(|b| b.trim_end_matches('/').to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorybookError> {
        if key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            return Err(StorybookError::Storage {
                key: key.to_string(),
                detail: "invalid key".into(),
            });
        }
        Ok(self.root.join(key))
    }
}

fn storage_err(key: &str, e: impl std::fmt::Display) -> StorybookError {
    StorybookError::Storage {
        key: key.to_string(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl StoryStore for LocalStore {
    /// Atomic write: write to a sibling temp file, then rename.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, StorybookError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err(key, e))?;
        }

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| storage_err(key, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| storage_err(key, e))?;

        debug!("stored {} ({} bytes)", key, bytes.len());
        Ok(self.location(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorybookError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(key, e)),
        }
    }

    async fn list_folders(&self) -> Result<Vec<String>, StorybookError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&self.root.display().to_string(), e)),
        };

        let mut folders = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_err(&self.root.display().to_string(), e))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if let Some(name) = entry.file_name().to_str() {
                    folders.push(name.to_string());
                }
            }
        }
        folders.sort();
        Ok(folders)
    }

    fn location(&self, key: &str) -> String {
        match self.public_base {
            Some(ref base) => format!("{base}/{key}"),
            None => self.root.join(key).display().to_string(),
        }
    }

    fn key_for_location(&self, location: &str) -> Option<String> {
        let rest = match self.public_base {
            Some(ref base) => location.strip_prefix(base.as_str())?,
            None => location.strip_prefix(self.root.to_str()?)?,
        };
        let key = rest.trim_start_matches(['/', '\\']);
        (!key.is_empty()).then(|| key.to_string())
    }
}

// ── Folder names ────────────────────────────────────────────────────────────

/// Derive a folder name from a story title.
///
/// Lowercase; every run of characters other than ASCII letters and digits
/// becomes one `_`; leading and trailing `_` removed; capped at 60
/// characters. An empty result becomes `untitled`.
pub fn story_folder_name(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let mut name = out.trim_matches('_').to_string();
    if name.len() > MAX_FOLDER_LEN {
        name.truncate(MAX_FOLDER_LEN);
        name = name.trim_end_matches('_').to_string();
    }
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

/// `base`, or `base_{timestamp}` when a story already occupies `base`.
pub fn resolve_collision(base: &str, taken: bool, now: DateTime<Utc>) -> String {
    if taken {
        format!("{base}_{}", now.format("%Y%m%d%H%M%S"))
    } else {
        base.to_string()
    }
}

/// True when `folder` already holds a story document.
pub async fn folder_has_story(store: &dyn StoryStore, folder: &str) -> Result<bool, StorybookError> {
    Ok(store.get(&story_key(folder)).await?.is_some())
}

pub fn story_key(folder: &str) -> String {
    format!("{folder}/{STORY_FILE}")
}

// ── Documents ───────────────────────────────────────────────────────────────

/// Write `story.json` for `folder`. Returns its location.
pub async fn write_story(
    store: &dyn StoryStore,
    folder: &str,
    document: &StoryDocument,
) -> Result<String, StorybookError> {
    let json = serde_json::to_vec_pretty(document)
        .map_err(|e| StorybookError::Internal(format!("story serialisation failed: {e}")))?;
    store.put(&story_key(folder), json).await
}

/// Read `story.json` for `folder`.
pub async fn read_story(
    store: &dyn StoryStore,
    folder: &str,
) -> Result<StoryDocument, StorybookError> {
    let key = story_key(folder);
    let bytes = store
        .get(&key)
        .await?
        .ok_or_else(|| StorybookError::StoryNotFound {
            folder: folder.to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|e| storage_err(&key, format!("corrupt story: {e}")))
}

/// One entry of the story listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySummary {
    pub id: String,
    pub title: String,
    pub child_name: String,
    pub theme: String,
    pub style: String,
    pub language: String,
    pub page_count: usize,
    pub cover_image: String,
    pub generated_at: DateTime<Utc>,
}

/// Summaries of every readable story, newest first.
///
/// Folders without a readable `story.json` are skipped.
pub async fn list_stories(store: &dyn StoryStore) -> Result<Vec<StorySummary>, StorybookError> {
    let mut out = Vec::new();
    for folder in store.list_folders().await? {
        match read_story(store, &folder).await {
            Ok(doc) => out.push(StorySummary {
                id: folder,
                title: doc.title,
                child_name: doc.metadata.child_name,
                theme: doc.metadata.theme.to_string(),
                style: doc.metadata.style.to_string(),
                language: doc.metadata.language.to_string(),
                page_count: doc.pages.len(),
                cover_image: doc.cover_image,
                generated_at: doc.metadata.generated_at,
            }),
            Err(StorybookError::StoryNotFound { .. }) => {}
            Err(e) => warn!("Skipping folder '{folder}': {e}"),
        }
    }
    out.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
    Ok(out)
}
