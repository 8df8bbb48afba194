use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use shared::domain::ConversationKey;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const PREVIEW_MAX_AGE_DAYS: i64 = 7;

fn max_age() -> Duration {
    Duration::days(PREVIEW_MAX_AGE_DAYS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedValue {
    value: String,
    stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheMaps {
    #[serde(default)]
    previews: HashMap<String, CachedValue>,
    #[serde(default)]
    avatars: HashMap<String, CachedValue>,
}

pub struct PreviewCache {
    path: Option<PathBuf>,
    inner: Mutex<CacheMaps>,
}

impl PreviewCache {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(CacheMaps::default()),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let maps = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<CacheMaps>(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), error = %err, "cache: discarding unreadable cache file");
                CacheMaps::default()
            }),
            Err(_) => CacheMaps::default(),
        };
        Self {
            path: Some(path),
            inner: Mutex::new(maps),
        }
    }

    pub async fn preview(&self, key: &ConversationKey) -> Option<String> {
        let guard = self.inner.lock().await;
        fresh(&guard.previews, key, Utc::now())
    }

    pub async fn put_preview(&self, key: &ConversationKey, preview: &str) {
        self.put_preview_at(key, preview, Utc::now()).await;
    }

    pub async fn put_preview_at(&self, key: &ConversationKey, preview: &str, now: DateTime<Utc>) {
        let mut guard = self.inner.lock().await;
        guard.previews.insert(
            key.as_str().to_string(),
            CachedValue {
                value: preview.to_string(),
                stored_at: now,
            },
        );
    }

    pub async fn avatar(&self, key: &ConversationKey) -> Option<String> {
        let guard = self.inner.lock().await;
        fresh(&guard.avatars, key, Utc::now())
    }

    pub async fn put_avatar(&self, key: &ConversationKey, url: &str) {
        self.put_avatar_at(key, url, Utc::now()).await;
    }

    pub async fn put_avatar_at(&self, key: &ConversationKey, url: &str, now: DateTime<Utc>) {
        let mut guard = self.inner.lock().await;
        guard.avatars.insert(
            key.as_str().to_string(),
            CachedValue {
                value: url.to_string(),
                stored_at: now,
            },
        );
    }

    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut guard = self.inner.lock().await;
        let before = guard.previews.len() + guard.avatars.len();
        guard
            .previews
            .retain(|_, entry| now - entry.stored_at <= max_age());
        guard
            .avatars
            .retain(|_, entry| now - entry.stored_at <= max_age());
        let removed = before - (guard.previews.len() + guard.avatars.len());
        if removed > 0 {
            debug!(removed, "cache: evicted expired entries");
        }
        removed
    }

    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw = {
            let guard = self.inner.lock().await;
            serde_json::to_string(&*guard)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache dir '{}'", parent.display()))?;
        }
        fs::write(path, raw)
            .with_context(|| format!("failed to write preview cache '{}'", path.display()))?;
        Ok(())
    }
}

fn fresh(
    map: &HashMap<String, CachedValue>,
    key: &ConversationKey,
    now: DateTime<Utc>,
) -> Option<String> {
    map.get(key.as_str())
        .filter(|entry| now - entry.stored_at <= max_age())
        .map(|entry| entry.value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::from_address("5511999990000").expect("key")
    }

    #[tokio::test]
    async fn previews_and_avatars_are_independent() {
        let cache = PreviewCache::in_memory();
        cache.put_preview(&key(), "Hi").await;

        assert_eq!(cache.preview(&key()).await.as_deref(), Some("Hi"));
        assert!(cache.avatar(&key()).await.is_none());
    }

    #[tokio::test]
    async fn entries_older_than_seven_days_are_evicted() {
        let cache = PreviewCache::in_memory();
        let now = Utc::now();
        cache
            .put_preview_at(&key(), "stale", now - Duration::days(8))
            .await;
        cache
            .put_avatar_at(&key(), "https://pps.example/a.jpg", now - Duration::days(2))
            .await;

        assert!(cache.preview(&key()).await.is_none());
        assert_eq!(cache.evict_expired(now).await, 1);
        assert!(cache.avatar(&key()).await.is_some());
    }

    #[tokio::test]
    async fn persisted_cache_reloads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache").join("previews.json");

        let cache = PreviewCache::load(&path);
        cache.put_preview(&key(), "Hi").await;
        cache.persist().await.expect("persist");

        let reloaded = PreviewCache::load(&path);
        assert_eq!(reloaded.preview(&key()).await.as_deref(), Some("Hi"));
    }

    #[tokio::test]
    async fn corrupt_cache_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("previews.json");
        fs::write(&path, "{not json").expect("write");

        let cache = PreviewCache::load(&path);
        assert!(cache.preview(&key()).await.is_none());
    }
}
