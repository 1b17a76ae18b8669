use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;

use crate::model::Settings;

pub const DATA_KEY: &str = "misub_data_v1";
pub const SETTINGS_KEY: &str = "worker_settings_v1";

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("invalid store key: {0:?}")]
  InvalidKey(String),
  #[error("store io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store json error: {0}")]
  Json(#[from] serde_json::Error),
}

/// Key-value persistence. `put` replaces the whole value; concurrent writers
/// to one key race and the last write wins.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;
  async fn put(&self, key: &str, value: JsonValue) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: RwLock<HashMap<String, JsonValue>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl KvStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
    Ok(self.entries.read().await.get(key).cloned())
  }

  async fn put(&self, key: &str, value: JsonValue) -> Result<(), StoreError> {
    self.entries.write().await.insert(key.to_string(), value);
    Ok(())
  }
}

/// One `<key>.json` file per key. Writes land in a temp file that is synced
/// to disk and then renamed over the target.
#[derive(Debug)]
pub struct FileStore {
  dir: PathBuf,
  seq: AtomicU64,
}

impl FileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      seq: AtomicU64::new(0),
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
    let valid = !key.is_empty()
      && key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if !valid {
      return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(self.dir.join(format!("{key}.json")))
  }
}

#[async_trait]
impl KvStore for FileStore {
  async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
    let path = self.path_for(key)?;
    match tokio::fs::read(&path).await {
      Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  async fn put(&self, key: &str, value: JsonValue) -> Result<(), StoreError> {
    let path = self.path_for(key)?;
    tokio::fs::create_dir_all(&self.dir).await?;
    let seq = self.seq.fetch_add(1, Ordering::Relaxed);
    let tmp = self
      .dir
      .join(format!("{key}.json.{}.{seq}.tmp", std::process::id()));
    let bytes = serde_json::to_vec_pretty(&value)?;
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    if let Err(err) = tokio::fs::rename(&tmp, &path).await {
      let _ = tokio::fs::remove_file(&tmp).await;
      return Err(err.into());
    }
    Ok(())
  }
}

/// Reads the settings document, merged key by key over the defaults. A key
/// whose value has the wrong shape is logged and keeps its default; the other
/// keys are unaffected.
pub async fn load_settings(store: &dyn KvStore) -> Result<Settings, StoreError> {
  let Some(stored) = store.get(SETTINGS_KEY).await? else {
    return Ok(Settings::default());
  };
  Ok(merge_settings(stored)?)
}

fn merge_settings(stored: JsonValue) -> Result<Settings, serde_json::Error> {
  let JsonValue::Object(stored) = stored else {
    warn!("stored settings are not an object, using defaults");
    return Ok(Settings::default());
  };
  let mut merged = serde_json::to_value(Settings::default())?;
  for (key, value) in stored {
    let Some(slot) = merged.get_mut(&key) else {
      continue;
    };
    let previous = std::mem::replace(slot, value);
    if let Err(err) = serde_json::from_value::<Settings>(merged.clone()) {
      warn!(key = %key, %err, "ignoring unreadable setting");
      if let Some(slot) = merged.get_mut(&key) {
        *slot = previous;
      }
    }
  }
  serde_json::from_value(merged)
}

pub async fn save_settings(store: &dyn KvStore, settings: &Settings) -> Result<(), StoreError> {
  store.put(SETTINGS_KEY, serde_json::to_value(settings)?).await
}
