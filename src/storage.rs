//! Persisted per-resource state cache
//!
//! The harness records audit snapshots and `checked`/`synced`
//! timestamps here so they survive between runs. Keys are scoped per
//! resource; values are plain JSON so resource types can store whatever
//! shape they need.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Key/value state scoped per resource, surviving between runs
pub trait Storage {
    /// Fetch a stored value for one resource
    fn get(&self, resource: &str, key: &str) -> Option<Value>;

    /// Store a value for one resource, replacing any previous one
    fn set(&mut self, resource: &str, key: &str, value: Value);

    /// Flush to durable storage; in-memory implementations do nothing
    fn persist(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Storage that lives and dies with the process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: HashMap<String, HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, resource: &str, key: &str) -> Option<Value> {
        self.data.get(resource)?.get(key).cloned()
    }

    fn set(&mut self, resource: &str, key: &str, value: Value) {
        self.data
            .entry(resource.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}

/// Storage backed by a JSON file
///
/// Loaded once at open, mutated in memory, written back on `persist`.
/// A missing file is an empty cache, not an error.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: HashMap<String, HashMap<String, Value>>,
}

impl FileStorage {
    /// Open the cache at `path`, loading existing contents if present
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            log::debug!("state cache {} does not exist, starting empty", path.display());
            return Ok(Self { path, data: HashMap::new() });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read state cache: {}", path.display()))?;
        let data = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state cache: {}", path.display()))?;

        log::debug!("loaded state cache from {}", path.display());
        Ok(Self { path, data })
    }

    /// Where this cache persists to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Storage for FileStorage {
    fn get(&self, resource: &str, key: &str) -> Option<Value> {
        self.data.get(resource)?.get(key).cloned()
    }

    fn set(&mut self, resource: &str, key: &str, value: Value) {
        self.data
            .entry(resource.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn persist(&mut self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory: {}", dir.display()))?;
        }

        let content =
            serde_json::to_string_pretty(&self.data).context("failed to serialize state cache")?;
        fs::write(&self.path, &content)
            .with_context(|| format!("failed to write state cache: {}", self.path.display()))?;

        log::debug!("saved state cache to {}", self.path.display());
        Ok(())
    }
}
