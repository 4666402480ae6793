//! Session cache for record sources
//!
//! Layout of [`DirCache`]: `{cache_dir}/{season}/{round}/{what}.json`
//!
//! Cached payloads are the typed structs serialized as JSON. A corrupt or
//! unreadable entry is treated as a miss, so results never depend on the cache.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::RawRecordSource;
use crate::error::PipelineError;
use crate::models::{QualifyingEntry, RaceResults, SessionKey, SessionKind, WeatherSample};

/// Key/value store for serialized session payloads
pub trait SessionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

/// On-disk cache; keys map to relative file paths
#[derive(Debug, Clone)]
pub struct DirCache {
    cache_dir: PathBuf,
}

impl DirCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }
}

impl SessionCache for DirCache {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    /// Atomic write: `.tmp` then rename into place
    fn put(&self, key: &str, value: &str) {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        let result = path
            .parent()
            .map(fs::create_dir_all)
            .transpose()
            .and_then(|_| fs::write(&tmp, value))
            .and_then(|_| fs::rename(&tmp, &path));

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            warn!("Failed to write cache entry {:?}: {}", path, e);
        }
    }
}

fn results_key(season: i32, round: u32) -> String {
    format!("{}/{}/results", season, round)
}

fn qualifying_key(season: i32, round: u32) -> String {
    format!("{}/{}/qualifying", season, round)
}

fn weather_key(session: SessionKey) -> String {
    let kind = match session.kind {
        SessionKind::Qualifying => "qualifying",
        SessionKind::Race => "race",
    };
    format!("{}/{}/weather_{}", session.season, session.round, kind)
}

/// Wraps a source and memoizes successful answers
pub struct CachedSource<S> {
    inner: S,
    cache: Box<dyn SessionCache>,
}

impl<S: RawRecordSource> CachedSource<S> {
    pub fn new(inner: S, cache: Box<dyn SessionCache>) -> Self {
        Self { inner, cache }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn cached<T, F>(&self, key: &str, fetch: F) -> Result<T, PipelineError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, PipelineError>,
    {
        if let Some(hit) = self.cache.get(key) {
            match serde_json::from_str(&hit) {
                Ok(value) => {
                    debug!("Cache hit: {}", key);
                    return Ok(value);
                }
                Err(e) => warn!("Ignoring unreadable cache entry {}: {}", key, e),
            }
        }

        let value = fetch()?;
        match serde_json::to_string(&value) {
            Ok(json) => self.cache.put(key, &json),
            Err(e) => warn!("Could not serialize {} for cache: {}", key, e),
        }
        Ok(value)
    }
}

impl<S: RawRecordSource> RawRecordSource for CachedSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn race_results(&self, season: i32, round: u32) -> Result<RaceResults, PipelineError> {
        self.cached(&results_key(season, round), || {
            self.inner.race_results(season, round)
        })
    }

    fn qualifying(&self, season: i32, round: u32) -> Result<Vec<QualifyingEntry>, PipelineError> {
        self.cached(&qualifying_key(season, round), || {
            self.inner.qualifying(season, round)
        })
    }

    fn weather(&self, session: SessionKey) -> Result<Option<WeatherSample>, PipelineError> {
        self.cached(&weather_key(session), || self.inner.weather(session))
    }
}
