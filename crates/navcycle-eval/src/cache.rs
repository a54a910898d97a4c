//! Read-through caching of per-instrument results.
//!
//! A cache key binds three things: the instrument, a fingerprint of its
//! raw observations, and a fingerprint of the parameter bundle. Any change
//! to the data or the options changes the key, so a hit is always safe to
//! reuse and a run against unchanged inputs does no pipeline work.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use navcycle_traits::{AnalysisParams, InstrumentId, RawObservation, Result};

use crate::pipeline::InstrumentRecord;

/// Identity of one cached per-instrument result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The instrument the entry belongs to.
    pub instrument_id: InstrumentId,
    /// Blake3 fingerprint of the instrument's raw observations.
    pub data_fingerprint: String,
    /// Blake3 fingerprint of the parameter bundle.
    pub params_fingerprint: String,
}

impl CacheKey {
    /// Build the key for one instrument's observations under a parameter
    /// bundle whose fingerprint is already known.
    pub fn new(
        instrument_id: &InstrumentId,
        observations: &[RawObservation],
        params_fingerprint: &str,
    ) -> Result<Self> {
        Ok(Self {
            instrument_id: instrument_id.clone(),
            data_fingerprint: data_fingerprint(observations)?,
            params_fingerprint: params_fingerprint.to_string(),
        })
    }

    /// Convenience constructor that fingerprints the bundle too.
    pub fn for_params(
        instrument_id: &InstrumentId,
        observations: &[RawObservation],
        params: &AnalysisParams,
    ) -> Result<Self> {
        Self::new(instrument_id, observations, &params.fingerprint()?)
    }

    /// Stable hex digest of the whole key, used as a file name.
    fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.instrument_id.as_bytes());
        hasher.update(self.data_fingerprint.as_bytes());
        hasher.update(self.params_fingerprint.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Blake3 fingerprint of observations in their canonical JSON form.
pub fn data_fingerprint(observations: &[RawObservation]) -> Result<String> {
    let bytes = serde_json::to_vec(observations)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Storage contract for per-instrument results.
///
/// `put` must be idempotent for identical keys; concurrent writers may
/// race, and the last write wins.
pub trait AnalysisCache: Send + Sync {
    /// Look up a cached record.
    fn get(&self, key: &CacheKey) -> Result<Option<InstrumentRecord>>;

    /// Store a record under its key.
    fn put(&self, key: &CacheKey, record: &InstrumentRecord) -> Result<()>;
}

/// In-process cache, useful for repeated runs inside one process and for
/// tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, InstrumentRecord>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AnalysisCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Result<Option<InstrumentRecord>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| navcycle_traits::CycleError::Other("cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &CacheKey, record: &InstrumentRecord) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| navcycle_traits::CycleError::Other("cache lock poisoned".to_string()))?;
        entries.insert(key.clone(), record.clone());
        Ok(())
    }
}

/// One JSON file per entry under a cache directory.
///
/// Unreadable or stale files count as misses and are overwritten on the
/// next put.
#[derive(Debug, Clone)]
pub struct JsonDirCache {
    dir: PathBuf,
}

impl JsonDirCache {
    /// Open (creating if needed) a cache directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.digest()))
    }
}

impl AnalysisCache for JsonDirCache {
    fn get(&self, key: &CacheKey) -> Result<Option<InstrumentRecord>> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "dropping unreadable cache entry");
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, record: &InstrumentRecord) -> Result<()> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(record)?;
        // Write-then-rename keeps concurrent readers off half-written
        // entries.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navcycle_traits::{CompositeScore, Date};
    use std::collections::BTreeMap;

    fn observation(day: u32, value: f64) -> RawObservation {
        RawObservation {
            instrument_id: "X".to_string(),
            date: Date::from_ymd_opt(2024, 1, day).unwrap(),
            value,
        }
    }

    fn record() -> InstrumentRecord {
        InstrumentRecord {
            score: CompositeScore {
                instrument_id: "X".to_string(),
                as_of: Date::from_ymd_opt(2024, 1, 31).unwrap(),
                composite_value: 0.5,
                contributions: BTreeMap::new(),
                vote_count: 2,
            },
            turning_points: Vec::new(),
            backtest_records: Vec::new(),
            backtest_summaries: Vec::new(),
            spectral: None,
            harmonic: None,
            fill_fraction: 0.0,
        }
    }

    #[test]
    fn test_data_fingerprint_sensitive_to_values() {
        let a = data_fingerprint(&[observation(1, 100.0)]).unwrap();
        let b = data_fingerprint(&[observation(1, 100.0)]).unwrap();
        let c = data_fingerprint(&[observation(1, 100.5)]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_changes_with_params() {
        let id = "X".to_string();
        let obs = vec![observation(1, 100.0)];
        let base = AnalysisParams::default();
        let other = AnalysisParams {
            min_history: 100,
            ..AnalysisParams::default()
        };
        let k1 = CacheKey::for_params(&id, &obs, &base).unwrap();
        let k2 = CacheKey::for_params(&id, &obs, &other).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_memory_cache_round_trip() {
        let cache = MemoryCache::new();
        let id = "X".to_string();
        let key = CacheKey::for_params(&id, &[observation(1, 1.0)], &AnalysisParams::default())
            .unwrap();
        assert!(cache.get(&key).unwrap().is_none());
        cache.put(&key, &record()).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap(), record());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_idempotent() {
        let cache = MemoryCache::new();
        let id = "X".to_string();
        let key = CacheKey::for_params(&id, &[observation(1, 1.0)], &AnalysisParams::default())
            .unwrap();
        cache.put(&key, &record()).unwrap();
        cache.put(&key, &record()).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_json_dir_cache_round_trip() {
        let dir = std::env::temp_dir().join(format!("navcycle-cache-test-{}", std::process::id()));
        let cache = JsonDirCache::new(&dir).unwrap();
        let id = "X".to_string();
        let key = CacheKey::for_params(&id, &[observation(1, 1.0)], &AnalysisParams::default())
            .unwrap();
        assert!(cache.get(&key).unwrap().is_none());
        cache.put(&key, &record()).unwrap();
        assert_eq!(cache.get(&key).unwrap().unwrap(), record());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
