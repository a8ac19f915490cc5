use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::models::{Permit, UserProfile};

/// Consider cache stale after 1 hour.
/// Permit records change slowly; this balances freshness against needless
/// refetching on every launch.
const CACHE_STALE_MINUTES: i64 = 60;

const PERMITS_FILE: &str = "permits";
const PROFILE_FILE: &str = "profile";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let path = self.cache_path(name);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read cache file: {}", name))?;
        let cached: CachedData<T> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;

        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let cached = CachedData::new(data);
        let contents = serde_json::to_string_pretty(&cached)?;
        std::fs::write(self.cache_path(name), contents)?;
        Ok(())
    }

    pub fn load_permits(&self) -> Result<Option<CachedData<Vec<Permit>>>> {
        self.load(PERMITS_FILE)
    }

    pub fn save_permits(&self, permits: &[Permit]) -> Result<()> {
        self.save(PERMITS_FILE, &permits)
    }

    pub fn load_profile(&self) -> Result<Option<CachedData<UserProfile>>> {
        self.load(PROFILE_FILE)
    }

    pub fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.save(PROFILE_FILE, profile)
    }

    /// Remove all cached session data. Idempotent.
    pub fn clear(&self) -> Result<()> {
        for name in [PERMITS_FILE, PROFILE_FILE] {
            let path = self.cache_path(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
