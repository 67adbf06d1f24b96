//! Process-wide get-or-load cache for cohort tables and per-entity series.
//!
//! Each tier maps a key to a slot. A caller locks the slot for the whole
//! load, so concurrent requests for the same uncached key wait for the first
//! decode instead of starting their own. A failed load leaves the slot
//! empty, so the next caller (or a waiter) runs its own loader.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use medctx_common::{global_metrics, MedError, Result};
use medctx_execution::empty_table;
use serde::Serialize;
use tracing::{debug, warn};

type Slot = Arc<Mutex<Option<RecordBatch>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    All,
    Cohort,
    Series,
}

impl CacheTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(Self::All),
            "cohort" => Some(Self::Cohort),
            "series" | "signal" | "signals" => Some(Self::Series),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Cohort => "cohort",
            Self::Series => "series",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a get-or-load call.
///
/// `Cached` and `Loaded` both carry a table (possibly empty); `Failed` means
/// the loader returned an error and nothing was stored.
#[derive(Debug)]
pub enum LoadOutcome {
    Cached(RecordBatch),
    Loaded(RecordBatch),
    Failed(MedError),
}

impl LoadOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn table(&self) -> Option<&RecordBatch> {
        match self {
            Self::Cached(t) | Self::Loaded(t) => Some(t),
            Self::Failed(_) => None,
        }
    }

    /// The table, or the empty sentinel for a failed load.
    pub fn into_table(self) -> RecordBatch {
        match self {
            Self::Cached(t) | Self::Loaded(t) => t,
            Self::Failed(_) => empty_table(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub hits: u64,
    pub loads: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cohort: TierStats,
    pub series: TierStats,
}

struct Tier {
    name: &'static str,
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    loads: AtomicU64,
    failures: AtomicU64,
}

impl Tier {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    fn get_or_load<F>(&self, key: &str, loader: F) -> LoadOutcome
    where
        F: FnOnce() -> Result<RecordBatch>,
    {
        let slot = {
            let mut slots = self.slots.lock().expect("cache tier lock poisoned");
            slots.entry(key.to_string()).or_default().clone()
        };
        let mut guard = slot.lock().expect("cache slot lock poisoned");
        if let Some(table) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            global_metrics().record_cache_request(self.name, "hit");
            return LoadOutcome::Cached(table.clone());
        }

        let started = Instant::now();
        match loader() {
            Ok(table) => {
                global_metrics().record_decode(self.name, started.elapsed().as_secs_f64());
                global_metrics().record_cache_request(self.name, "load");
                self.loads.fetch_add(1, Ordering::Relaxed);
                debug!(tier = self.name, key, rows = table.num_rows(), "cache populated");
                *guard = Some(table.clone());
                LoadOutcome::Loaded(table)
            }
            Err(e) => {
                global_metrics().record_cache_request(self.name, "failure");
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(tier = self.name, key, error = %e, "load failed; entry not cached");
                LoadOutcome::Failed(e)
            }
        }
    }

    fn clear(&self) {
        self.slots.lock().expect("cache tier lock poisoned").clear();
    }

    fn contains(&self, key: &str) -> bool {
        let slot = self
            .slots
            .lock()
            .expect("cache tier lock poisoned")
            .get(key)
            .cloned();
        slot.as_ref().is_some_and(is_populated)
    }

    /// Populated entries; slots with a load in flight are not counted.
    fn stats(&self) -> TierStats {
        let entries = self
            .slots
            .lock()
            .expect("cache tier lock poisoned")
            .values()
            .filter(|s| is_populated(s))
            .count();
        TierStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

fn is_populated(slot: &Slot) -> bool {
    match slot.try_lock() {
        Ok(guard) => guard.is_some(),
        Err(_) => false,
    }
}

/// Two independent memo tiers with no eviction besides [`CacheStore::clear`].
pub struct CacheStore {
    cohort: Tier,
    series: Tier,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore").field("stats", &self.stats()).finish()
    }
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            cohort: Tier::new("cohort"),
            series: Tier::new("series"),
        }
    }

    /// The instance shared by every data context that was not given its own.
    pub fn global() -> Arc<CacheStore> {
        static GLOBAL: OnceLock<Arc<CacheStore>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(CacheStore::new())).clone()
    }

    pub fn get_or_load_cohort<F>(&self, table_id: &str, loader: F) -> LoadOutcome
    where
        F: FnOnce() -> Result<RecordBatch>,
    {
        self.cohort.get_or_load(table_id, loader)
    }

    pub fn get_or_load_series<F>(&self, entity_id: &str, loader: F) -> LoadOutcome
    where
        F: FnOnce() -> Result<RecordBatch>,
    {
        self.series.get_or_load(entity_id, loader)
    }

    /// Empty the named tier(s). Loads already running finish into slots
    /// that are no longer reachable.
    pub fn clear(&self, tier: CacheTier) {
        if matches!(tier, CacheTier::All | CacheTier::Cohort) {
            self.cohort.clear();
        }
        if matches!(tier, CacheTier::All | CacheTier::Series) {
            self.series.clear();
        }
        debug!(tier = %tier, "cache cleared");
    }

    pub fn contains(&self, tier: CacheTier, key: &str) -> bool {
        match tier {
            CacheTier::Cohort => self.cohort.contains(key),
            CacheTier::Series => self.series.contains(key),
            CacheTier::All => self.cohort.contains(key) || self.series.contains(key),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cohort: self.cohort.stats(),
            series: self.series.stats(),
        }
    }
}
