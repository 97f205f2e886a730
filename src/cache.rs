use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError, RwLock, mpsc},
    thread,
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::{
    dataset::{Dataset, RawTable},
    error::{FacetError, FacetResult},
    normalize::{NormalizeReport, Normalizer},
    schema::ColumnDescriptor,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub source_key: String,
    pub dataset: Arc<Dataset>,
    pub descriptors: Arc<Vec<ColumnDescriptor>>,
    pub report: NormalizeReport,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
    pub fingerprint: String,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        match age.to_std() {
            Ok(age) => age <= self.ttl,
            // Clock went backwards; the entry is younger than "now".
            Err(_) => true,
        }
    }
}

/// Shared, ttl-bounded cache of normalized datasets keyed by source identity.
///
/// Reads take a shared lock. A miss is single-flight per key: the first caller
/// holds that key's load lock while the loader runs and concurrent callers for
/// the same key wait, then find the fresh entry.
///
/// Loaders run on a worker thread bounded by `load_timeout`. A timed-out
/// worker stays registered as in flight until it returns, and misses on its
/// key fail fast instead of starting a second load. Failed loads never
/// replace the stored entry.
pub struct DatasetCache {
    normalizer: Arc<Normalizer>,
    clock: Arc<dyn Clock>,
    load_timeout: Duration,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
    load_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Marks a key as being loaded until the worker holding it finishes.
struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl DatasetCache {
    pub fn new(normalizer: Normalizer, load_timeout: Duration) -> Self {
        Self::with_clock(normalizer, load_timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        normalizer: Normalizer,
        load_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            clock,
            load_timeout,
            entries: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Returns the entry for `source_key`, loading it when absent or expired.
    pub fn get_or_load<F>(
        &self,
        source_key: &str,
        loader: F,
        ttl: Duration,
    ) -> FacetResult<Arc<CacheEntry>>
    where
        F: FnOnce() -> anyhow::Result<RawTable> + Send + 'static,
    {
        if let Some(entry) = self.fresh_entry(source_key) {
            debug!("Cache hit for '{source_key}'");
            return Ok(entry);
        }
        let key_lock = self.load_lock(source_key);
        let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished the load while we waited.
        if let Some(entry) = self.fresh_entry(source_key) {
            debug!("Cache filled by concurrent load for '{source_key}'");
            return Ok(entry);
        }
        self.load_and_store(source_key, loader, ttl)
    }

    /// Reloads unconditionally, keeping the previous entry if the load fails.
    pub fn refresh<F>(
        &self,
        source_key: &str,
        loader: F,
        ttl: Duration,
    ) -> FacetResult<Arc<CacheEntry>>
    where
        F: FnOnce() -> anyhow::Result<RawTable> + Send + 'static,
    {
        let key_lock = self.load_lock(source_key);
        let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_and_store(source_key, loader, ttl)
    }

    pub fn peek(&self, source_key: &str) -> Option<Arc<CacheEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_key)
            .cloned()
    }

    pub fn invalidate(&self, source_key: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_key)
            .is_some();
        if removed {
            info!("Invalidated cached dataset for '{source_key}'");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh_entry(&self, source_key: &str) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now();
        self.peek(source_key).filter(|entry| entry.is_fresh(now))
    }

    fn load_lock(&self, source_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .load_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(source_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn load_and_store<F>(
        &self,
        source_key: &str,
        loader: F,
        ttl: Duration,
    ) -> FacetResult<Arc<CacheEntry>>
    where
        F: FnOnce() -> anyhow::Result<RawTable> + Send + 'static,
    {
        info!("Loading source '{source_key}'");
        let raw = match self.run_loader(source_key, loader) {
            Ok(raw) => raw,
            Err(err) => {
                if self.peek(source_key).is_some() {
                    warn!("Reload of '{source_key}' failed; keeping the previous entry");
                }
                return Err(err);
            }
        };
        let fingerprint = fingerprint(&raw);
        let normalized = self
            .normalizer
            .normalize(&raw)
            .map_err(|err| FacetError::source_unavailable(source_key, err.to_string()))?;

        if let Some(previous) = self.peek(source_key) {
            if previous.fingerprint == fingerprint {
                debug!("Source '{source_key}' unchanged since last load");
            } else {
                info!("Source '{source_key}' changed since last load");
            }
        }

        let entry = Arc::new(CacheEntry {
            source_key: source_key.to_string(),
            dataset: Arc::new(normalized.dataset),
            descriptors: Arc::new(normalized.descriptors),
            report: normalized.report,
            fetched_at: self.clock.now(),
            ttl,
            fingerprint,
        });
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source_key.to_string(), Arc::clone(&entry));
        info!(
            "Cached '{source_key}' with {} row(s), ttl {}s",
            entry.dataset.row_count(),
            ttl.as_secs()
        );
        Ok(entry)
    }

    fn run_loader<F>(&self, source_key: &str, loader: F) -> FacetResult<RawTable>
    where
        F: FnOnce() -> anyhow::Result<RawTable> + Send + 'static,
    {
        let marker = {
            let mut keys = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if !keys.insert(source_key.to_string()) {
                return Err(FacetError::source_unavailable(
                    source_key,
                    "an earlier load is still running",
                ));
            }
            InFlight {
                keys: Arc::clone(&self.in_flight),
                key: source_key.to_string(),
            }
        };
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("load-{source_key}"))
            .spawn(move || {
                let result = {
                    let _marker = marker;
                    loader()
                };
                // The receiver is gone after a timeout; nothing left to report to.
                let _ = tx.send(result);
            })
            .map_err(|err| FacetError::source_unavailable(source_key, err.to_string()))?;

        match rx.recv_timeout(self.load_timeout) {
            Ok(Ok(raw)) => Ok(raw),
            Ok(Err(err)) => Err(FacetError::source_unavailable(source_key, format!("{err:#}"))),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(FacetError::source_unavailable(
                source_key,
                format!("load timed out after {:?}", self.load_timeout),
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FacetError::source_unavailable(
                source_key,
                "loader panicked",
            )),
        }
    }
}

fn fingerprint(raw: &RawTable) -> String {
    let mut hasher = Sha256::new();
    for header in &raw.headers {
        hasher.update(header.as_bytes());
        hasher.update([0x1f]);
    }
    for row in &raw.rows {
        hasher.update([0x1e]);
        for cell in row {
            hasher.update(cell.as_bytes());
            hasher.update([0x1f]);
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
