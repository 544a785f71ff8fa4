//! TTL cache in front of every upstream fetch.
//!
//! One entry per key, each with `fetched_at` and `expires_at`. Misses are
//! singleflighted: the first caller for a key becomes the leader and runs the
//! fetch; concurrent callers subscribe to the leader's `watch` slot and get
//! the same result. Failures are broadcast to waiters but never stored.

pub mod key;
pub mod persist;

pub use key::CacheKey;

use crate::teamsl::UpstreamError;
use crate::utils::fmt_duration;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use persist::{DiskStore, PersistedEntry};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether a call may be answered from, and written to, the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    Use,
    /// Always fetch; neither read nor write the cache.
    Bypass,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub retention: Duration,
    /// Upper bound on a single fetch, leader and waiters alike.
    pub fetch_deadline: Duration,
    /// An in-flight marker older than this is taken over by the next caller.
    pub inflight_watchdog: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30 * 60),
            fetch_deadline: Duration::from_secs(120),
            inflight_watchdog: Duration::from_secs(180),
        }
    }
}

struct CacheEntry<V> {
    value: Arc<V>,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

type FlightResult<V> = Option<Result<Arc<V>, UpstreamError>>;

struct Flight<V> {
    id: u64,
    started_at: Instant,
    tx: Arc<watch::Sender<FlightResult<V>>>,
}

enum Claim<'a, V> {
    Leader(FlightGuard<'a, V>),
    Waiter(watch::Receiver<FlightResult<V>>),
}

/// Held by the leader for the duration of its fetch. Dropping it clears the
/// in-flight marker, so a cancelled or panicking leader never leaves a key
/// stuck; waiters see the channel close and retry.
struct FlightGuard<'a, V> {
    store: &'a CacheStore<V>,
    key: CacheKey,
    id: u64,
    tx: Arc<watch::Sender<FlightResult<V>>>,
}

impl<V> FlightGuard<'_, V> {
    fn complete(self, result: Result<Arc<V>, UpstreamError>) {
        self.tx.send_replace(Some(result));
    }
}

impl<V> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        self.store
            .inflight
            .remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

pub struct CacheStore<V> {
    entries: DashMap<CacheKey, CacheEntry<V>>,
    inflight: DashMap<CacheKey, Flight<V>>,
    next_flight: AtomicU64,
    settings: CacheSettings,
    disk: Option<DiskStore>,
}

impl<V> CacheStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// In-memory only.
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            next_flight: AtomicU64::new(1),
            settings,
            disk: None,
        }
    }

    /// Backed by `disk`; unexpired entries found there are loaded up front.
    pub async fn with_disk(settings: CacheSettings, disk: DiskStore) -> Self {
        let loaded: Vec<PersistedEntry<V>> = disk.load_all(Utc::now()).await;
        let count = loaded.len();
        let mut store = Self::new(settings);
        for entry in loaded {
            store.entries.insert(
                entry.key,
                CacheEntry {
                    value: Arc::new(entry.payload),
                    fetched_at: entry.fetched_at,
                    expires_at: entry.expires_at,
                },
            );
        }
        info!(entries = count, dir = %disk.dir().display(), "Cache loaded from disk");
        store.disk = Some(disk);
        store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stored value for `key` if it has not expired.
    pub fn get_fresh(&self, key: &CacheKey) -> Option<Arc<V>> {
        let entry = self.entries.get(key)?;
        (Utc::now() < entry.expires_at).then(|| entry.value.clone())
    }

    /// When the stored value for `key` was fetched, fresh or not.
    pub fn fetched_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.entries.get(key).map(|e| e.fetched_at)
    }

    pub fn is_inflight(&self, key: &CacheKey) -> bool {
        self.inflight.contains_key(key)
    }

    /// Return the fresh value for `key`, or run `fetch` exactly once across
    /// all concurrent callers for that key and share its result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        mode: CacheMode,
        fetch: F,
    ) -> Result<Arc<V>, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, UpstreamError>>,
    {
        if mode == CacheMode::Bypass {
            debug!(%key, "Cache bypassed");
            return self.run_bounded(key, fetch()).await.map(Arc::new);
        }

        let guard = loop {
            if let Some(value) = self.get_fresh(key) {
                let age = self
                    .fetched_at(key)
                    .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
                    .unwrap_or_default();
                debug!(%key, age = fmt_duration(age), "Cache hit");
                return Ok(value);
            }
            match self.claim(key) {
                Claim::Leader(guard) => break guard,
                Claim::Waiter(rx) => {
                    debug!(%key, "Joining in-flight fetch");
                    if let Some(result) = self.wait(key, rx).await {
                        return result;
                    }
                    // The leader went away without a result; start over.
                }
            }
        };

        // A previous leader may have stored a value between our miss and our claim.
        if let Some(value) = self.get_fresh(key) {
            return Ok(value);
        }

        let start = Instant::now();
        let result = self.run_bounded(key, fetch()).await.map(Arc::new);
        match &result {
            Ok(value) => {
                self.store(key, value.clone()).await;
                debug!(%key, duration = fmt_duration(start.elapsed()), "Cache filled");
            }
            Err(e) => {
                warn!(%key, error = %e, duration = fmt_duration(start.elapsed()), "Fetch failed, nothing cached");
            }
        }
        guard.complete(result.clone());
        result
    }

    fn claim(&self, key: &CacheKey) -> Claim<'_, V> {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let age = occupied.get().started_at.elapsed();
                if age <= self.settings.inflight_watchdog {
                    return Claim::Waiter(occupied.get().tx.subscribe());
                }
                warn!(%key, age = fmt_duration(age), "Taking over stale in-flight fetch");
                let (flight, guard) = self.new_flight(key);
                occupied.insert(flight);
                Claim::Leader(guard)
            }
            Entry::Vacant(vacant) => {
                let (flight, guard) = self.new_flight(key);
                vacant.insert(flight);
                Claim::Leader(guard)
            }
        }
    }

    fn new_flight(&self, key: &CacheKey) -> (Flight<V>, FlightGuard<'_, V>) {
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = watch::channel(None);
        let tx = Arc::new(tx);
        let flight = Flight {
            id,
            started_at: Instant::now(),
            tx: tx.clone(),
        };
        let guard = FlightGuard {
            store: self,
            key: key.clone(),
            id,
            tx,
        };
        (flight, guard)
    }

    /// `None` when the leader disappeared without publishing a result.
    async fn wait(
        &self,
        key: &CacheKey,
        mut rx: watch::Receiver<FlightResult<V>>,
    ) -> FlightResult<V> {
        let deadline = self.settings.fetch_deadline;
        let waited = tokio::time::timeout(deadline, async {
            loop {
                let current = rx.borrow_and_update().clone();
                if current.is_some() {
                    return current;
                }
                if rx.changed().await.is_err() {
                    return rx.borrow().clone();
                }
            }
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Some(Err(Self::deadline_error(key, deadline))),
        }
    }

    async fn run_bounded<Fut>(&self, key: &CacheKey, fut: Fut) -> Result<V, UpstreamError>
    where
        Fut: Future<Output = Result<V, UpstreamError>>,
    {
        let deadline = self.settings.fetch_deadline;
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%key, deadline = fmt_duration(deadline), "Fetch exceeded its deadline");
                Err(Self::deadline_error(key, deadline))
            }
        }
    }

    fn deadline_error(key: &CacheKey, deadline: Duration) -> UpstreamError {
        UpstreamError::transient(
            key.adapter(),
            format!("fetch did not finish within {}", fmt_duration(deadline)),
        )
    }

    async fn store(&self, key: &CacheKey, value: Arc<V>) {
        let fetched_at = Utc::now();
        let retention = TimeDelta::from_std(self.settings.retention).unwrap_or(TimeDelta::MAX);
        let expires_at = fetched_at
            .checked_add_signed(retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                fetched_at,
                expires_at,
            },
        );

        if let Some(disk) = &self.disk {
            let record = PersistedEntry {
                key: key.clone(),
                fetched_at,
                expires_at,
                payload: value.as_ref(),
            };
            if let Err(e) = disk.write(&record).await {
                warn!(%key, error = ?e, "Failed to persist cache entry");
            }
        }
    }

    /// Drop expired entries from memory and disk. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut expired = Vec::new();
        self.entries.retain(|key, entry| {
            let keep = entry.expires_at > now;
            if !keep {
                expired.push(key.clone());
            }
            keep
        });

        if let Some(disk) = &self.disk {
            for key in &expired {
                disk.remove(key).await;
            }
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Swept expired cache entries");
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teamsl::{AdapterKind, AdapterRequest};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn key(league_id: i64) -> CacheKey {
        CacheKey::for_request(&AdapterRequest::Schedule { league_id })
    }

    fn settings(retention: Duration) -> CacheSettings {
        CacheSettings {
            retention,
            fetch_deadline: Duration::from_secs(5),
            inflight_watchdog: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_hit_within_retention_skips_fetch() {
        let cache: CacheStore<String> = CacheStore::new(settings(Duration::from_secs(60)));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_fetch(&key(48714), CacheMode::Use, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("schedule".to_string())
                })
                .await
                .unwrap();
            assert_eq!(*value, "schedule");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retention_always_refetches() {
        let cache: CacheStore<u32> = CacheStore::new(settings(Duration::ZERO));
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .get_or_fetch(&key(1), CacheMode::Use, || async {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.sweep_expired().await, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let cache: Arc<CacheStore<u32>> = Arc::new(CacheStore::new(settings(Duration::from_secs(60))));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_fetch(&key(2), CacheMode::Use, || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(42)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(*task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_inflight(&key(2)));
    }

    #[tokio::test]
    async fn test_failure_is_shared_but_not_stored() {
        let cache: Arc<CacheStore<u32>> = Arc::new(CacheStore::new(settings(Duration::from_secs(60))));
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |cache: Arc<CacheStore<u32>>, calls: Arc<AtomicUsize>| async move {
            cache
                .get_or_fetch(&key(3), CacheMode::Use, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(UpstreamError::format(AdapterKind::Competition, "status 1"))
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(cache.clone(), calls.clone()),
            run(cache.clone(), calls.clone())
        );
        assert!(a.is_err() && b.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get_fresh(&key(3)).is_none());

        // Next call fetches again.
        let _ = run(cache.clone(), calls.clone()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadline_clears_inflight_marker() {
        let cache: CacheStore<u32> = CacheStore::new(CacheSettings {
            retention: Duration::from_secs(60),
            fetch_deadline: Duration::from_millis(20),
            inflight_watchdog: Duration::from_secs(10),
        });
        let err = cache
            .get_or_fetch(&key(4), CacheMode::Use, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::TransientNetwork { .. }));
        assert!(!cache.is_inflight(&key(4)));
        assert!(cache.get_fresh(&key(4)).is_none());
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_key() {
        let cache: Arc<CacheStore<u32>> = Arc::new(CacheStore::new(settings(Duration::from_secs(60))));
        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(5), CacheMode::Use, || async {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.is_inflight(&key(5)));
        leader.abort();
        let _ = leader.await;
        assert!(!cache.is_inflight(&key(5)));

        let value = cache
            .get_or_fetch(&key(5), CacheMode::Use, || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn test_stale_inflight_marker_is_taken_over() {
        let cache: Arc<CacheStore<u32>> = Arc::new(CacheStore::new(CacheSettings {
            retention: Duration::from_secs(60),
            fetch_deadline: Duration::from_secs(5),
            inflight_watchdog: Duration::from_millis(50),
        }));
        let release_first = Arc::new(Notify::new());
        let release_second = Arc::new(Notify::new());
        let second_calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = cache.clone();
            let release = release_first.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(7), CacheMode::Use, || async move {
                        release.notified().await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_inflight(&key(7)));

        // The first leader is past the watchdog; the next caller leads its own fetch.
        let second = {
            let cache = cache.clone();
            let release = release_second.clone();
            let calls = second_calls.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(&key(7), CacheMode::Use, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Ok(2)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        // The old leader finishing must not clear the new leader's marker.
        release_first.notify_one();
        assert_eq!(*first.await.unwrap().unwrap(), 1);
        assert!(cache.is_inflight(&key(7)));

        release_second.notify_one();
        assert_eq!(*second.await.unwrap().unwrap(), 2);
        assert!(!cache.is_inflight(&key(7)));
        assert_eq!(*cache.get_fresh(&key(7)).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bypass_neither_reads_nor_writes() {
        let cache: CacheStore<u32> = CacheStore::new(settings(Duration::from_secs(60)));
        cache
            .get_or_fetch(&key(6), CacheMode::Use, || async { Ok(1) })
            .await
            .unwrap();
        let fresh = cache
            .get_or_fetch(&key(6), CacheMode::Bypass, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(*fresh, 2);
        assert_eq!(*cache.get_fresh(&key(6)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let disk = DiskStore::open(dir.path()).await.unwrap();
            let cache: CacheStore<String> =
                CacheStore::with_disk(settings(Duration::from_secs(60)), disk).await;
            cache
                .get_or_fetch(&key(48714), CacheMode::Use, || async { Ok("persisted".to_string()) })
                .await
                .unwrap();
        }

        let disk = DiskStore::open(dir.path()).await.unwrap();
        let cache: CacheStore<String> =
            CacheStore::with_disk(settings(Duration::from_secs(60)), disk).await;
        let value = cache
            .get_or_fetch(&key(48714), CacheMode::Use, || async {
                Err(UpstreamError::transient(AdapterKind::Competition, "offline"))
            })
            .await
            .unwrap();
        assert_eq!(*value, "persisted");
    }
}
