use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::NaiveDate;
use tracing::debug;

use crate::{
    error::FetchError,
    loader::Fetcher,
    model::{DateRange, Series},
};

pub trait Clock {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Hand-advanced clock for exercising expiry.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

pub struct TtlCache<K, V, C = SystemClock> {
    ttl: Duration,
    clock: C,
    entries: HashMap<K, (Instant, V)>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V, SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<K: Eq + Hash, V: Clone, C: Clock> TtlCache<K, V, C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            ttl,
            clock,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.clock.now();

        match self.entries.get(key) {
            Some((stored, value)) if now.duration_since(*stored) < self.ttl => Some(value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        let now = self.clock.now();
        self.entries.insert(key, (now, value));
    }

    pub fn purge_expired(&mut self) {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.entries
            .retain(|_, (stored, _)| now.duration_since(*stored) < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub source_key: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchKey {
    pub fn new(source_key: &str, range: &DateRange) -> Self {
        Self {
            source_key: source_key.to_string(),
            start: range.start,
            end: range.end,
        }
    }
}

/// Memoizes successful fetches. Failures always go back upstream.
pub struct CachedFetcher<F, C = SystemClock> {
    inner: F,
    cache: Mutex<TtlCache<FetchKey, Series, C>>,
}

impl<F: Fetcher> CachedFetcher<F, SystemClock> {
    pub fn new(inner: F, ttl: Duration) -> Self {
        Self::with_cache(inner, TtlCache::new(ttl))
    }
}

impl<F: Fetcher, C: Clock> CachedFetcher<F, C> {
    pub fn with_cache(inner: F, cache: TtlCache<FetchKey, Series, C>) -> Self {
        Self {
            inner,
            cache: Mutex::new(cache),
        }
    }

    fn lookup(&self, key: &FetchKey) -> Option<Series> {
        self.cache.lock().ok().and_then(|mut cache| cache.get(key))
    }

    fn store(&self, key: FetchKey, series: Series) {
        if let Ok(mut cache) = self.cache.lock() {
            // keys that are never asked for again would otherwise linger
            cache.purge_expired();
            cache.insert(key, series);
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or_default()
    }
}

impl<F: Fetcher, C: Clock> Fetcher for CachedFetcher<F, C> {
    fn fetch(&self, source_key: &str, range: &DateRange) -> Result<Series, FetchError> {
        let key = FetchKey::new(source_key, range);

        if let Some(series) = self.lookup(&key) {
            debug!(key = source_key, "cache hit");
            return Ok(series);
        }

        // the lock is not held across the upstream call
        let series = self.inner.fetch(source_key, range)?;
        self.store(key, series.clone());
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, time::Duration};

    use chrono::NaiveDate;

    use super::{CachedFetcher, ManualClock, TtlCache};
    use crate::{
        error::FetchError,
        loader::Fetcher,
        model::{DateRange, Series},
    };

    struct Counting {
        calls: Cell<usize>,
        fail: bool,
    }

    impl Fetcher for Counting {
        fn fetch(&self, source_key: &str, _: &DateRange) -> Result<Series, FetchError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(FetchError::Parse("down".into()));
            }
            let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
            Ok(Series::from_points(source_key, [(day, 1.0)]))
        }
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
    }

    #[test]
    fn unittest_ttl_cache_expiry() {
        let clock = ManualClock::default();
        let mut cache = TtlCache::with_clock(Duration::from_secs(10), clock.clone());

        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get(&"a"), Some(1));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.is_empty());

        cache.insert("b", 2);
        clock.advance(Duration::from_secs(11));
        cache.purge_expired();
        assert!(cache.is_empty());
    }

    #[test]
    fn unittest_cached_fetcher_hits_within_ttl() -> eyre::Result<()> {
        let clock = ManualClock::default();
        let fetcher = CachedFetcher::with_cache(
            Counting {
                calls: Cell::new(0),
                fail: false,
            },
            TtlCache::with_clock(Duration::from_secs(3600), clock.clone()),
        );

        fetcher.fetch("AAPL", &range())?;
        fetcher.fetch("AAPL", &range())?;
        assert_eq!(fetcher.inner.calls.get(), 1);

        // a different window is a different key
        let other = DateRange::new(range().start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        fetcher.fetch("AAPL", &other)?;
        assert_eq!(fetcher.inner.calls.get(), 2);

        clock.advance(Duration::from_secs(3600));
        fetcher.fetch("AAPL", &range())?;
        assert_eq!(fetcher.inner.calls.get(), 3);
        Ok(())
    }

    #[test]
    fn unittest_stale_keys_dropped_on_store() -> eyre::Result<()> {
        let clock = ManualClock::default();
        let fetcher = CachedFetcher::with_cache(
            Counting {
                calls: Cell::new(0),
                fail: false,
            },
            TtlCache::with_clock(Duration::from_secs(60), clock.clone()),
        );

        fetcher.fetch("AAPL", &range())?;
        fetcher.fetch("MSFT", &range())?;
        assert_eq!(fetcher.cached_entries(), 2);

        clock.advance(Duration::from_secs(61));
        fetcher.fetch("NVDA", &range())?;
        assert_eq!(fetcher.cached_entries(), 1);
        Ok(())
    }

    #[test]
    fn unittest_failures_are_not_cached() {
        let fetcher = CachedFetcher::new(
            Counting {
                calls: Cell::new(0),
                fail: true,
            },
            Duration::from_secs(3600),
        );

        assert!(fetcher.fetch("AAPL", &range()).is_err());
        assert!(fetcher.fetch("AAPL", &range()).is_err());
        assert_eq!(fetcher.inner.calls.get(), 2);
        assert_eq!(fetcher.cached_entries(), 0);
    }
}
