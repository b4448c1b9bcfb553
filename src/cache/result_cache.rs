//! Result cache with single-flight coordination
//!
//! Each domain key owns a slot holding the last stored classification and,
//! while a computation runs, the flight every caller for that key waits on.
//! Computations run in their own task: a caller that gives up waiting does
//! not cancel the work for the remaining waiters.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::stats::{CacheStats, Counters};
use crate::error::ResolveError;
use crate::models::{ClassificationResult, DomainKey};

/// A full cache frees `max_entries / EVICTION_BATCH_DIVISOR` slots per pass
const EVICTION_BATCH_DIVISOR: usize = 64;

/// Outcome shared with every waiter of one flight
type FlightOutcome = Result<Arc<ClassificationResult>, ResolveError>;

/// Cache policy
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Time a stored classification stays fresh
    pub ttl: Duration,
    /// Time an expired classification is kept for stale serving
    pub stale_grace: Duration,
    /// Maximum number of slots
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(7200),
            stale_grace: Duration::from_secs(86400),
            max_entries: 100_000,
        }
    }
}

impl From<&crate::config::CacheConfig> for CacheSettings {
    fn from(config: &crate::config::CacheConfig) -> Self {
        Self {
            ttl: config.ttl(),
            stale_grace: config.stale_grace(),
            max_entries: config.max_entries,
        }
    }
}

/// How a lookup was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh stored value
    Hit,
    /// This caller started the computation
    Computed,
    /// This caller joined a computation already in flight
    Joined,
    /// The computation failed and an older value was served instead
    Stale,
}

impl CacheStatus {
    /// Header value reported to clients
    pub fn as_header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Computed | CacheStatus::Joined => "miss",
            CacheStatus::Stale => "stale",
        }
    }
}

/// A classification together with how it was obtained
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub value: Arc<ClassificationResult>,
    pub status: CacheStatus,
}

struct Flight {
    id: u64,
    rx: watch::Receiver<Option<FlightOutcome>>,
}

#[derive(Default)]
struct Slot {
    value: Option<Arc<ClassificationResult>>,
    flight: Option<Flight>,
}

impl Slot {
    fn fresh_value(&self, now: DateTime<Utc>) -> Option<&Arc<ClassificationResult>> {
        self.value.as_ref().filter(|v| !v.is_expired_at(now))
    }
}

struct CacheInner {
    settings: CacheSettings,
    slots: Mutex<HashMap<DomainKey, Slot>>,
    next_flight: AtomicU64,
    counters: Counters,
}

impl CacheInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<DomainKey, Slot>> {
        // The map holds no invariants a panicking holder could break halfway
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn grace_deadline(&self, value: &ClassificationResult) -> DateTime<Utc> {
        value.ttl_expires_at + to_chrono(self.settings.stale_grace)
    }
}

/// TTL-bounded classification cache with single-flight computation
///
/// Cheap to clone; clones share the same storage.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    /// Create an empty cache
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                settings,
                slots: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Cache policy in effect
    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Read a fresh stored value
    ///
    /// Always a miss when `bypass` is set.
    pub fn get(&self, domain: &DomainKey, bypass: bool) -> Option<Arc<ClassificationResult>> {
        if bypass {
            return None;
        }
        let slots = self.inner.slots();
        slots
            .get(domain)
            .and_then(|slot| slot.fresh_value(Utc::now()))
            .cloned()
    }

    /// Return the stored value, or compute it once for all concurrent callers
    ///
    /// With `bypass` the stored value is ignored and a new computation is
    /// started, unless one is already in flight, in which case it is joined.
    /// When the computation fails, non-bypass callers get the previous value
    /// (even expired) if there is one.
    pub async fn compute_if_absent<F, Fut>(
        &self,
        domain: &DomainKey,
        bypass: bool,
        compute: F,
    ) -> Result<CacheLookup, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClassificationResult, ResolveError>> + Send + 'static,
    {
        let (mut rx, status, started) = {
            let mut slots = self.inner.slots();
            let now = Utc::now();

            let existing = slots.get(domain).map(|slot| {
                let fresh = if bypass {
                    None
                } else {
                    slot.fresh_value(now).cloned()
                };
                (fresh, slot.flight.as_ref().map(|f| f.rx.clone()))
            });

            match existing {
                Some((Some(value), _)) => {
                    Counters::incr(&self.inner.counters.hits);
                    return Ok(CacheLookup {
                        value,
                        status: CacheStatus::Hit,
                    });
                }
                Some((None, Some(rx))) => {
                    Counters::incr(&self.inner.counters.joined);
                    (rx, CacheStatus::Joined, None)
                }
                Some((None, None)) => {
                    let (id, tx, rx) = self.new_flight();
                    if let Some(slot) = slots.get_mut(domain) {
                        slot.flight = Some(Flight { id, rx: rx.clone() });
                    }
                    (rx, CacheStatus::Computed, Some((id, tx)))
                }
                None => {
                    self.make_room(&mut slots, now);
                    let (id, tx, rx) = self.new_flight();
                    slots.insert(
                        domain.clone(),
                        Slot {
                            value: None,
                            flight: Some(Flight { id, rx: rx.clone() }),
                        },
                    );
                    (rx, CacheStatus::Computed, Some((id, tx)))
                }
            }
        };

        if let Some((id, tx)) = started {
            Counters::incr(&self.inner.counters.misses);
            debug!(domain = %domain, flight = id, bypass, "Starting computation");
            let fut = compute();
            tokio::spawn(run_flight(
                self.inner.clone(),
                domain.clone(),
                id,
                tx,
                fut,
            ));
        }

        let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
        .unwrap_or_else(|| Err(ResolveError::Failed("computation abandoned".to_string())));

        match outcome {
            Ok(value) => Ok(CacheLookup { value, status }),
            Err(err) if !bypass => match self.stale_value(domain) {
                Some(value) => {
                    Counters::incr(&self.inner.counters.stale_served);
                    warn!(
                        domain = %domain,
                        error = %err,
                        computed_at = %value.computed_at,
                        "Cache degraded, serving stale classification"
                    );
                    Ok(CacheLookup {
                        value,
                        status: CacheStatus::Stale,
                    })
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Remove values past their stale grace
    pub fn sweep(&self) -> usize {
        let mut slots = self.inner.slots();
        let before = slots.len();
        let now = Utc::now();
        slots.retain(|_, slot| {
            slot.flight.is_some()
                || slot
                    .value
                    .as_ref()
                    .is_some_and(|v| now < self.inner.grace_deadline(v))
        });
        before - slots.len()
    }

    /// Number of slots, including those only holding a flight
    pub fn len(&self) -> usize {
        self.inner.slots().len()
    }

    /// Returns true if nothing is stored or in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStats {
        let slots = self.inner.slots();
        let entries = slots.values().filter(|s| s.value.is_some()).count() as u64;
        let in_flight = slots.values().filter(|s| s.flight.is_some()).count() as u64;
        self.inner.counters.snapshot(entries, in_flight)
    }

    fn new_flight(
        &self,
    ) -> (
        u64,
        watch::Sender<Option<FlightOutcome>>,
        watch::Receiver<Option<FlightOutcome>>,
    ) {
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        (id, tx, rx)
    }

    fn stale_value(&self, domain: &DomainKey) -> Option<Arc<ClassificationResult>> {
        self.inner
            .slots()
            .get(domain)
            .and_then(|slot| slot.value.clone())
    }

    /// Keep the slot count under the capacity bound before inserting a key
    ///
    /// Entries past their stale grace go first. If the cache is still full,
    /// a batch of the earliest expiring idle slots is evicted so that the
    /// next inserts do not pay for another scan.
    fn make_room(&self, slots: &mut HashMap<DomainKey, Slot>, now: DateTime<Utc>) {
        let max = self.inner.settings.max_entries;
        if slots.len() < max {
            return;
        }

        let before = slots.len();
        slots.retain(|_, slot| {
            slot.flight.is_some()
                || slot
                    .value
                    .as_ref()
                    .is_some_and(|v| now < self.inner.grace_deadline(v))
        });

        let target = max.saturating_sub(eviction_batch(max));
        if slots.len() > target {
            let excess = slots.len() - target;
            // Slots in flight are never evicted
            let mut idle: Vec<(Option<DateTime<Utc>>, DomainKey)> = slots
                .iter()
                .filter(|(_, slot)| slot.flight.is_none())
                .map(|(key, slot)| (slot.value.as_ref().map(|v| v.ttl_expires_at), key.clone()))
                .collect();
            if idle.len() > excess {
                idle.select_nth_unstable_by_key(excess, |(expires, _)| *expires);
                idle.truncate(excess);
            }
            for (_, key) in idle {
                slots.remove(&key);
            }
        }

        let evicted = (before - slots.len()) as u64;
        if evicted > 0 {
            Counters::add(&self.inner.counters.evictions, evicted);
            debug!(evicted, remaining = slots.len(), "Cache at capacity, evicted entries");
        }
    }
}

/// Number of slots freed per eviction pass
fn eviction_batch(max_entries: usize) -> usize {
    (max_entries / EVICTION_BATCH_DIVISOR).max(1)
}

/// Run one computation to completion and publish its outcome
async fn run_flight<Fut>(
    inner: Arc<CacheInner>,
    domain: DomainKey,
    id: u64,
    tx: watch::Sender<Option<FlightOutcome>>,
    fut: Fut,
) where
    Fut: Future<Output = Result<ClassificationResult, ResolveError>> + Send + 'static,
{
    let result = match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::Failed("computation panicked".to_string())),
    };

    let outcome: FlightOutcome = match result {
        Ok(mut value) => {
            value.ttl_expires_at = value.computed_at + to_chrono(inner.settings.ttl);
            Ok(Arc::new(value))
        }
        Err(e) => Err(e),
    };

    {
        let mut slots = inner.slots();
        let slot = slots.entry(domain.clone()).or_default();

        if let Ok(value) = &outcome {
            // Last completed wins
            let newer = slot
                .value
                .as_ref()
                .map_or(true, |current| current.computed_at <= value.computed_at);
            if newer {
                slot.value = Some(value.clone());
            }
        }

        if slot.flight.as_ref().is_some_and(|f| f.id == id) {
            slot.flight = None;
        }

        if slot.value.is_none() && slot.flight.is_none() {
            slots.remove(&domain);
        }
    }

    match &outcome {
        Ok(value) => debug!(domain = %domain, flight = id, green = value.green, "Computation finished"),
        Err(e) => debug!(domain = %domain, flight = id, error = %e, "Computation failed"),
    }

    tx.send_replace(Some(outcome));
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
