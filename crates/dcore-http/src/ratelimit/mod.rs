//! Per-route rate-limit buckets and the registry that owns them.
//!
//! # Model
//!
//! Every route key (method, template, major parameter) maps to a bucket.
//! A bucket is a fair `tokio::sync::Mutex` around its counters; holding the
//! lock *is* the permit, so requests on one bucket run strictly one at a
//! time in arrival order while different buckets proceed in parallel.
//!
//! A route starts on a private placeholder bucket that admits one request.
//! The first response names the server-side bucket hash: the placeholder
//! either adopts it or, if another route already owns that hash, the route
//! joins the shared bucket. When a later response reports a different hash
//! only that route is remapped; the old bucket keeps serving every other
//! route on it and is never deleted.
//!
//! The route map is the only record of which bucket a route uses. A request
//! that was queued on a bucket its route has since left notices once it gets
//! the lock and queues on the route's current bucket instead.

mod global;
pub mod headers;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dcore_core::clock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

pub use self::global::GlobalGate;
pub use self::headers::{RateLimitHeaders, RetryAfter};

use crate::error::{DispatchError, DispatchResult};
use crate::route::{Route, RouteKey};

/// Default account-wide requests per second.
pub const DEFAULT_GLOBAL_LIMIT: u32 = 50;

type SharedBucket = Arc<Mutex<BucketState>>;

/// Counters for one bucket. Only touched while holding its lock.
#[derive(Debug)]
struct BucketState {
    hash: Option<String>,
    remaining: u32,
    limit: u32,
    reset_at: Option<Instant>,
}

impl BucketState {
    /// A bucket whose quota is not known yet.
    fn unknown() -> Self {
        Self {
            hash: None,
            remaining: 1,
            limit: 1,
            reset_at: None,
        }
    }

    fn apply(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(limit) = headers.limit {
            self.limit = limit.max(1);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = remaining.min(self.limit);
        }
        if let Some(after) = headers.reset_after {
            self.reset_at = Some(now.checked_add(after).unwrap_or(now));
        }
    }

    /// Wait out an exhausted window and refill once the reset has passed.
    async fn ready(&mut self, cancel: &CancellationToken) -> DispatchResult<()> {
        match self.reset_at {
            Some(reset_at) => {
                if self.remaining == 0 && reset_at > Instant::now() {
                    debug!(
                        bucket = self.hash.as_deref().unwrap_or("unknown"),
                        delay_ms = clock::remaining_until(reset_at).as_millis(),
                        "bucket exhausted, waiting for reset"
                    );
                    clock::sleep_until_or_cancel(reset_at, cancel).await?;
                }
                if Instant::now() >= reset_at {
                    self.remaining = self.limit;
                    self.reset_at = None;
                }
            },
            None if self.remaining == 0 => self.remaining = self.limit,
            None => {},
        }
        Ok(())
    }
}

/// Exclusive right to send on one bucket.
///
/// Held across the whole send/retry cycle of one request. Dropping it lets
/// the next queued request on the bucket proceed.
#[derive(Debug)]
pub struct Permit {
    bucket: SharedBucket,
    guard: OwnedMutexGuard<BucketState>,
    retired: bool,
}

impl Permit {
    /// Whether the route moved off this bucket while the permit held it.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Bucket hash, once known.
    #[must_use]
    pub fn bucket_hash(&self) -> Option<&str> {
        self.guard.hash.as_deref()
    }

    /// Requests left in the current window.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.guard.remaining
    }
}

/// Point-in-time view of a route's bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    /// Bucket hash, once known.
    pub hash: Option<String>,
    /// Requests left in the current window.
    pub remaining: u32,
    /// Requests per window.
    pub limit: u32,
    /// Time until the window resets.
    pub reset_after: Option<Duration>,
}

/// Registry of buckets plus the global gate.
///
/// One instance per client. Shared behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    routes: DashMap<RouteKey, SharedBucket>,
    buckets: DashMap<(String, Option<String>), SharedBucket>,
    global: GlobalGate,
    remaps: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_GLOBAL_LIMIT)
    }
}

impl RateLimiter {
    /// A registry whose global gate admits `global_limit` requests per second.
    #[must_use]
    pub fn new(global_limit: u32) -> Self {
        Self {
            routes: DashMap::new(),
            buckets: DashMap::new(),
            global: GlobalGate::new(global_limit),
            remaps: AtomicU64::new(0),
        }
    }

    /// The account-wide gate.
    #[must_use]
    pub fn global(&self) -> &GlobalGate {
        &self.global
    }

    /// Wait until `route` may send, then take one unit of its quota.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Shutdown`] if `cancel` fires while waiting.
    pub async fn acquire(&self, route: &Route, cancel: &CancellationToken) -> DispatchResult<Permit> {
        let key = route.key();
        loop {
            let bucket = self.current(&key);
            let guard = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DispatchError::Shutdown),
                guard = Arc::clone(&bucket).lock_owned() => guard,
            };
            if !self.maps_to(&key, &bucket) {
                trace!(route = %route, "route moved while queued, requeueing on its current bucket");
                continue;
            }

            let mut permit = Permit {
                bucket,
                guard,
                retired: false,
            };
            self.take(&mut permit.guard, route, cancel).await?;
            return Ok(permit);
        }
    }

    /// Prepare a held permit for a retry. If the route moved to another
    /// bucket in the meantime the permit is released and the route's current
    /// bucket is acquired instead.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Shutdown`] if `cancel` fires while waiting.
    pub async fn reacquire(
        &self,
        mut permit: Permit,
        route: &Route,
        cancel: &CancellationToken,
    ) -> DispatchResult<Permit> {
        if permit.retired || !self.maps_to(&route.key(), &permit.bucket) {
            drop(permit);
            return self.acquire(route, cancel).await;
        }
        self.take(&mut permit.guard, route, cancel).await?;
        Ok(permit)
    }

    async fn take(
        &self,
        state: &mut BucketState,
        route: &Route,
        cancel: &CancellationToken,
    ) -> DispatchResult<()> {
        state.ready(cancel).await?;
        if !route.is_global_exempt() {
            self.global.acquire(cancel).await?;
        }
        state.remaining = state.remaining.saturating_sub(1);
        Ok(())
    }

    /// Update the permit's bucket from a response and remap the route if the
    /// server reported a different bucket hash.
    pub fn record(&self, permit: &mut Permit, route: &Route, headers: &RateLimitHeaders) {
        let now = Instant::now();
        let Some(hash) = headers.bucket.as_deref() else {
            permit.guard.apply(headers, now);
            return;
        };

        let current = permit.guard.hash.clone();
        match current.as_deref() {
            Some(current) if current == hash => permit.guard.apply(headers, now),
            None => self.adopt(permit, route, hash, headers, now),
            Some(current) => {
                info!(route = %route, from = current, to = hash, "bucket hash changed, remapping route");
                self.remap(permit, route, hash, headers, now);
            },
        }
    }

    /// First hash seen for a placeholder bucket.
    fn adopt(
        &self,
        permit: &mut Permit,
        route: &Route,
        hash: &str,
        headers: &RateLimitHeaders,
        now: Instant,
    ) {
        let id = (hash.to_owned(), route.major().map(str::to_owned));
        let existing = match self.buckets.entry(id) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&permit.bucket));
                None
            },
        };

        match existing {
            None => {
                debug!(route = %route, bucket = hash, "route bound to bucket");
                permit.guard.hash = Some(hash.to_owned());
                permit.guard.apply(headers, now);
            },
            Some(shared) => {
                debug!(route = %route, bucket = hash, "route joins shared bucket");
                permit.guard.hash = Some(hash.to_owned());
                self.hand_over(permit, route, shared, headers, now);
            },
        }
    }

    /// Hash changed for a bucket that already had one.
    fn remap(
        &self,
        permit: &mut Permit,
        route: &Route,
        hash: &str,
        headers: &RateLimitHeaders,
        now: Instant,
    ) {
        let id = (hash.to_owned(), route.major().map(str::to_owned));
        let target = Arc::clone(
            self.buckets
                .entry(id)
                .or_insert_with(|| {
                    let mut state = BucketState::unknown();
                    state.hash = Some(hash.to_owned());
                    Arc::new(Mutex::new(state))
                })
                .value(),
        );
        self.remaps.fetch_add(1, Ordering::Relaxed);
        self.hand_over(permit, route, target, headers, now);
    }

    /// Point `route` at `target`, leaving the permit's bucket to any other
    /// routes on it, and carry the fresh counters over when `target` is free.
    fn hand_over(
        &self,
        permit: &mut Permit,
        route: &Route,
        target: SharedBucket,
        headers: &RateLimitHeaders,
        now: Instant,
    ) {
        match target.try_lock() {
            Ok(mut state) => state.apply(headers, now),
            Err(_) => trace!(
                route = %route,
                bucket = headers.bucket.as_deref().unwrap_or("unknown"),
                "target bucket busy, its holder will record newer counters"
            ),
        }
        self.routes.insert(route.key(), target);
        permit.retired = true;
    }

    /// The bucket `key` uses now, creating a placeholder on first use.
    fn current(&self, key: &RouteKey) -> SharedBucket {
        Arc::clone(
            self.routes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(BucketState::unknown())))
                .value(),
        )
    }

    fn maps_to(&self, key: &RouteKey, bucket: &SharedBucket) -> bool {
        self.routes
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), bucket))
    }

    /// Current state of the bucket `route` maps to, if it has been used and
    /// is not locked by an in-flight request.
    #[must_use]
    pub fn snapshot(&self, route: &Route) -> Option<BucketSnapshot> {
        let bucket = Arc::clone(self.routes.get(&route.key())?.value());
        let state = bucket.try_lock().ok()?;
        Some(BucketSnapshot {
            hash: state.hash.clone(),
            remaining: state.remaining,
            limit: state.limit,
            reset_after: state.reset_at.map(clock::remaining_until),
        })
    }

    /// Bucket hash `route` currently maps to.
    #[must_use]
    pub fn bucket_hash(&self, route: &Route) -> Option<String> {
        self.snapshot(route).and_then(|s| s.hash)
    }

    /// Number of distinct server-side buckets seen.
    #[must_use]
    pub fn known_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Number of hash changes observed.
    #[must_use]
    pub fn remap_count(&self) -> u64 {
        self.remaps.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(hash: &str, remaining: u32, limit: u32, reset_ms: u64) -> RateLimitHeaders {
        RateLimitHeaders {
            bucket: Some(hash.to_owned()),
            limit: Some(limit),
            remaining: Some(remaining),
            reset_after: Some(Duration::from_millis(reset_ms)),
            global: false,
        }
    }

    fn route() -> Route {
        Route::post("/channels/{channel_id}/messages").param("channel_id", 1)
    }

    #[tokio::test(start_paused = true)]
    async fn new_bucket_allows_single_request() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let permit = limiter.acquire(&route(), &cancel).await.unwrap();
        assert_eq!(permit.remaining(), 0);
        assert!(permit.bucket_hash().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn record_adopts_hash_and_counters() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let route = route();

        let mut permit = limiter.acquire(&route, &cancel).await.unwrap();
        limiter.record(&mut permit, &route, &headers("A", 4, 5, 1000));
        drop(permit);

        let snapshot = limiter.snapshot(&route).unwrap();
        assert_eq!(snapshot.hash.as_deref(), Some("A"));
        assert_eq!(snapshot.remaining, 4);
        assert_eq!(snapshot.limit, 5);
        assert_eq!(limiter.known_buckets(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_reset() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let route = route();

        let mut permit = limiter.acquire(&route, &cancel).await.unwrap();
        limiter.record(&mut permit, &route, &headers("A", 0, 5, 2000));
        drop(permit);

        let start = Instant::now();
        let permit = limiter.acquire(&route, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(permit.remaining(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hash_change_remaps_route() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let route = route();

        let mut permit = limiter.acquire(&route, &cancel).await.unwrap();
        limiter.record(&mut permit, &route, &headers("A", 4, 5, 1000));
        drop(permit);

        let mut permit = limiter.acquire(&route, &cancel).await.unwrap();
        limiter.record(&mut permit, &route, &headers("B", 9, 10, 1000));
        assert!(permit.is_retired());
        drop(permit);

        assert_eq!(limiter.bucket_hash(&route).as_deref(), Some("B"));
        assert_eq!(limiter.remap_count(), 1);
        assert_eq!(limiter.known_buckets(), 2);

        let snapshot = limiter.snapshot(&route).unwrap();
        assert_eq!(snapshot.remaining, 9);
        assert_eq!(snapshot.limit, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn routes_sharing_a_hash_share_a_bucket() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let first = Route::get("/channels/{channel_id}/messages").param("channel_id", 1);
        let second = Route::get("/channels/{channel_id}/pins").param("channel_id", 1);

        let mut permit = limiter.acquire(&first, &cancel).await.unwrap();
        limiter.record(&mut permit, &first, &headers("S", 3, 5, 1000));
        drop(permit);

        let mut permit = limiter.acquire(&second, &cancel).await.unwrap();
        limiter.record(&mut permit, &second, &headers("S", 2, 5, 1000));
        assert!(permit.is_retired());
        drop(permit);

        assert_eq!(limiter.known_buckets(), 1);
        assert_eq!(limiter.snapshot(&first).unwrap().remaining, 2);
        assert_eq!(limiter.snapshot(&second).unwrap().remaining, 2);
        assert_eq!(limiter.remap_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_hash_different_major_is_separate() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let one = Route::get("/channels/{channel_id}").param("channel_id", 1);
        let two = Route::get("/channels/{channel_id}").param("channel_id", 2);

        for route in [&one, &two] {
            let mut permit = limiter.acquire(route, &cancel).await.unwrap();
            limiter.record(&mut permit, route, &headers("C", 4, 5, 1000));
        }

        assert_eq!(limiter.known_buckets(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reacquire_follows_retired_bucket() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let route = route();

        let mut permit = limiter.acquire(&route, &cancel).await.unwrap();
        limiter.record(&mut permit, &route, &headers("A", 4, 5, 1000));
        limiter.record(&mut permit, &route, &headers("B", 4, 5, 1000));
        assert!(permit.is_retired());

        let permit = limiter.reacquire(permit, &route, &cancel).await.unwrap();
        assert!(!permit.is_retired());
        assert_eq!(permit.bucket_hash(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn hash_flipping_back_returns_to_the_first_bucket() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let route = route();

        for hash in ["A", "B", "A"] {
            let mut permit = limiter.acquire(&route, &cancel).await.unwrap();
            limiter.record(&mut permit, &route, &headers(hash, 4, 5, 1000));
        }

        let permit = tokio::time::timeout(Duration::from_secs(5), limiter.acquire(&route, &cancel))
            .await
            .expect("acquire after A -> B -> A finished")
            .unwrap();
        assert_eq!(permit.bucket_hash(), Some("A"));
        assert!(!permit.is_retired());
        drop(permit);

        assert_eq!(limiter.remap_count(), 2);
        assert_eq!(limiter.known_buckets(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn remap_moves_only_the_reporting_route() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let x = Route::get("/channels/{channel_id}/messages").param("channel_id", 1);
        let y = Route::get("/channels/{channel_id}/pins").param("channel_id", 1);

        for (route, hash) in [(&x, "S"), (&y, "S"), (&x, "T")] {
            let mut permit = limiter.acquire(route, &cancel).await.unwrap();
            limiter.record(&mut permit, route, &headers(hash, 4, 5, 1000));
        }
        assert_eq!(limiter.bucket_hash(&x).as_deref(), Some("T"));
        assert_eq!(limiter.bucket_hash(&y).as_deref(), Some("S"));

        // Y keeps reporting S and never leaves it.
        let mut permit = limiter.acquire(&y, &cancel).await.unwrap();
        assert_eq!(permit.bucket_hash(), Some("S"));
        limiter.record(&mut permit, &y, &headers("S", 2, 5, 1000));
        assert!(!permit.is_retired());
        drop(permit);
        assert_eq!(limiter.remap_count(), 1);

        // X flips back onto the bucket Y is still using.
        let mut permit = limiter.acquire(&x, &cancel).await.unwrap();
        limiter.record(&mut permit, &x, &headers("S", 1, 5, 1000));
        drop(permit);

        for route in [&x, &y] {
            let permit = tokio::time::timeout(Duration::from_secs(5), limiter.acquire(route, &cancel))
                .await
                .expect("acquire on shared bucket finished")
                .unwrap();
            assert_eq!(permit.bucket_hash(), Some("S"));
        }
        assert_eq!(limiter.known_buckets(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn old_bucket_counters_are_frozen_for_other_routes() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let x = Route::get("/channels/{channel_id}/messages").param("channel_id", 1);
        let y = Route::get("/channels/{channel_id}/pins").param("channel_id", 1);

        for (route, hash, remaining) in [(&x, "S", 4), (&y, "S", 3)] {
            let mut permit = limiter.acquire(route, &cancel).await.unwrap();
            limiter.record(&mut permit, route, &headers(hash, remaining, 5, 1000));
        }

        let mut permit = limiter.acquire(&x, &cancel).await.unwrap();
        limiter.record(&mut permit, &x, &headers("T", 9, 10, 1000));
        drop(permit);

        let s = limiter.snapshot(&y).unwrap();
        assert_eq!((s.hash.as_deref(), s.remaining, s.limit), (Some("S"), 2, 5));
        let t = limiter.snapshot(&x).unwrap();
        assert_eq!((t.hash.as_deref(), t.remaining, t.limit), (Some("T"), 9, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_follows_its_route() {
        let limiter = Arc::new(RateLimiter::default());
        let cancel = CancellationToken::new();
        let route = route();

        let mut held = limiter.acquire(&route, &cancel).await.unwrap();
        limiter.record(&mut held, &route, &headers("A", 4, 5, 1000));

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            let route = route.clone();
            tokio::spawn(async move {
                let permit = limiter.acquire(&route, &cancel).await?;
                Ok::<_, DispatchError>(permit.bucket_hash().map(str::to_owned))
            })
        };
        tokio::task::yield_now().await;

        limiter.record(&mut held, &route, &headers("B", 4, 5, 1000));
        drop(held);

        let hash = waiter.await.unwrap().unwrap();
        assert_eq!(hash.as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn remap_onto_busy_bucket_keeps_holder_counters() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let x = Route::get("/channels/{channel_id}/messages").param("channel_id", 1);
        let y = Route::get("/channels/{channel_id}/pins").param("channel_id", 1);

        let mut permit = limiter.acquire(&x, &cancel).await.unwrap();
        limiter.record(&mut permit, &x, &headers("A", 4, 5, 1000));
        drop(permit);
        let mut on_s = limiter.acquire(&y, &cancel).await.unwrap();
        limiter.record(&mut on_s, &y, &headers("S", 4, 5, 1000));

        let mut permit = limiter.acquire(&x, &cancel).await.unwrap();
        limiter.record(&mut permit, &x, &headers("S", 0, 5, 1000));
        assert!(permit.is_retired());
        drop(permit);

        limiter.record(&mut on_s, &y, &headers("S", 2, 5, 1000));
        drop(on_s);

        let snapshot = limiter.snapshot(&x).unwrap();
        assert_eq!(snapshot.hash.as_deref(), Some("S"));
        assert_eq!(snapshot.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_is_cancellable() {
        let limiter = RateLimiter::default();
        let cancel = CancellationToken::new();
        let route = route();

        let _held = limiter.acquire(&route, &cancel).await.unwrap();
        cancel.cancel();
        let result = limiter.acquire(&route, &cancel).await;
        assert!(matches!(result, Err(DispatchError::Shutdown)));
    }

    #[tokio::test(start_paused = true)]
    async fn global_exempt_route_skips_gate() {
        let limiter = RateLimiter::new(1);
        let cancel = CancellationToken::new();
        let exempt = Route::post("/interactions/{interaction_id}/{interaction_token}/callback")
            .param("interaction_id", 1)
            .param("interaction_token", "t");

        let start = Instant::now();
        for _ in 0..3 {
            let permit = limiter.acquire(&exempt, &cancel).await.unwrap();
            drop(permit);
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
