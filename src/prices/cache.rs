use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::debug;

use super::{Clock, PriceProvider};
use crate::domain::Price;
use crate::error::ControlResult;

pub const CURRENT_PRICE_TTL_SECONDS: i64 = 5 * 60;
pub const FUTURE_PRICES_TTL_SECONDS: i64 = 15 * 60;

type SharedFetch<V> = Shared<BoxFuture<'static, ControlResult<V>>>;

enum Slot<V> {
    Ready { value: V, fetched_at: DateTime<Utc> },
    InFlight(SharedFetch<V>),
}

/// Keyed TTL cache where concurrent misses for one key share a single fetch.
///
/// Failed fetches are not cached; the next caller fetches again.
pub struct TtlCache<K, V> {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> ControlResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ControlResult<V>> + Send + 'static,
    {
        let shared = {
            let now = self.clock.now();
            let mut slots = self.slots.lock();
            let in_flight = match slots.get(&key) {
                Some(Slot::Ready { value, fetched_at }) if now - *fetched_at < self.ttl => {
                    return Ok(value.clone());
                }
                Some(Slot::InFlight(fut)) => Some(fut.clone()),
                _ => None,
            };
            match in_flight {
                Some(fut) => fut,
                None => {
                    let fut = fetch().boxed().shared();
                    slots.insert(key.clone(), Slot::InFlight(fut.clone()));
                    fut
                }
            }
        };

        let result = shared.clone().await;

        // Whoever finishes first settles the slot; later awaiters find it
        // already replaced and leave it alone.
        let mut slots = self.slots.lock();
        if let Some(Slot::InFlight(current)) = slots.get(&key) {
            if current.ptr_eq(&shared) {
                match &result {
                    Ok(value) => {
                        slots.insert(
                            key,
                            Slot::Ready {
                                value: value.clone(),
                                fetched_at: self.clock.now(),
                            },
                        );
                    }
                    Err(_) => {
                        slots.remove(&key);
                    }
                }
            }
        }
        result
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.lock().remove(key);
    }
}

/// Shared price cache, keyed by provider.
pub struct PriceCache {
    current: TtlCache<String, Price>,
    future: TtlCache<String, Vec<Price>>,
}

impl PriceCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttls(
            clock,
            Duration::seconds(CURRENT_PRICE_TTL_SECONDS),
            Duration::seconds(FUTURE_PRICES_TTL_SECONDS),
        )
    }

    pub fn with_ttls(clock: Arc<dyn Clock>, current_ttl: Duration, future_ttl: Duration) -> Self {
        Self {
            current: TtlCache::new(clock.clone(), current_ttl),
            future: TtlCache::new(clock, future_ttl),
        }
    }
}

/// Provider wrapper that routes reads through a shared [`PriceCache`].
#[derive(Clone)]
pub struct CachedPriceProvider {
    key: String,
    inner: Arc<dyn PriceProvider>,
    cache: Arc<PriceCache>,
}

impl CachedPriceProvider {
    pub fn new(key: impl Into<String>, inner: Arc<dyn PriceProvider>, cache: Arc<PriceCache>) -> Self {
        Self {
            key: key.into(),
            inner,
            cache,
        }
    }
}

#[async_trait]
impl PriceProvider for CachedPriceProvider {
    async fn current_price(&self) -> ControlResult<Price> {
        let inner = self.inner.clone();
        let key = self.key.clone();
        self.cache
            .current
            .get_or_fetch(self.key.clone(), move || async move {
                debug!(provider = %key, "fetching current price");
                inner.current_price().await
            })
            .await
    }

    async fn future_prices(&self) -> ControlResult<Vec<Price>> {
        let inner = self.inner.clone();
        let key = self.key.clone();
        self.cache
            .future
            .get_or_fetch(self.key.clone(), move || async move {
                debug!(provider = %key, "fetching future prices");
                inner.future_prices().await
            })
            .await
    }

    async fn confirmed_prices(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ControlResult<Vec<Price>> {
        self.inner.confirmed_prices(start, end).await
    }
}
