//! Bounded connection pool with health-checked checkout and query retry.
//!
//! All pool state (idle queue, checked-out set, lifecycle phase) lives in
//! one [`PoolState`] behind a single mutex, so a handle is never observed
//! both idle and checked out. The lock only guards bookkeeping; pings,
//! queries, connects and closes always run after it is released.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Ready`, and back to
//! `Uninitialized` on [`ConnectionPool::shutdown`]. Initialization runs on
//! first use through [`ConnectionPool::ensure_ready`]; concurrent callers are
//! serialized and late arrivals find the pool ready.

use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ClientError, ClientResult, StorageError, StorageResult};
use crate::traits::{ClientFactory, DataPoint, TimeSeriesClient};

/// Default number of pooled connections.
pub const DEFAULT_CAPACITY: usize = 5;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default bound on waiting for an idle connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default base of the linear retry backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Pool sizing and retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of connections kept idle at most.
    pub capacity: usize,
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// How long `acquire` waits for an idle connection before opening an
    /// overflow connection.
    pub acquire_timeout: Duration,
    /// Base of the retry backoff, see [`retry_delay`].
    pub retry_base_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        }
    }
}

/// Backoff before retry number `attempt` (1-based): `base × attempt`.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolPhase {
    Uninitialized,
    Initializing,
    Ready,
}

struct PoolState {
    phase: PoolPhase,
    idle: VecDeque<Arc<dyn TimeSeriesClient>>,
    checked_out: HashMap<u64, Arc<dyn TimeSeriesClient>>,
    /// Handle ids are never reused, even across shutdowns.
    next_id: u64,
}

impl PoolState {
    /// Publishes the `fluxgate_pool_connections` gauges.
    fn publish_gauges(&self, capacity: usize) {
        metrics::gauge!("fluxgate_pool_connections", "state" => "idle")
            .set(self.idle.len() as f64);
        metrics::gauge!("fluxgate_pool_connections", "state" => "checked_out")
            .set(self.checked_out.len() as f64);
        metrics::gauge!("fluxgate_pool_connections", "state" => "capacity")
            .set(capacity as f64);
    }
}

/// Snapshot of the pool for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub idle_count: usize,
    pub checked_out_count: usize,
    pub ready: bool,
    pub endpoint_label: String,
}

struct Shared {
    config: PoolConfig,
    factory: Arc<dyn ClientFactory>,
    state: Mutex<PoolState>,
    /// Serializes initialization and shutdown.
    lifecycle: tokio::sync::Mutex<()>,
    /// Signalled whenever a connection goes back to the idle queue.
    returned: Notify,
}

impl Shared {
    /// Bookkeeping half of a release.
    ///
    /// Returns the client when it has to be closed by the caller. A handle
    /// missing from the checked-out set was already closed by `shutdown`.
    fn check_in(&self, id: u64, client: Arc<dyn TimeSeriesClient>) -> Option<Arc<dyn TimeSeriesClient>> {
        let mut state = self.state.lock();
        if state.checked_out.remove(&id).is_none() {
            debug!(handle = id, "released handle no longer tracked");
            return None;
        }
        if state.phase == PoolPhase::Ready && state.idle.len() < self.config.capacity {
            state.idle.push_back(client);
            state.publish_gauges(self.config.capacity);
            drop(state);
            self.returned.notify_one();
            None
        } else {
            state.publish_gauges(self.config.capacity);
            Some(client)
        }
    }
}

async fn close_logged(client: Arc<dyn TimeSeriesClient>) {
    if let Err(err) = client.close().await {
        warn!(error = %err, "failed to close connection");
    }
}

/// A checked-out connection.
///
/// Give it back with [`PooledConnection::release`]. A guard dropped without
/// release (early return, panic, cancelled caller) is checked in
/// synchronously and, if surplus, closed on a spawned task.
pub struct PooledConnection {
    id: u64,
    client: Arc<dyn TimeSeriesClient>,
    shared: Arc<Shared>,
    released: bool,
}

impl PooledConnection {
    /// Pool-unique id of this checkout.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the connection to the pool, or closes it if the pool is full.
    ///
    /// Never fails; close errors are logged.
    pub async fn release(mut self) {
        self.released = true;
        if let Some(surplus) = self.shared.check_in(self.id, Arc::clone(&self.client)) {
            debug!(handle = self.id, "pool full, closing surplus connection");
            close_logged(surplus).await;
        }
    }
}

impl Deref for PooledConnection {
    type Target = dyn TimeSeriesClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(surplus) = self.shared.check_in(self.id, Arc::clone(&self.client)) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(close_logged(surplus));
                }
                Err(_) => warn!(handle = self.id, "no runtime to close surplus connection"),
            }
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Bounded pool of backend clients.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// Creates an uninitialized pool. No connection is opened until first use.
    pub fn new(config: PoolConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                state: Mutex::new(PoolState {
                    phase: PoolPhase::Uninitialized,
                    idle: VecDeque::new(),
                    checked_out: HashMap::new(),
                    next_id: 1,
                }),
                lifecycle: tokio::sync::Mutex::new(()),
                returned: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    fn is_ready(&self) -> bool {
        self.shared.state.lock().phase == PoolPhase::Ready
    }

    /// Initializes the pool if it is not ready yet. Idempotent.
    ///
    /// Opens `capacity` connections, pinging each. Failed connects and dead
    /// connections are logged and skipped; the pool may come up with fewer
    /// members than its capacity.
    pub async fn ensure_ready(&self) {
        if self.is_ready() {
            return;
        }

        let _lifecycle = self.shared.lifecycle.lock().await;
        if self.is_ready() {
            return;
        }
        self.shared.state.lock().phase = PoolPhase::Initializing;

        let capacity = self.shared.config.capacity;
        let mut opened = Vec::with_capacity(capacity);
        for slot in 0..capacity {
            match self.open_verified().await {
                Ok(client) => opened.push(client),
                Err(err) => warn!(slot, error = %err, "failed to open pooled connection, skipping"),
            }
        }

        let opened_count = opened.len();
        {
            let mut state = self.shared.state.lock();
            state.idle.extend(opened);
            state.phase = PoolPhase::Ready;
            state.publish_gauges(capacity);
        }
        self.shared.returned.notify_waiters();

        if opened_count < capacity {
            warn!(
                opened = opened_count,
                capacity,
                endpoint = %self.shared.factory.endpoint_label(),
                "connection pool initialized with degraded capacity"
            );
        } else {
            info!(
                opened = opened_count,
                endpoint = %self.shared.factory.endpoint_label(),
                "connection pool initialized"
            );
        }
    }

    /// Connects and pings; a dead connection is closed and reported as an error.
    async fn open_verified(&self) -> ClientResult<Arc<dyn TimeSeriesClient>> {
        let client = self.shared.factory.connect().await?;
        if client.ping().await {
            Ok(client)
        } else {
            close_logged(client).await;
            Err(ClientError::backend("connection ping failed"))
        }
    }

    /// Waits up to `timeout` for an idle connection.
    async fn take_idle(&self, timeout: Duration) -> Option<Arc<dyn TimeSeriesClient>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let returned = self.shared.returned.notified();
            tokio::pin!(returned);
            returned.as_mut().enable();

            let candidate = {
                let mut state = self.shared.state.lock();
                let candidate = state.idle.pop_front();
                if candidate.is_some() {
                    state.publish_gauges(self.shared.config.capacity);
                }
                candidate
            };
            if candidate.is_some() {
                return candidate;
            }
            if tokio::time::timeout_at(deadline, returned).await.is_err() {
                return None;
            }
        }
    }

    async fn acquire_client(&self) -> ClientResult<PooledConnection> {
        self.ensure_ready().await;

        let candidate = match self.take_idle(self.shared.config.acquire_timeout).await {
            Some(client) => client,
            None => {
                warn!(
                    timeout_ms = self.shared.config.acquire_timeout.as_millis() as u64,
                    "connection pool exhausted, opening overflow connection"
                );
                metrics::counter!("fluxgate_pool_overflow_connections_total").increment(1);
                self.shared.factory.connect().await?
            }
        };

        let client = if candidate.ping().await {
            candidate
        } else {
            warn!("connection failed liveness check, replacing it");
            metrics::counter!("fluxgate_pool_replaced_connections_total").increment(1);
            close_logged(candidate).await;
            self.shared.factory.connect().await?
        };

        let id = {
            let mut state = self.shared.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.checked_out.insert(id, Arc::clone(&client));
            state.publish_gauges(self.shared.config.capacity);
            id
        };

        Ok(PooledConnection {
            id,
            client,
            shared: Arc::clone(&self.shared),
            released: false,
        })
    }

    /// Checks out a live connection, initializing the pool on first use.
    ///
    /// Waits at most `acquire_timeout` for an idle connection, then opens an
    /// overflow connection instead of blocking further.
    pub async fn acquire(&self) -> StorageResult<PooledConnection> {
        self.acquire_client()
            .await
            .map_err(|err| StorageError::ConnectionError {
                message: err.to_string(),
            })
    }

    async fn query_once(&self, query: &str) -> ClientResult<Vec<DataPoint>> {
        let connection = self.acquire_client().await?;
        let result = connection.query(query).await;
        connection.release().await;

        let tables = result?;
        Ok(tables
            .iter()
            .flat_map(|table| table.records.iter())
            .map(DataPoint::from)
            .collect())
    }

    /// Runs `query`, retrying transient backend errors.
    ///
    /// Makes at most `max_retries + 1` attempts, sleeping
    /// [`retry_delay`]`(base, attempt)` between them. Non-retryable backend
    /// errors stop the loop early; unexpected local errors are never retried.
    #[instrument(skip(self, query))]
    pub async fn execute_query(&self, query: &str) -> StorageResult<Vec<DataPoint>> {
        let max_attempts = self.shared.config.max_retries.saturating_add(1);
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.query_once(query).await {
                Ok(points) => {
                    metrics::histogram!("fluxgate_query_duration_seconds", "outcome" => "success")
                        .record(started.elapsed().as_secs_f64());
                    debug!(attempt, records = points.len(), "query succeeded");
                    return Ok(points);
                }
                Err(ClientError::Unexpected { message }) => {
                    metrics::counter!("fluxgate_query_failures_total", "kind" => "unexpected")
                        .increment(1);
                    error!(attempt, error = %message, "unexpected error while executing query");
                    return Err(StorageError::Unexpected { message });
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = retry_delay(self.shared.config.retry_base_delay, attempt);
                    metrics::counter!("fluxgate_query_retries_total").increment(1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient query failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    metrics::counter!("fluxgate_query_failures_total", "kind" => "backend")
                        .increment(1);
                    metrics::histogram!("fluxgate_query_duration_seconds", "outcome" => "failure")
                        .record(started.elapsed().as_secs_f64());
                    error!(attempt, error = %err, "query failed");
                    return Err(StorageError::QueryFailed {
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Closes every connection and resets the pool to uninitialized.
    ///
    /// Close failures are logged and skipped. Guards still held by callers
    /// become detached: their later release is a no-op.
    pub async fn shutdown(&self) {
        let _lifecycle = self.shared.lifecycle.lock().await;

        let (idle, checked_out): (Vec<_>, Vec<_>) = {
            let mut state = self.shared.state.lock();
            state.phase = PoolPhase::Uninitialized;
            let drained = (
                state.idle.drain(..).collect(),
                state.checked_out.drain().map(|(_, client)| client).collect(),
            );
            state.publish_gauges(self.shared.config.capacity);
            drained
        };

        let closed = idle.len() + checked_out.len();
        for client in idle.into_iter().chain(checked_out) {
            close_logged(client).await;
        }
        info!(closed, "connection pool shut down");
    }

    /// Snapshot of the pool, taken under the pool lock.
    ///
    /// The `fluxgate_pool_connections` gauges are kept current by every
    /// checkout, check-in, initialization and shutdown.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            capacity: self.shared.config.capacity,
            idle_count: state.idle.len(),
            checked_out_count: state.checked_out.len(),
            ready: state.phase == PoolPhase::Ready,
            endpoint_label: self.shared.factory.endpoint_label(),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.shared.config)
            .field("endpoint", &self.shared.factory.endpoint_label())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClientFactory;
    use crate::traits::{FluxRecord, FluxTable};
    use chrono::{TimeZone, Utc};
    use metrics_exporter_prometheus::PrometheusBuilder;

    fn test_config(capacity: usize) -> PoolConfig {
        PoolConfig {
            capacity,
            max_retries: 3,
            acquire_timeout: Duration::from_millis(200),
            retry_base_delay: Duration::from_millis(10),
        }
    }

    fn make_pool(config: PoolConfig) -> (ConnectionPool, MemoryClientFactory) {
        let factory = MemoryClientFactory::new();
        let pool = ConnectionPool::new(config, Arc::new(factory.clone()));
        (pool, factory)
    }

    #[test]
    fn test_retry_delay_is_linear_in_attempt() {
        let base = Duration::from_millis(500);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(1000));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(1500));
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_base_delay, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_pool_is_lazy_until_first_use() {
        let (pool, factory) = make_pool(test_config(3));

        let status = pool.status();
        assert!(!status.ready);
        assert_eq!(status.idle_count, 0);
        assert_eq!(factory.connects(), 0);

        pool.ensure_ready().await;
        let status = pool.status();
        assert!(status.ready);
        assert_eq!(status.idle_count, 3);
        assert_eq!(factory.connects(), 3);
    }

    #[tokio::test]
    async fn test_ensure_ready_is_idempotent() {
        let (pool, factory) = make_pool(test_config(2));

        pool.ensure_ready().await;
        pool.ensure_ready().await;
        assert_eq!(factory.connects(), 2);
        assert_eq!(pool.status().idle_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_ready_initializes_once() {
        let (pool, factory) = make_pool(test_config(4));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.ensure_ready().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(factory.connects(), 4);
        assert_eq!(pool.status().idle_count, 4);
    }

    #[tokio::test]
    async fn test_initialization_skips_failed_connects() {
        let (pool, factory) = make_pool(test_config(4));
        factory.fail_next_connects(2);

        pool.ensure_ready().await;
        let status = pool.status();
        assert!(status.ready);
        assert_eq!(status.idle_count, 2);
    }

    #[tokio::test]
    async fn test_initialization_skips_dead_connections() {
        let (pool, factory) = make_pool(test_config(3));
        factory.fail_next_pings(1);

        pool.ensure_ready().await;
        assert_eq!(pool.status().idle_count, 2);
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn test_acquire_and_release_moves_handle_between_sets() {
        let (pool, _factory) = make_pool(test_config(2));

        let connection = pool.acquire().await.unwrap();
        let status = pool.status();
        assert_eq!(status.idle_count, 1);
        assert_eq!(status.checked_out_count, 1);

        connection.release().await;
        let status = pool.status();
        assert_eq!(status.idle_count, 2);
        assert_eq!(status.checked_out_count, 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_is_checked_in() {
        let (pool, _factory) = make_pool(test_config(2));

        {
            let _connection = pool.acquire().await.unwrap();
            assert_eq!(pool.status().checked_out_count, 1);
        }

        let status = pool.status();
        assert_eq!(status.idle_count, 2);
        assert_eq!(status.checked_out_count, 0);
    }

    #[tokio::test]
    async fn test_acquire_replaces_dead_connection() {
        let (pool, factory) = make_pool(test_config(1));
        pool.ensure_ready().await;
        factory.fail_next_pings(1);

        let connection = pool.acquire().await.unwrap();
        assert!(connection.ping().await);
        assert_eq!(factory.connects(), 2);
        assert_eq!(factory.closes(), 1);
        connection.release().await;
        assert_eq!(pool.status().idle_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_opens_overflow_connection() {
        let (pool, factory) = make_pool(test_config(1));

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!(factory.connects(), 2);
        assert_eq!(pool.status().checked_out_count, 2);

        first.release().await;
        second.release().await;

        let status = pool.status();
        assert_eq!(status.idle_count, 1);
        assert_eq!(status.checked_out_count, 0);
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test]
    async fn test_waiting_acquire_gets_returned_connection() {
        let config = PoolConfig {
            acquire_timeout: Duration::from_secs(5),
            ..test_config(1)
        };
        let (pool, factory) = make_pool(config);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release().await;

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_execute_query_normalizes_records_in_order() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let t3 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let (pool, factory) = make_pool(test_config(1));
        factory.set_tables(vec![
            FluxTable::new(vec![FluxRecord::new(t1, 1), FluxRecord::new(t2, 2)]),
            FluxTable::new(vec![FluxRecord::new(t3, "on")]),
        ]);

        let points = pool.execute_query("q").await.unwrap();
        let values: Vec<_> = points.iter().map(|p| p.value.clone()).collect();
        assert_eq!(
            values,
            vec![serde_json::json!(1), serde_json::json!(2), serde_json::json!("on")]
        );
        assert_eq!(points[0].time, "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_query_retries_transient_failures() {
        let (pool, factory) = make_pool(test_config(1));
        factory.fail_next_queries(3, ClientError::backend("connection reset"));

        let points = pool.execute_query("q").await.unwrap();
        assert!(points.is_empty());
        assert_eq!(factory.queries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_query_gives_up_after_max_attempts() {
        let (pool, factory) = make_pool(test_config(1));
        factory.fail_all_queries(ClientError::backend("HTTP 503: unavailable"));

        let err = pool.execute_query("q").await.unwrap_err();
        assert!(matches!(err, StorageError::QueryFailed { attempts: 4, .. }));
        assert_eq!(factory.queries(), 4);
        assert_eq!(pool.status().checked_out_count, 0);
    }

    #[tokio::test]
    async fn test_execute_query_does_not_retry_permanent_failures() {
        let (pool, factory) = make_pool(test_config(1));
        factory.fail_all_queries(ClientError::backend("HTTP 400: syntax error"));

        let err = pool.execute_query("q").await.unwrap_err();
        assert!(matches!(err, StorageError::QueryFailed { attempts: 1, .. }));
        assert_eq!(factory.queries(), 1);
    }

    #[tokio::test]
    async fn test_execute_query_fails_fast_on_unexpected_errors() {
        let (pool, factory) = make_pool(test_config(1));
        factory.fail_all_queries(ClientError::unexpected("timeout while decoding"));

        let err = pool.execute_query("q").await.unwrap_err();
        assert!(matches!(err, StorageError::Unexpected { .. }));
        assert_eq!(factory.queries(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything_and_resets() {
        let (pool, factory) = make_pool(test_config(3));
        let held = pool.acquire().await.unwrap();

        pool.shutdown().await;
        assert_eq!(factory.closes(), 3);
        let status = pool.status();
        assert!(!status.ready);
        assert_eq!(status.idle_count, 0);
        assert_eq!(status.checked_out_count, 0);

        // Detached guard: release is a no-op.
        held.release().await;
        assert_eq!(pool.status().idle_count, 0);
        assert_eq!(factory.closes(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_tolerates_close_failures() {
        let (pool, factory) = make_pool(test_config(3));
        pool.ensure_ready().await;
        factory.fail_closes(true);

        pool.shutdown().await;
        assert_eq!(factory.closes(), 3);
        assert!(!pool.status().ready);
    }

    #[tokio::test]
    async fn test_pool_reinitializes_after_shutdown() {
        let (pool, factory) = make_pool(test_config(2));
        pool.ensure_ready().await;
        pool.shutdown().await;

        let connection = pool.acquire().await.unwrap();
        connection.release().await;
        assert!(pool.status().ready);
        assert_eq!(pool.status().idle_count, 2);
        assert_eq!(factory.connects(), 4);
    }

    fn gauge_value(rendered: &str, state: &str) -> Option<f64> {
        let prefix = format!("fluxgate_pool_connections{{state=\"{state}\"}} ");
        rendered
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .and_then(|value| value.trim().parse().ok())
    }

    #[test]
    fn test_pool_gauges_follow_checkout_and_shutdown() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (pool, _factory) = make_pool(test_config(3));

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let connection = pool.acquire().await.unwrap();
                let rendered = handle.render();
                assert_eq!(gauge_value(&rendered, "idle"), Some(2.0));
                assert_eq!(gauge_value(&rendered, "checked_out"), Some(1.0));
                assert_eq!(gauge_value(&rendered, "capacity"), Some(3.0));

                connection.release().await;
                let rendered = handle.render();
                assert_eq!(gauge_value(&rendered, "idle"), Some(3.0));
                assert_eq!(gauge_value(&rendered, "checked_out"), Some(0.0));

                pool.shutdown().await;
                assert_eq!(gauge_value(&handle.render(), "idle"), Some(0.0));
            });
        });
    }

    #[test]
    fn test_status_reports_endpoint_label() {
        let (pool, _factory) = make_pool(test_config(2));
        let status = pool.status();
        assert_eq!(status.capacity, 2);
        assert_eq!(status.endpoint_label, "memory");
    }
}
