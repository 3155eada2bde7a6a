//! In-memory backend for testing and local runs.
//!
//! Every client opened by a [`MemoryClientFactory`] serves the same table
//! set. The factory counts connects, pings, queries and closes, and can be
//! scripted to fail, which is how the pool's recovery paths are exercised.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::traits::{ClientFactory, FluxTable, TimeSeriesClient};

/// Label reported as the endpoint of the in-memory backend.
const MEMORY_ENDPOINT_LABEL: &str = "memory";

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    pings: AtomicU64,
    queries: AtomicU64,
    closes: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryBackend {
    tables: RwLock<Vec<FluxTable>>,
    counters: Counters,
    failing_connects: AtomicU32,
    failing_pings: AtomicU32,
    failing_closes: AtomicBool,
    scripted_query_errors: Mutex<VecDeque<ClientError>>,
    persistent_query_error: Mutex<Option<ClientError>>,
    last_query: Mutex<Option<String>>,
}

/// Consumes one pending failure from `counter`; returns whether one was pending.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryBackend {
    fn next_query_error(&self) -> Option<ClientError> {
        if let Some(err) = self.scripted_query_errors.lock().pop_front() {
            return Some(err);
        }
        self.persistent_query_error.lock().clone()
    }
}

/// Factory for in-memory clients.
///
/// Cloning is cheap; clones share tables, counters and scripted failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryClientFactory {
    backend: Arc<MemoryBackend>,
}

impl MemoryClientFactory {
    /// Creates a factory serving no data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory serving `tables`.
    pub fn with_tables(tables: Vec<FluxTable>) -> Self {
        let factory = Self::new();
        factory.set_tables(tables);
        factory
    }

    /// Replaces the table set served by every client.
    pub fn set_tables(&self, tables: Vec<FluxTable>) {
        *self.backend.tables.write() = tables;
    }

    /// Makes the next `n` connects fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.backend.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` pings report a dead session.
    pub fn fail_next_pings(&self, n: u32) {
        self.backend.failing_pings.store(n, Ordering::SeqCst);
    }

    /// Makes every close fail.
    pub fn fail_closes(&self, fail: bool) {
        self.backend.failing_closes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `n` queries fail with `error`.
    pub fn fail_next_queries(&self, n: u32, error: ClientError) {
        let mut scripted = self.backend.scripted_query_errors.lock();
        scripted.extend(std::iter::repeat(error).take(n as usize));
    }

    /// Makes every query fail with `error` until [`Self::clear_failures`].
    pub fn fail_all_queries(&self, error: ClientError) {
        *self.backend.persistent_query_error.lock() = Some(error);
    }

    /// Drops all scripted failures.
    pub fn clear_failures(&self) {
        self.backend.failing_connects.store(0, Ordering::SeqCst);
        self.backend.failing_pings.store(0, Ordering::SeqCst);
        self.backend.failing_closes.store(false, Ordering::SeqCst);
        self.backend.scripted_query_errors.lock().clear();
        *self.backend.persistent_query_error.lock() = None;
    }

    pub fn connects(&self) -> u64 {
        self.backend.counters.connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u64 {
        self.backend.counters.pings.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> u64 {
        self.backend.counters.queries.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.backend.counters.closes.load(Ordering::SeqCst)
    }

    /// The text of the most recent query, if any.
    pub fn last_query(&self) -> Option<String> {
        self.backend.last_query.lock().clone()
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn connect(&self) -> ClientResult<Arc<dyn TimeSeriesClient>> {
        if take_one(&self.backend.failing_connects) {
            return Err(ClientError::backend("connection refused by memory backend"));
        }
        let id = self.backend.counters.connects.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(client_id = id, "opened in-memory client");
        Ok(Arc::new(MemoryClient {
            id,
            backend: Arc::clone(&self.backend),
            closed: AtomicBool::new(false),
        }))
    }

    fn endpoint_label(&self) -> String {
        MEMORY_ENDPOINT_LABEL.to_string()
    }
}

/// A session with the in-memory backend.
#[derive(Debug)]
pub struct MemoryClient {
    id: u64,
    backend: Arc<MemoryBackend>,
    closed: AtomicBool,
}

impl MemoryClient {
    /// Sequence number of this client among all clients of its factory.
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl TimeSeriesClient for MemoryClient {
    async fn ping(&self) -> bool {
        self.backend.counters.pings.fetch_add(1, Ordering::SeqCst);
        !self.closed.load(Ordering::SeqCst) && !take_one(&self.backend.failing_pings)
    }

    async fn query(&self, query: &str) -> ClientResult<Vec<FluxTable>> {
        self.backend.counters.queries.fetch_add(1, Ordering::SeqCst);
        *self.backend.last_query.lock() = Some(query.to_string());

        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::unexpected("client is closed"));
        }
        if let Some(err) = self.backend.next_query_error() {
            return Err(err);
        }
        Ok(self.backend.tables.read().clone())
    }

    async fn close(&self) -> ClientResult<()> {
        self.backend.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.backend.failing_closes.load(Ordering::SeqCst) {
            return Err(ClientError::backend("close failed"));
        }
        Ok(())
    }
}
