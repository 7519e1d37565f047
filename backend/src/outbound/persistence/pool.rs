//! Fixed-size, self-expiring connection pool.
//!
//! The pool owns a fixed number of slots. A slot opens its connection lazily
//! on first use, keeps it open after release, and closes it once it has sat
//! idle longer than the idle timeout. A background sweep task enforces the
//! timeout.
//!
//! # Design
//!
//! - Admission is a FIFO `tokio` semaphore with one permit per slot, so a
//!   release wakes the longest waiter at once and nobody polls.
//! - Slot selection happens under a `std::sync::Mutex`; the lock is never
//!   held across an `.await`.
//! - [`PooledConnection`] is an RAII guard: dropping it releases the slot on
//!   success, error and cancellation alike.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use diesel_async::scoped_futures::ScopedBoxFuture;
use diesel_async::{AnsiTransactionManager, AsyncConnection, AsyncPgConnection, TransactionManager};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No slot became free within the acquire timeout.
    #[error("timed out after {waited_ms} ms waiting for a pooled connection")]
    Timeout {
        /// Milliseconds spent waiting before giving up.
        waited_ms: u64,
    },

    /// A slot's connection could not be opened.
    #[error("failed to open pooled connection: {message}")]
    Connect {
        /// Description of the underlying connection failure.
        message: String,
    },

    /// The pool has been closed.
    #[error("connection pool is closed")]
    Closed,
}

impl PoolError {
    /// Create a connect error with the given message.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }
}

/// Opens connections for pool slots.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type handed out by the pool.
    type Connection: Send + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Whether a released connection may be handed out again.
    fn is_reusable(&self, _connection: &mut Self::Connection) -> bool {
        true
    }
}

/// Configuration for the connection pool.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use watchlist_backend::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::default()
///     .with_size(5)
///     .with_idle_timeout(Duration::from_secs(10));
/// assert_eq!(config.size(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    size: usize,
    idle_timeout: Duration,
    sweep_interval: Duration,
    acquire_timeout: Duration,
}

impl Default for PoolConfig {
    /// Three slots, 2 s idle timeout, 20 ms sweep, 360 s acquire timeout.
    fn default() -> Self {
        Self {
            size: 3,
            idle_timeout: Duration::from_millis(2000),
            sweep_interval: Duration::from_millis(20),
            acquire_timeout: Duration::from_secs(360),
        }
    }
}

impl PoolConfig {
    /// Set the number of slots; raised to one when zero.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.max(1);
        self
    }

    /// Set how long a released connection may stay idle before closing.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the period of the idle sweep.
    #[must_use]
    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval.max(Duration::from_millis(1));
        self
    }

    /// Set how long `acquire` waits for a free slot.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Number of slots.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Point-in-time slot usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Slots currently lent out.
    pub in_use: usize,
    /// Slots holding an open connection, lent out or idle.
    pub open: usize,
}

struct Slot<C> {
    in_use: bool,
    released_at: Instant,
    handle: Option<C>,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    slots: Mutex<Vec<Slot<F::Connection>>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
    closed: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn lock_slots(&self) -> MutexGuard<'_, Vec<Slot<F::Connection>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim_free_slot(&self) -> Option<(usize, Option<F::Connection>)> {
        let mut slots = self.lock_slots();
        let (index, slot) = slots.iter_mut().enumerate().find(|(_, slot)| !slot.in_use)?;
        slot.in_use = true;
        Some((index, slot.handle.take()))
    }

    fn evict_idle(&self) {
        let now = Instant::now();
        let evicted: Vec<(usize, F::Connection)> = {
            let mut slots = self.lock_slots();
            slots
                .iter_mut()
                .enumerate()
                .filter(|(_, slot)| {
                    !slot.in_use
                        && slot.handle.is_some()
                        && now.duration_since(slot.released_at) >= self.config.idle_timeout
                })
                .filter_map(|(index, slot)| slot.handle.take().map(|handle| (index, handle)))
                .collect()
        };
        for (index, handle) in evicted {
            drop(handle);
            debug!(slot = index, "idle pooled connection closed");
        }
    }
}

/// Async connection pool with idle expiry.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Build a pool and start its idle sweep. Must be called inside a tokio
    /// runtime. No connection is opened until the first `acquire`.
    #[must_use]
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let now = Instant::now();
        let slots = (0..config.size)
            .map(|_| Slot {
                in_use: false,
                released_at: now,
                handle: None,
            })
            .collect();
        let inner = Arc::new(PoolInner {
            factory,
            slots: Mutex::new(slots),
            permits: Arc::new(Semaphore::new(config.size)),
            config,
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        });

        let sweeper = tokio::spawn(sweep(Arc::downgrade(&inner), config.sweep_interval));
        *inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sweeper);
        Self { inner }
    }

    /// Wait for a free slot and return its connection, opening one if the
    /// slot has none.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Timeout`] when no slot frees up within the acquire
    ///   timeout.
    /// - [`PoolError::Connect`] when opening the connection fails; the slot is
    ///   released again.
    /// - [`PoolError::Closed`] after [`ConnectionPool::close_all`].
    pub async fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        let acquire_timeout = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(
            acquire_timeout,
            self.inner.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Timeout {
                    waited_ms: u64::try_from(acquire_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        // One permit per slot, so a permit holder always finds a free slot.
        let Some((index, handle)) = self.inner.claim_free_slot() else {
            warn!("pool permit granted without a free slot");
            return Err(PoolError::Closed);
        };
        let claim = SlotClaim {
            pool: &self.inner,
            index,
            settled: false,
        };
        let connection = match handle {
            Some(idle) => idle,
            None => {
                let opened = self.inner.factory.connect().await?;
                debug!(slot = index, "pooled connection opened");
                opened
            }
        };
        Ok(claim.lend(connection, permit))
    }

    /// Run `work` on a pooled connection and release it afterwards, whatever
    /// the outcome.
    ///
    /// # Errors
    ///
    /// Returns acquisition failures converted into `E`, or the error of
    /// `work`.
    pub async fn use_connection<'a, R, E, W>(&self, work: W) -> Result<R, E>
    where
        W: for<'r> FnOnce(&'r mut F::Connection) -> ScopedBoxFuture<'a, 'r, Result<R, E>>
            + Send
            + 'a,
        E: From<PoolError> + Send + 'a,
        R: Send + 'a,
    {
        let mut connection = self.acquire().await?;
        work(&mut *connection).await
    }

    /// Stop the sweep, close every idle connection and refuse new
    /// acquisitions. Connections still lent out close when released.
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        if let Some(sweeper) = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
        let idle: Vec<F::Connection> = self
            .inner
            .lock_slots()
            .iter_mut()
            .filter(|slot| !slot.in_use)
            .filter_map(|slot| slot.handle.take())
            .collect();
        debug!(closed = idle.len(), "connection pool closed");
    }

    /// Current slot usage.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.lock_slots();
        PoolStats {
            in_use: slots.iter().filter(|slot| slot.in_use).count(),
            // Lent-out handles live in their guard, not the slot.
            open: slots
                .iter()
                .filter(|slot| slot.in_use || slot.handle.is_some())
                .count(),
        }
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }
}

async fn sweep<F: ConnectionFactory>(pool: Weak<PoolInner<F>>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            return;
        };
        inner.evict_idle();
    }
}

/// A slot marked in use whose connection is not lent out yet. Dropping it
/// unsettled frees the slot empty, so a failed connect never strands it.
struct SlotClaim<'p, F: ConnectionFactory> {
    pool: &'p Arc<PoolInner<F>>,
    index: usize,
    settled: bool,
}

impl<F: ConnectionFactory> SlotClaim<'_, F> {
    fn lend(
        mut self,
        connection: F::Connection,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<F> {
        self.settled = true;
        PooledConnection {
            pool: self.pool.clone(),
            index: self.index,
            handle: Some(connection),
            _permit: permit,
        }
    }
}

impl<F: ConnectionFactory> Drop for SlotClaim<'_, F> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(slot) = self.pool.lock_slots().get_mut(self.index) {
            slot.in_use = false;
            slot.released_at = Instant::now();
        }
    }
}

/// A connection lent out by [`ConnectionPool`]; returns to its slot on drop.
///
/// The handle is present from [`ConnectionPool::acquire`] until the guard's
/// own `Drop` moves it back into the slot, so dereferencing never observes
/// the empty state.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Arc<PoolInner<F>>,
    index: usize,
    handle: Option<F::Connection>,
    _permit: OwnedSemaphorePermit,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Index of the slot this connection belongs to.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.index
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    /// # Panics
    ///
    /// Only if called from inside the guard's own `Drop`, which no caller
    /// can reach.
    fn deref(&self) -> &Self::Target {
        match self.handle.as_ref() {
            Some(handle) => handle,
            None => panic!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    /// # Panics
    ///
    /// Only if called from inside the guard's own `Drop`, which no caller
    /// can reach.
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.handle.as_mut() {
            Some(handle) => handle,
            None => panic!("pooled connection used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let mut handle = self.handle.take();
        if let Some(connection) = handle.as_mut() {
            if !self.pool.factory.is_reusable(connection) {
                debug!(slot = self.index, "discarding broken pooled connection");
                handle = None;
            }
        }
        if self.pool.closed.load(Ordering::Acquire) {
            handle = None;
        }

        let mut slots = self.pool.lock_slots();
        if let Some(slot) = slots.get_mut(self.index) {
            slot.in_use = false;
            slot.released_at = Instant::now();
            slot.handle = handle;
        }
        // The permit field drops after this body, so the slot is already free
        // when the next waiter wakes.
    }
}

/// Opens PostgreSQL connections through `diesel-async`.
pub struct PgConnectionFactory {
    database_url: String,
}

impl PgConnectionFactory {
    /// Create a factory for `database_url`.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    type Connection = AsyncPgConnection;

    async fn connect(&self) -> Result<Self::Connection, PoolError> {
        AsyncPgConnection::establish(&self.database_url)
            .await
            .map_err(|error| PoolError::connect(error.to_string()))
    }

    fn is_reusable(&self, connection: &mut Self::Connection) -> bool {
        !AnsiTransactionManager::is_broken_transaction_manager(connection)
    }
}

/// PostgreSQL connection pool used by the Diesel adapters.
pub type DbPool = ConnectionPool<PgConnectionFactory>;

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
