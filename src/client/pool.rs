//! Bounded pool of reusable outbound connections.
//!
//! # Responsibilities
//! - Hand out a free connection, or open a new one while capacity remains
//! - Make callers wait (bounded polling) when the pool is saturated
//! - Replace connections past their maximum age, keeping the slot id
//! - Remove and close connections that failed a call
//!
//! # Design Decisions
//! - A connection is checked out of its slot while in use; holding it is
//!   the in-use flag, so two callers can never share one
//! - Connections being opened count against capacity (pending reservations)
//! - Connections opened beyond capacity are ephemeral and closed after one call
//! - Dropping a checked-out connection (cancelled caller) frees its slot
//!
//! ```text
//! acquire(reuse) ──▶ free slot? ──yes──▶ check out
//!        │               │no
//!        │               ▼
//!        │        room (slots + pending < capacity)? ──yes──▶ reserve, open, register
//!        │               │no
//!        │               ▼
//!        │        reuse? ──yes──▶ sleep, poll again (then Overload)
//!        │               │no
//!        ▼               ▼
//!   ephemeral connection (not registered)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::binary::codec::{WireRequest, WireResponse};
use crate::error::TransportError;
use crate::observability::metrics;

/// An open connection able to carry calls.
#[async_trait]
pub trait RpcConnection: Send + 'static {
    /// Whether the transport still looks usable.
    fn is_open(&self) -> bool;

    async fn call(&mut self, req: &WireRequest) -> Result<WireResponse, TransportError>;

    async fn close(&mut self);
}

/// Opens connections to one target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: RpcConnection;

    async fn connect(&self) -> Result<Self::Conn, TransportError>;

    /// Target label for logs and metrics.
    fn target(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub capacity: usize,
    pub max_age: Duration,
    /// Polls before giving up with `Overload`.
    pub acquire_attempts: u32,
    pub acquire_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            capacity: 50,
            max_age: Duration::from_secs(600),
            acquire_attempts: 50,
            acquire_interval: Duration::from_millis(10),
        }
    }
}

struct Slot<C> {
    /// `None` while checked out.
    conn: Option<C>,
    created: Instant,
}

struct PoolState<C> {
    slots: HashMap<String, Slot<C>>,
    pending: usize,
}

impl<C> PoolState<C> {
    fn occupied(&self) -> usize {
        self.slots.len() + self.pending
    }

    fn fresh_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(1_000_000_000u64..2_000_000_000).to_string();
            if !self.slots.contains_key(&id) {
                return id;
            }
        }
    }
}

type SharedState<C> = Arc<Mutex<PoolState<C>>>;

enum Plan<C: RpcConnection> {
    Checkout(PooledConnection<C>),
    Wait,
    Open { reservation: Option<Reservation<C>> },
}

/// A capacity slot held while a connection is being opened.
///
/// Dropped unsettled (the opening caller was cancelled), it gives the slot
/// back.
struct Reservation<C> {
    pool: SharedState<C>,
    settled: bool,
}

impl<C> Reservation<C> {
    fn take(state: &mut PoolState<C>, pool: &SharedState<C>) -> Self {
        state.pending += 1;
        Self {
            pool: Arc::clone(pool),
            settled: false,
        }
    }

    /// Give the slot back under an already held lock.
    fn settle(mut self, state: &mut PoolState<C>) {
        state.pending = state.pending.saturating_sub(1);
        self.settled = true;
    }
}

impl<C> Drop for Reservation<C> {
    fn drop(&mut self) {
        if !self.settled {
            let mut state = lock(&self.pool);
            state.pending = state.pending.saturating_sub(1);
            debug!("Connection reservation abandoned");
        }
    }
}

fn lock<C>(state: &Mutex<PoolState<C>>) -> MutexGuard<'_, PoolState<C>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A connection checked out of the pool (or an ephemeral one).
pub struct PooledConnection<C: RpcConnection> {
    id: Option<String>,
    conn: Option<C>,
    created: Instant,
    pool: SharedState<C>,
}

impl<C: RpcConnection> PooledConnection<C> {
    /// Slot id; `None` for an ephemeral connection.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_pooled(&self) -> bool {
        self.id.is_some()
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    async fn call(&mut self, req: &WireRequest) -> Result<WireResponse, TransportError> {
        match self.conn.as_mut() {
            Some(conn) => conn.call(req).await,
            None => Err(TransportError::Closed),
        }
    }
}

impl<C: RpcConnection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        // Still holding the connection here means it was never released:
        // its state is unknown, so it leaves the pool and is closed.
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if let Some(id) = &self.id {
            lock(&self.pool).slots.remove(id);
        }
        warn!(
            connection_id = self.id.as_deref().unwrap_or("ephemeral"),
            "Connection abandoned while in use"
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { conn.close().await });
        }
    }
}

pub struct ConnectionPool<K: Connector> {
    connector: K,
    options: PoolOptions,
    state: SharedState<K::Conn>,
}

impl<K: Connector> ConnectionPool<K> {
    pub fn new(connector: K, options: PoolOptions) -> Self {
        Self {
            connector,
            options,
            state: Arc::new(Mutex::new(PoolState {
                slots: HashMap::new(),
                pending: 0,
            })),
        }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    pub fn capacity(&self) -> usize {
        self.options.capacity
    }

    /// Registered connections, in use or not.
    pub fn size(&self) -> usize {
        lock(&self.state).slots.len()
    }

    /// Registered connections currently checked out.
    pub fn in_use(&self) -> usize {
        lock(&self.state)
            .slots
            .values()
            .filter(|slot| slot.conn.is_none())
            .count()
    }

    /// Get a connection, waiting while the pool is saturated.
    ///
    /// With `reuse` a free pooled connection is preferred; without it a new
    /// connection is always opened (registered if there is room).
    pub async fn acquire(
        &self,
        reuse: bool,
        path: &str,
    ) -> Result<PooledConnection<K::Conn>, TransportError> {
        for attempt in 0..=self.options.acquire_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.options.acquire_interval).await;
            }
            if let Some(conn) = self.try_acquire(reuse).await? {
                return Ok(conn);
            }
        }
        warn!(peer = %self.connector.target(), path, "Connection pool overloaded");
        Err(TransportError::Overload {
            path: path.to_string(),
        })
    }

    async fn try_acquire(
        &self,
        reuse: bool,
    ) -> Result<Option<PooledConnection<K::Conn>>, TransportError> {
        let mut stale: Vec<K::Conn> = Vec::new();
        let plan = {
            let mut state = lock(&self.state);
            let mut plan = None;

            if reuse {
                let closed: Vec<String> = state
                    .slots
                    .iter()
                    .filter(|(_, slot)| slot.conn.as_ref().is_some_and(|c| !c.is_open()))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in closed {
                    if let Some(conn) = state.slots.remove(&id).and_then(|slot| slot.conn) {
                        stale.push(conn);
                    }
                }

                let free = state
                    .slots
                    .iter_mut()
                    .find(|(_, slot)| slot.conn.is_some());
                if let Some((id, slot)) = free {
                    if let Some(conn) = slot.conn.take() {
                        plan = Some(Plan::Checkout(PooledConnection {
                            id: Some(id.clone()),
                            conn: Some(conn),
                            created: slot.created,
                            pool: Arc::clone(&self.state),
                        }));
                    }
                }
            }

            match plan {
                Some(plan) => plan,
                None => {
                    let room = state.occupied() < self.options.capacity;
                    if reuse && !room {
                        Plan::Wait
                    } else {
                        let reservation =
                            room.then(|| Reservation::take(&mut state, &self.state));
                        Plan::Open { reservation }
                    }
                }
            }
        };

        for mut conn in stale {
            conn.close().await;
        }

        let reservation = match plan {
            Plan::Checkout(conn) => return Ok(Some(conn)),
            Plan::Wait => return Ok(None),
            Plan::Open { reservation } => reservation,
        };

        let opened = self.connector.connect().await;
        let created = Instant::now();

        let Some(reservation) = reservation else {
            debug!(peer = %self.connector.target(), "Opening ephemeral connection");
            return opened.map(|conn| {
                Some(PooledConnection {
                    id: None,
                    conn: Some(conn),
                    created,
                    pool: Arc::clone(&self.state),
                })
            });
        };

        let mut state = lock(&self.state);
        reservation.settle(&mut state);
        let conn = opened?;
        let id = state.fresh_id();
        state.slots.insert(id.clone(), Slot { conn: None, created });
        metrics::record_pool_size(self.connector.target(), state.slots.len());
        debug!(peer = %self.connector.target(), connection_id = %id, "Registered pooled connection");
        Ok(Some(PooledConnection {
            id: Some(id),
            conn: Some(conn),
            created,
            pool: Arc::clone(&self.state),
        }))
    }

    /// Return a connection after its call.
    ///
    /// Failed connections are closed and removed. Healthy ones go back to
    /// their slot, replaced by a fresh connection first when past max age.
    pub async fn release(&self, mut pooled: PooledConnection<K::Conn>, healthy: bool) {
        let Some(id) = pooled.id.clone() else {
            if let Some(mut conn) = pooled.conn.take() {
                conn.close().await;
            }
            return;
        };

        // The connection stays inside `pooled` across every await below, so a
        // cancelled release frees the slot through its drop.
        if !healthy {
            if let Some(conn) = pooled.conn.as_mut() {
                conn.close().await;
            }
            pooled.conn = None;
            let mut state = lock(&self.state);
            state.slots.remove(&id);
            metrics::record_pool_size(self.connector.target(), state.slots.len());
            debug!(connection_id = %id, "Removed failed connection");
            return;
        }

        if pooled.age() > self.options.max_age {
            if let Some(conn) = pooled.conn.as_mut() {
                conn.close().await;
            }
            match self.connector.connect().await {
                Ok(fresh) => {
                    pooled.conn = Some(fresh);
                    pooled.created = Instant::now();
                    debug!(connection_id = %id, "Replaced aged connection");
                }
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Failed to replace aged connection");
                    pooled.conn = None;
                    lock(&self.state).slots.remove(&id);
                    return;
                }
            }
        }

        let created = pooled.created;
        let Some(conn) = pooled.conn.take() else {
            return;
        };

        // `close_all` may have cleared the slot while the connection was out.
        let orphan = {
            let mut state = lock(&self.state);
            match state.slots.get_mut(&id) {
                Some(slot) => {
                    slot.conn = Some(conn);
                    slot.created = created;
                    None
                }
                None => Some(conn),
            }
        };
        if let Some(mut conn) = orphan {
            conn.close().await;
        }
    }

    /// Acquire, call, release.
    pub async fn call(
        &self,
        req: &WireRequest,
        reuse: bool,
    ) -> Result<WireResponse, TransportError> {
        let mut pooled = self.acquire(reuse, &req.path).await?;
        let result = pooled.call(req).await;
        self.release(pooled, result.is_ok()).await;
        result
    }

    /// Close every free connection and forget all slots.
    pub async fn close_all(&self) {
        let conns: Vec<K::Conn> = {
            let mut state = lock(&self.state);
            state.slots.drain().filter_map(|(_, slot)| slot.conn).collect()
        };
        for mut conn in conns {
            conn.close().await;
        }
    }
}
