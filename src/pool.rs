//! Connection pool: a bounded set of `Connection`s borrowed by
//! `acquire` and returned by dropping the guard, with LIFO idle reuse and
//! lazy idle-timeout eviction.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::conn::{Connection, State};
use crate::config::ConnectInfo;
use crate::error::{BoltError, Result};

/// A basic counting semaphore built on `parking_lot::Mutex` + `Condvar`,
/// gating how many connections may be borrowed at once.
struct Semaphore {
    available: Mutex<usize>,
    changed: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Semaphore {
            available: Mutex::new(permits),
            changed: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut available = self.available.lock();
        while *available == 0 {
            self.changed.wait(&mut available);
        }
        *available -= 1;
    }

    /// Returns `false` if `timeout` elapsed with no permit available.
    fn acquire_timeout(&self, timeout: Duration) -> bool {
        let mut available = self.available.lock();
        let deadline = Instant::now() + timeout;
        while *available == 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.changed.wait_for(&mut available, remaining);
            if *available == 0 && Instant::now() >= deadline {
                return false;
            }
        }
        *available -= 1;
        true
    }

    fn release(&self) {
        let mut available = self.available.lock();
        *available += 1;
        self.changed.notify_one();
    }

    fn available(&self) -> usize {
        *self.available.lock()
    }
}

/// Pool-wide configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections live at once, borrowed or idle.
    pub max_conns: usize,
    /// How long `acquire` waits for a free slot before giving up. `None`
    /// waits forever.
    pub acquire_timeout: Option<Duration>,
    /// How long a connection may sit idle before it is dialed fresh instead
    /// of reused, evaluated lazily at `acquire` time rather than by a
    /// background reaper.
    pub idle_timeout: Option<Duration>,
    /// Dial/auth parameters for new connections.
    pub connect: ConnectInfo,
    /// `clientName` sent on `Init`.
    pub client_name: String,
}

impl PoolConfig {
    /// Sensible defaults (`max_conns = 10`, `acquire_timeout = 30s`, no idle
    /// eviction) for the given target and client identity.
    pub fn new(connect: ConnectInfo, client_name: impl Into<String>) -> Self {
        PoolConfig {
            max_conns: 10,
            acquire_timeout: Some(Duration::from_secs(30)),
            idle_timeout: None,
            connect,
            client_name: client_name.into(),
        }
    }
}

struct IdleConn {
    conn: Connection,
    since: Instant,
}

/// A snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// The configured maximum.
    pub max_conns: usize,
    /// Connections currently borrowed.
    pub in_use: usize,
    /// Connections sitting idle, ready for reuse.
    pub idle: usize,
}

/// A bounded pool of Bolt connections to one server.
pub struct Pool {
    config: PoolConfig,
    idle: Mutex<Vec<IdleConn>>,
    semaphore: Semaphore,
    closed: AtomicBool,
}

impl Pool {
    /// Build an empty pool; connections are dialed lazily on first
    /// `acquire`.
    pub fn new(config: PoolConfig) -> Self {
        let semaphore = Semaphore::new(config.max_conns);
        Pool {
            config,
            idle: Mutex::new(Vec::new()),
            semaphore,
            closed: AtomicBool::new(false),
        }
    }

    /// Borrow a connection, blocking (subject to `acquire_timeout`) until
    /// one is free. Idle connections are served LIFO; one past its
    /// `idle_timeout` is discarded and a fresh one dialed in its place
    /// rather than returned to the caller.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BoltError::usage("pool is closed"));
        }

        let acquired = match self.config.acquire_timeout {
            Some(timeout) => self.semaphore.acquire_timeout(timeout),
            None => {
                self.semaphore.acquire();
                true
            }
        };
        if !acquired {
            return Err(BoltError::usage("timed out waiting for a pooled connection"));
        }

        loop {
            let candidate = self.idle.lock().pop();
            match candidate {
                Some(IdleConn { mut conn, since }) => {
                    if let Some(idle_timeout) = self.config.idle_timeout {
                        if since.elapsed() >= idle_timeout {
                            debug!(target: "bolt::pool", "discarding connection idle past timeout");
                            conn.close();
                            continue;
                        }
                    }
                    return Ok(PooledConnection {
                        pool: self,
                        conn: Some(conn),
                    });
                }
                None => break,
            }
        }

        match Connection::connect(&self.config.connect, &self.config.client_name) {
            Ok(conn) => Ok(PooledConnection {
                pool: self,
                conn: Some(conn),
            }),
            Err(e) => {
                self.semaphore.release();
                Err(e)
            }
        }
    }

    /// A point-in-time occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        let in_use = self.config.max_conns.saturating_sub(self.semaphore.available());
        PoolStats {
            max_conns: self.config.max_conns,
            in_use,
            idle,
        }
    }

    /// Shut the pool down: close every idle connection and refuse future
    /// `acquire` calls. Connections already borrowed are closed when their
    /// guard drops. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut idle = self.idle.lock();
        for mut entry in idle.drain(..) {
            entry.conn.close();
        }
    }

    fn release(&self, mut conn: Connection) {
        if self.closed.load(Ordering::Acquire) {
            conn.close();
            self.semaphore.release();
            return;
        }

        match conn.state() {
            State::Ready => {
                self.idle.lock().push(IdleConn {
                    conn,
                    since: Instant::now(),
                });
            }
            State::Closed => {
                // already dead, nothing to recycle
            }
            _ => {
                // dirty: a Failed/Streaming/Interrupted connection must be
                // Reset before it can serve another caller.
                match conn.reset() {
                    Ok(()) => self.idle.lock().push(IdleConn {
                        conn,
                        since: Instant::now(),
                    }),
                    Err(e) => {
                        warn!(target: "bolt::pool", "discarding connection that failed Reset on release: {e}");
                        conn.close();
                    }
                }
            }
        }
        self.semaphore.release();
    }
}

/// A connection borrowed from a `Pool`. Returns the connection to the pool
/// (Reset first if dirty) when dropped.
pub struct PooledConnection<'a> {
    pool: &'a Pool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn config(max_conns: usize) -> PoolConfig {
        PoolConfig {
            max_conns,
            acquire_timeout: Some(Duration::from_millis(200)),
            idle_timeout: None,
            connect: ConnectInfo::parse("bolt://localhost:1").unwrap(),
            client_name: "bolt-driver-test/0.1".to_string(),
        }
    }

    #[test]
    fn stats_start_empty() {
        let pool = Pool::new(config(3));
        let stats = pool.stats();
        assert_eq!(stats, PoolStats { max_conns: 3, in_use: 0, idle: 0 });
    }

    #[test]
    fn saturated_pool_blocks_then_unblocks_on_release() {
        // max_conns = 1 but no server is listening, so acquire() will fail
        // to dial; what we're really exercising here is the semaphore
        // itself, which gates *before* dialing.
        let pool = Arc::new(Semaphore::new(1));
        pool.acquire();
        assert_eq!(pool.available(), 0);

        let second = Arc::clone(&pool);
        let waiter = thread::spawn(move || second.acquire_timeout(Duration::from_millis(500)));

        thread::sleep(Duration::from_millis(50));
        pool.release();
        assert!(waiter.join().unwrap(), "waiter should have acquired after release");
    }

    #[test]
    fn acquire_timeout_elapses_when_never_released() {
        let sem = Semaphore::new(1);
        sem.acquire();
        let got = sem.acquire_timeout(Duration::from_millis(50));
        assert!(!got);
    }

    #[test]
    fn close_is_idempotent_and_drains_idle_connections() {
        let pool = Pool::new(config(2));
        pool.close();
        pool.close(); // must not panic or double-count anything
        assert!(pool.acquire().is_err());
    }
}
