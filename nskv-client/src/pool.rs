//! # Connection Pool
//!
//! Purpose: Share a bounded set of store connections between threads, so each
//! operation pays for a TCP handshake (and `AUTH`) only when no idle
//! connection is available.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Blocking Backpressure**: A saturated pool parks callers on a condvar
//!    until a connection or slot is released (or fails fast if `wait` is off).
//! 3. **Scoped Acquisition**: `PooledConnection` returns itself on drop, on
//!    every exit path.
//! 4. **Validate Before Reuse**: Idle connections are pinged before being
//!    handed out; broken ones are replaced transparently.
//!
//! `active` counts every open connection, idle or borrowed. A slot is reserved
//! under the lock before dialing so concurrent dials never exceed the limit.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::config::{Credentials, DEFAULT_MAX_ACTIVE, DEFAULT_MAX_IDLE};
use crate::error::TransportError;
use crate::resp::{encode_command, read_response, RespValue};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Store address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Authentication sent on every fresh connection.
    pub credentials: Credentials,
    /// Maximum open connections (idle + in-use). Must be at least 1.
    pub max_active: usize,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Block when exhausted; otherwise `get` fails with `PoolExhausted`.
    pub wait: bool,
    /// Ping idle connections before reuse.
    pub test_on_borrow: bool,
    /// Idle connections older than this are closed on the next `get`.
    pub idle_timeout: Option<Duration>,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            addr: "127.0.0.1:6379".to_string(),
            credentials: Credentials::Anonymous,
            max_active: DEFAULT_MAX_ACTIVE,
            max_idle: DEFAULT_MAX_IDLE,
            wait: true,
            test_on_borrow: true,
            idle_timeout: None,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Open connections, idle or borrowed.
    pub active: usize,
    /// Connections parked in the idle set.
    pub idle: usize,
}

struct IdleConnection {
    conn: Connection,
    returned_at: Instant,
}

struct PoolState {
    idle: VecDeque<IdleConnection>,
    active: usize,
    closed: bool,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

enum Checkout {
    Idle(Connection),
    Dial,
}

/// Connection pool handle. Clones share the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool. No connection is opened until the first `get`.
    pub fn new(config: PoolConfig) -> Result<Self, TransportError> {
        if config.max_active == 0 {
            return Err(TransportError::InvalidConfig("max_active must be at least 1"));
        }
        validate_addr(&config.addr)?;

        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            active: 0,
            closed: false,
        };
        Ok(Pool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
                released: Condvar::new(),
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrows a connection, blocking while the pool is saturated.
    ///
    /// Dial failures are returned as-is; this layer never retries a dial.
    pub fn get(&self) -> Result<PooledConnection, TransportError> {
        loop {
            match self.checkout()? {
                Checkout::Idle(mut conn) => {
                    if self.inner.config.test_on_borrow {
                        if let Err(err) = conn.ping() {
                            warn!(addr = %self.inner.config.addr, error = %err, "discarding idle connection that failed liveness check");
                            self.forget_slot();
                            continue;
                        }
                    }
                    return Ok(PooledConnection::new(self.clone(), conn));
                }
                Checkout::Dial => match Connection::open(&self.inner.config) {
                    Ok(conn) => {
                        debug!(addr = %self.inner.config.addr, "opened store connection");
                        return Ok(PooledConnection::new(self.clone(), conn));
                    }
                    Err(err) => {
                        self.forget_slot();
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Closes idle connections and refuses further borrows. Idempotent.
    ///
    /// Borrowed connections are closed when their guards drop.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.active -= state.idle.len();
        state.idle.clear();
        debug!(addr = %self.inner.config.addr, "pool closed");
        self.inner.released.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
        }
    }

    fn checkout(&self) -> Result<Checkout, TransportError> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(TransportError::PoolClosed);
            }

            if let Some(timeout) = config.idle_timeout {
                // Oldest idle connections sit at the front.
                while state
                    .idle
                    .front()
                    .is_some_and(|idle| idle.returned_at.elapsed() >= timeout)
                {
                    state.idle.pop_front();
                    state.active -= 1;
                    debug!(addr = %config.addr, "closed idle connection past idle timeout");
                }
            }

            if let Some(idle) = state.idle.pop_back() {
                return Ok(Checkout::Idle(idle.conn));
            }
            if state.active < config.max_active {
                state.active += 1;
                return Ok(Checkout::Dial);
            }
            if !config.wait {
                return Err(TransportError::PoolExhausted);
            }
            self.inner.released.wait(&mut state);
        }
    }

    /// Drops a slot whose connection was discarded or never opened.
    fn forget_slot(&self) {
        let mut state = self.inner.state.lock();
        state.active = state.active.saturating_sub(1);
        self.inner.released.notify_one();
    }

    fn put_back(&self, conn: Connection) {
        let mut state = self.inner.state.lock();
        if state.closed || state.idle.len() >= self.inner.config.max_idle {
            state.active = state.active.saturating_sub(1);
        } else {
            state.idle.push_back(IdleConnection {
                conn,
                returned_at: Instant::now(),
            });
        }
        self.inner.released.notify_one();
    }
}

/// RAII guard returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Pool,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Pool, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Executes one command and returns the parsed reply.
    ///
    /// Error replies come back as `RespValue::Error`; only IO or framing
    /// failures mark the connection as broken.
    pub fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue, TransportError> {
        let conn = self.conn.as_mut().ok_or(TransportError::PoolClosed)?;
        let response = conn.exec(args);
        if response.is_err() {
            // Stream position is unknown; never hand this one out again.
            self.valid = false;
        }
        response
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        if self.valid {
            self.pool.put_back(conn);
        } else {
            debug!(addr = %self.pool.inner.config.addr, "discarding broken connection");
            drop(conn);
            self.pool.forget_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn open(config: &PoolConfig) -> Result<Self, TransportError> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_nodelay(true)?;

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        };
        conn.authenticate(&config.credentials)?;
        Ok(conn)
    }

    fn authenticate(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        let reply = match credentials {
            Credentials::Anonymous => return Ok(()),
            Credentials::Password { password } => self.exec(&[b"AUTH", password.as_bytes()])?,
            Credentials::UserPassword { username, password } => {
                self.exec(&[b"AUTH", username.as_bytes(), password.as_bytes()])?
            }
        };
        match reply.expect_ok() {
            Ok(()) => Ok(()),
            Err(TransportError::Server { message }) => Err(TransportError::AuthFailed { message }),
            Err(err) => Err(err),
        }
    }

    fn ping(&mut self) -> Result<(), TransportError> {
        match self.exec(&[b"PING"])?.into_result()? {
            RespValue::Simple(_) | RespValue::Bulk(Some(_)) => Ok(()),
            _ => Err(TransportError::UnexpectedResponse),
        }
    }

    fn exec(&mut self, args: &[&[u8]]) -> Result<RespValue, TransportError> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_response(&mut self.reader, &mut self.line_buf)
    }
}

/// Checks for a `host:port` shape without resolving the host.
fn validate_addr(addr: &str) -> Result<(), TransportError> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
        _ => Err(TransportError::InvalidAddress),
    }
}

fn connect_stream(config: &PoolConfig) -> Result<TcpStream, TransportError> {
    let addr: SocketAddr = config
        .addr
        .to_socket_addrs()
        .map_err(|_| TransportError::InvalidAddress)?
        .next()
        .ok_or(TransportError::InvalidAddress)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}
