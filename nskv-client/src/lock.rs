//! # Distributed Locks
//!
//! Purpose: Hand out named mutexes backed by keys in the same store the client
//! talks to, sharing the client's connection pool.
//!
//! ## Protocol (single store instance)
//! - Acquire: `SET name token NX PX expiry`, retried up to `tries` times.
//! - Release: compare-and-delete script, so only the holder's token unlocks.
//! - Extend: compare-and-`PEXPIRE` script, same ownership check.
//!
//! A lock is considered held until `expiry` minus a clock drift allowance,
//! measured from the start of the successful attempt.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult, TransportError};
use crate::pool::Pool;
use crate::resp::RespValue;

const RELEASE_SCRIPT: &str =
    "if redis.call(\"GET\", KEYS[1]) == ARGV[1] then return redis.call(\"DEL\", KEYS[1]) else return 0 end";

const EXTEND_SCRIPT: &str = "if redis.call(\"GET\", KEYS[1]) == ARGV[1] then return redis.call(\"PEXPIRE\", KEYS[1], ARGV[2]) else return 0 end";

/// Tuning for a single mutex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutexOptions {
    /// Time-to-live of the lock key.
    pub expiry: Duration,
    /// Acquisition attempts made by `lock`.
    pub tries: usize,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Fraction of `expiry` subtracted to account for clock drift.
    pub drift_factor: f64,
}

impl Default for MutexOptions {
    fn default() -> Self {
        MutexOptions {
            expiry: Duration::from_secs(8),
            tries: 32,
            retry_delay: Duration::from_millis(50),
            drift_factor: 0.01,
        }
    }
}

/// Builds mutexes over a shared pool.
#[derive(Clone)]
pub struct LockManager {
    pool: Pool,
}

impl LockManager {
    pub fn new(pool: Pool) -> Self {
        LockManager { pool }
    }

    pub fn new_mutex(&self, name: impl Into<String>) -> DistributedMutex {
        self.new_mutex_with(name, MutexOptions::default())
    }

    pub fn new_mutex_with(&self, name: impl Into<String>, options: MutexOptions) -> DistributedMutex {
        DistributedMutex {
            pool: self.pool.clone(),
            name: name.into(),
            value: String::new(),
            options,
            until: None,
        }
    }
}

/// A named lock. Not released on drop; call `unlock`.
pub struct DistributedMutex {
    pool: Pool,
    name: String,
    value: String,
    options: MutexOptions,
    until: Option<Instant>,
}

impl DistributedMutex {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token of the current (or last) acquisition.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Instant after which the lock must be assumed lost.
    pub fn valid_until(&self) -> Option<Instant> {
        self.until
    }

    /// True while a successful acquisition has not run past its validity.
    pub fn is_held(&self) -> bool {
        self.until.is_some_and(|until| Instant::now() < until)
    }

    /// Acquires the lock, retrying up to `tries` times.
    pub fn lock(&mut self) -> ClientResult<()> {
        self.value = Uuid::new_v4().simple().to_string();
        let tries = self.options.tries.max(1);
        let mut last_transport = None;

        for attempt in 0..tries {
            if attempt > 0 {
                thread::sleep(self.options.retry_delay);
            }
            match self.attempt() {
                Ok(true) => return Ok(()),
                Ok(false) => last_transport = None,
                Err(err) => {
                    warn!(lock = %self.name, attempt, error = %err, "lock attempt failed");
                    last_transport = Some(err);
                }
            }
        }

        match last_transport {
            Some(err) => Err(ClientError::LockTransport(err)),
            None => Err(ClientError::LockFailed {
                name: self.name.clone(),
            }),
        }
    }

    /// Makes exactly one acquisition attempt.
    pub fn try_lock(&mut self) -> ClientResult<()> {
        self.value = Uuid::new_v4().simple().to_string();
        match self.attempt() {
            Ok(true) => Ok(()),
            Ok(false) => Err(ClientError::LockFailed {
                name: self.name.clone(),
            }),
            Err(err) => Err(ClientError::LockTransport(err)),
        }
    }

    /// Releases the lock if this mutex still owns it.
    pub fn unlock(&mut self) -> ClientResult<bool> {
        let reply = self
            .eval(RELEASE_SCRIPT, &[])
            .map_err(ClientError::LockTransport)?;
        self.until = None;
        debug!(lock = %self.name, released = reply, "lock released");
        Ok(reply)
    }

    /// Resets the lock's expiry if this mutex still owns it.
    pub fn extend(&mut self) -> ClientResult<bool> {
        let start = Instant::now();
        let ms = expiry_millis(self.options.expiry);
        let extended = self
            .eval(EXTEND_SCRIPT, &[ms.as_bytes()])
            .map_err(ClientError::LockTransport)?;
        if extended {
            self.until = Some(self.deadline(start));
        }
        Ok(extended)
    }

    fn attempt(&mut self) -> Result<bool, TransportError> {
        let start = Instant::now();
        let ms = expiry_millis(self.options.expiry);
        let reply = {
            let mut conn = self.pool.get()?;
            conn.exec(&[
                b"SET",
                self.name.as_bytes(),
                self.value.as_bytes(),
                b"NX",
                b"PX",
                ms.as_bytes(),
            ])?
        };
        let acquired = match reply.into_result()? {
            RespValue::Simple(_) => true,
            RespValue::Bulk(None) => false,
            _ => return Err(TransportError::UnexpectedResponse),
        };
        if !acquired {
            return Ok(false);
        }

        let deadline = self.deadline(start);
        if Instant::now() < deadline {
            self.until = Some(deadline);
            debug!(lock = %self.name, "lock acquired");
            return Ok(true);
        }

        // Acquired too late to be useful; drop our key so retries can succeed.
        if let Err(err) = self.eval(RELEASE_SCRIPT, &[]) {
            warn!(lock = %self.name, error = %err, "failed to release expired acquisition");
        }
        Ok(false)
    }

    fn eval(&self, script: &str, extra: &[&[u8]]) -> Result<bool, TransportError> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(5 + extra.len());
        args.push(b"EVAL");
        args.push(script.as_bytes());
        args.push(b"1");
        args.push(self.name.as_bytes());
        args.push(self.value.as_bytes());
        args.extend_from_slice(extra);
        let mut conn = self.pool.get()?;
        let status = conn.exec(&args)?.expect_integer()?;
        Ok(status == 1)
    }

    /// End of the validity window for an acquisition begun at `start`.
    ///
    /// A window that cannot be represented ends at `start`, so the
    /// acquisition is treated as already expired.
    fn deadline(&self, start: Instant) -> Instant {
        let expiry = self.options.expiry;
        let scaled = expiry.as_secs_f64() * drift_factor(self.options.drift_factor);
        let drift = Duration::try_from_secs_f64(scaled)
            .unwrap_or(expiry)
            .saturating_add(Duration::from_millis(2));
        start.checked_add(expiry.saturating_sub(drift)).unwrap_or(start)
    }
}

/// Clamps the drift factor into `[0, 1]`; NaN counts as no drift.
fn drift_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

fn expiry_millis(expiry: Duration) -> String {
    expiry.as_millis().max(1).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_common_lock_settings() {
        let options = MutexOptions::default();
        assert_eq!(options.expiry, Duration::from_secs(8));
        assert_eq!(options.tries, 32);
    }

    #[test]
    fn expiry_is_sent_in_whole_milliseconds() {
        assert_eq!(expiry_millis(Duration::from_secs(8)), "8000");
        assert_eq!(expiry_millis(Duration::from_micros(1500)), "1");
        assert_eq!(expiry_millis(Duration::ZERO), "1");
    }

    #[test]
    fn scripts_check_ownership_before_mutating() {
        assert!(RELEASE_SCRIPT.contains("ARGV[1]") && RELEASE_SCRIPT.contains("DEL"));
        assert!(EXTEND_SCRIPT.contains("ARGV[1]") && EXTEND_SCRIPT.contains("PEXPIRE"));
    }

    fn mutex_with(options: MutexOptions) -> DistributedMutex {
        // Never dialed: `deadline` is pure arithmetic.
        let pool = Pool::new(crate::pool::PoolConfig::default()).unwrap();
        LockManager::new(pool).new_mutex_with("jobs", options)
    }

    #[test]
    fn out_of_range_drift_factor_does_not_panic() {
        let start = Instant::now();
        let expiry = Duration::from_secs(8);
        for factor in [-0.5, f64::NAN, f64::INFINITY, 1e300] {
            let mutex = mutex_with(MutexOptions {
                expiry,
                drift_factor: factor,
                ..MutexOptions::default()
            });
            let deadline = mutex.deadline(start);
            assert!(deadline >= start && deadline <= start + expiry, "factor {factor}");
        }
        assert_eq!(drift_factor(-0.5), 0.0);
        assert_eq!(drift_factor(f64::NAN), 0.0);
        assert_eq!(drift_factor(7.0), 1.0);
        assert_eq!(drift_factor(0.01), 0.01);
    }

    #[test]
    fn unrepresentable_expiry_yields_an_expired_window() {
        let start = Instant::now();
        for factor in [0.01, 1.0] {
            let mutex = mutex_with(MutexOptions {
                expiry: Duration::MAX,
                drift_factor: factor,
                ..MutexOptions::default()
            });
            assert_eq!(mutex.deadline(start), start, "factor {factor}");
        }
    }
}
