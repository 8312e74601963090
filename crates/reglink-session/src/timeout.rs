use std::thread;
use std::time::{Duration, Instant};

/// Default overall deadline for a single register operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
/// Default interval between retries and register polls.
pub const DEFAULT_RETRY: Duration = Duration::from_millis(100);

/// Deadline for bus transactions, which bound many register exchanges.
const BUS_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline used right after connect or reset, when the peer's link-layer
/// address may still be resolving.
const FIRST_CONTACT_TIMEOUT: Duration = Duration::from_secs(30);
const FIRST_CONTACT_RETRY: Duration = Duration::from_millis(200);

/// Stateful timeout policy for one logical call.
///
/// Tracks an overall deadline plus a retry/poll interval. One `Timeout` is
/// threaded through every network exchange a logical call performs, so a
/// multi-step bus transaction shares a single budget.
#[derive(Debug, Clone)]
pub struct Timeout {
    started: Instant,
    deadline: Instant,
    retry_interval: Duration,
}

impl Timeout {
    pub fn new(timeout: Duration, retry_interval: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + timeout,
            retry_interval,
        }
    }

    /// Policy for I2C transactions.
    pub fn i2c() -> Self {
        Self::new(BUS_TIMEOUT, DEFAULT_RETRY)
    }

    /// Policy for SPI transactions.
    pub fn spi() -> Self {
        Self::new(BUS_TIMEOUT, DEFAULT_RETRY)
    }

    /// Extended policy covering address-resolution latency on the first
    /// exchange after connect or reset.
    pub fn first_contact() -> Self {
        Self::new(FIRST_CONTACT_TIMEOUT, FIRST_CONTACT_RETRY)
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline, saturating at zero.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// How long one receive wait may block: the retry interval, clipped to
    /// the remaining budget.
    pub fn recv_window(&self) -> Duration {
        self.retry_interval.min(self.remaining())
    }

    /// Whether another attempt may start.
    pub fn retry(&self) -> bool {
        !self.expired()
    }

    /// Sleep one poll interval (clipped to the remaining budget) and report
    /// whether another poll may start. Register poll loops use this; the
    /// network retry path gets its pacing from the receive wait instead.
    pub fn retry_wait(&self) -> bool {
        if self.expired() {
            return false;
        }
        thread::sleep(self.recv_window());
        !self.expired()
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_RETRY)
    }
}
