//! Liveness probing: periodic `PING`, counting consecutive missed `PONG`
//! replies, declaring the connection lost past [`KEEPALIVE_MISS_LIMIT`].
//!
//! The dispatcher calls [`Keepalive::on_pong`] from its `PONG` handler and
//! [`Keepalive::tick`] from its own timer loop; `tick` returns the envelope
//! to send (if any) and whether the miss limit was just exceeded, leaving
//! the caller to drive the actual transport write and FSM transition.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::codec::{self, PacketType};
use crate::protocol_constants::KEEPALIVE_MISS_LIMIT;

/// Outcome of a [`Keepalive::tick`] call.
pub struct TickResult {
    /// Envelope bytes to send, if an interval has elapsed.
    pub ping: Option<Vec<u8>>,
    /// `true` the first time the miss limit is exceeded; the caller should
    /// treat this as connection loss. Stays `false` on subsequent ticks
    /// until [`Keepalive::reset`] is called for a fresh connection.
    pub lost: bool,
}

/// Per-connection keepalive tracker.
pub struct Keepalive {
    interval: Duration,
    client_id: u32,
    last_sent: Mutex<Option<Instant>>,
    consecutive_misses: AtomicU32,
    declared_lost: AtomicU32,
}

impl Keepalive {
    #[must_use]
    pub fn new(interval: Duration, client_id: u32) -> Self {
        Self {
            interval,
            client_id,
            last_sent: Mutex::new(None),
            consecutive_misses: AtomicU32::new(0),
            declared_lost: AtomicU32::new(0),
        }
    }

    /// Call on every dispatcher loop iteration (or a timer tick). If
    /// `interval` has elapsed since the last `PING`, counts that as a miss
    /// (the prior `PING` went unanswered) and returns a new `PING` envelope
    /// to send.
    pub fn tick(&self) -> TickResult {
        let mut last_sent = self.last_sent.lock();
        let due = match *last_sent {
            None => true,
            Some(t) => t.elapsed() >= self.interval,
        };
        if !due {
            return TickResult {
                ping: None,
                lost: false,
            };
        }

        if last_sent.is_some() {
            self.consecutive_misses.fetch_add(1, Ordering::Relaxed);
        }
        *last_sent = Some(Instant::now());
        drop(last_sent);

        let misses = self.consecutive_misses.load(Ordering::Relaxed);
        let lost = misses >= KEEPALIVE_MISS_LIMIT
            && self
                .declared_lost
                .compare_exchange(0, 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok();

        let ping = codec::encode(PacketType::Ping, self.client_id, &[], 0, None).ok();
        TickResult { ping, lost }
    }

    /// Call from the `PONG` handler: clears the miss counter.
    pub fn on_pong(&self) {
        self.consecutive_misses.store(0, Ordering::Relaxed);
    }

    /// Resets all state for a freshly (re)established connection.
    pub fn reset(&self) {
        *self.last_sent.lock() = None;
        self.consecutive_misses.store(0, Ordering::Relaxed);
        self.declared_lost.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_sends_ping_without_counting_a_miss() {
        let keepalive = Keepalive::new(Duration::from_millis(10), 1);
        let result = keepalive.tick();
        assert!(result.ping.is_some());
        assert!(!result.lost);
        assert_eq!(keepalive.consecutive_misses(), 0);
    }

    #[test]
    fn pong_resets_miss_counter() {
        let keepalive = Keepalive::new(Duration::from_millis(1), 1);
        keepalive.tick();
        std::thread::sleep(Duration::from_millis(5));
        keepalive.tick();
        assert_eq!(keepalive.consecutive_misses(), 1);
        keepalive.on_pong();
        assert_eq!(keepalive.consecutive_misses(), 0);
    }

    #[test]
    fn declares_lost_exactly_once_past_miss_limit() {
        let keepalive = Keepalive::new(Duration::from_millis(1), 1);
        let mut lost_count = 0;
        for _ in 0..(KEEPALIVE_MISS_LIMIT + 3) {
            std::thread::sleep(Duration::from_millis(3));
            if keepalive.tick().lost {
                lost_count += 1;
            }
        }
        assert_eq!(lost_count, 1);
    }

    #[test]
    fn reset_clears_lost_latch_for_a_new_connection() {
        let keepalive = Keepalive::new(Duration::from_millis(1), 1);
        for _ in 0..(KEEPALIVE_MISS_LIMIT + 1) {
            std::thread::sleep(Duration::from_millis(3));
            keepalive.tick();
        }
        assert_eq!(keepalive.consecutive_misses(), KEEPALIVE_MISS_LIMIT);
        keepalive.reset();
        assert_eq!(keepalive.consecutive_misses(), 0);
    }
}
