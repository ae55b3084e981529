//! Hashed timer wheel for idle-flow expiration.
//!
//! The wheel has [`WHEEL_SLOTS`] slots of `tick_ms` milliseconds each. Every
//! flow control block index owns one link record; an armed index sits in the
//! doubly-linked list of slot `deadline_tick % WHEEL_SLOTS`. Deadlines are
//! absolute ticks, so timeouts longer than one rotation simply stay in their
//! slot until the wheel reaches them.
//!
//! Re-arming unlinks the index from its current slot before linking it into
//! the new one, so an index is never present in two slots.

use crate::error::{Error, Result};

/// Number of slots in the wheel.
pub const WHEEL_SLOTS: usize = 256;

/// Number of ticks an idle timeout is split into.
pub const TICKS_PER_TIMEOUT: u64 = 128;

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
    deadline_tick: u64,
    armed: bool,
}

impl Link {
    const UNARMED: Link = Link {
        prev: NIL,
        next: NIL,
        deadline_tick: 0,
        armed: false,
    };
}

/// Deadline-bucketed expiration wheel over flow indices.
pub struct TimerWheel {
    tick_ms: u64,
    heads: Vec<u32>,
    links: Vec<Link>,
    current_tick: u64,
    armed: usize,
}

impl TimerWheel {
    /// Create a wheel for `entries` indices with the given tick length,
    /// positioned at `now_ms`.
    pub fn new(entries: usize, tick_ms: u64, now_ms: u64) -> Self {
        let tick_ms = tick_ms.max(1);

        Self {
            tick_ms,
            heads: vec![NIL; WHEEL_SLOTS],
            links: vec![Link::UNARMED; entries],
            current_tick: now_ms / tick_ms,
            armed: 0,
        }
    }

    /// Create a wheel whose tick is derived from the idle timeout.
    pub fn for_timeout(entries: usize, timeout_ms: u64, now_ms: u64) -> Self {
        Self::new(entries, timeout_ms / TICKS_PER_TIMEOUT, now_ms)
    }

    /// Tick length in milliseconds.
    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    /// Time of the last tick the wheel was advanced to.
    pub fn current_ms(&self) -> u64 {
        self.current_tick * self.tick_ms
    }

    /// Number of armed indices.
    pub fn len(&self) -> usize {
        self.armed
    }

    /// Check if nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.armed == 0
    }

    /// Check if `index` is armed.
    pub fn is_scheduled(&self, index: usize) -> bool {
        self.links.get(index).map_or(false, |l| l.armed)
    }

    /// Deadline of `index` rounded up to its tick, if armed.
    pub fn deadline_ms(&self, index: usize) -> Option<u64> {
        self.links
            .get(index)
            .filter(|l| l.armed)
            .map(|l| l.deadline_tick * self.tick_ms)
    }

    /// Arm `index` to expire at `deadline_ms`, moving it if already armed.
    ///
    /// The deadline is rounded up to a whole tick; a deadline that is already
    /// due fires on the next advance.
    pub fn schedule(&mut self, index: usize, deadline_ms: u64) {
        if self.links[index].armed {
            self.unlink(index);
        }

        let deadline_tick = deadline_ms.div_ceil(self.tick_ms).max(self.current_tick + 1);
        let slot = (deadline_tick % WHEEL_SLOTS as u64) as usize;
        let head = self.heads[slot];

        self.links[index] = Link {
            prev: NIL,
            next: head,
            deadline_tick,
            armed: true,
        };
        if head != NIL {
            self.links[head as usize].prev = index as u32;
        }
        self.heads[slot] = index as u32;
        self.armed += 1;
    }

    /// Disarm `index`. Returns false if it was not armed.
    pub fn cancel(&mut self, index: usize) -> bool {
        if !self.is_scheduled(index) {
            return false;
        }
        self.unlink(index);
        true
    }

    /// Advance to `now_ms` and return every index whose deadline has passed.
    ///
    /// Returned indices are disarmed. Advancing to a time before the current
    /// tick is rejected with [`Error::ClockRegression`].
    pub fn advance(&mut self, now_ms: u64) -> Result<Vec<usize>> {
        let target = now_ms / self.tick_ms;
        if target < self.current_tick {
            return Err(Error::ClockRegression {
                now: now_ms,
                last: self.current_ms(),
            });
        }

        let steps = (target - self.current_tick).min(WHEEL_SLOTS as u64);
        let mut expired = Vec::new();

        for step in 1..=steps {
            let slot = ((self.current_tick + step) % WHEEL_SLOTS as u64) as usize;
            let mut cursor = self.heads[slot];

            while cursor != NIL {
                let index = cursor as usize;
                cursor = self.links[index].next;

                if self.links[index].deadline_tick <= target {
                    self.unlink(index);
                    expired.push(index);
                }
            }
        }

        self.current_tick = target;
        Ok(expired)
    }

    fn unlink(&mut self, index: usize) {
        let link = self.links[index];
        let slot = (link.deadline_tick % WHEEL_SLOTS as u64) as usize;

        if link.prev == NIL {
            self.heads[slot] = link.next;
        } else {
            self.links[link.prev as usize].next = link.next;
        }
        if link.next != NIL {
            self.links[link.next as usize].prev = link.prev;
        }

        self.links[index] = Link::UNARMED;
        self.armed -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_derived_from_timeout() {
        let wheel = TimerWheel::for_timeout(4, 5000, 0);
        assert_eq!(wheel.tick_ms(), 39);

        let wheel = TimerWheel::for_timeout(4, 10, 0);
        assert_eq!(wheel.tick_ms(), 1);
    }

    #[test]
    fn test_expires_at_deadline() {
        let mut wheel = TimerWheel::new(4, 10, 0);
        wheel.schedule(0, 100);
        wheel.schedule(1, 205);

        assert!(wheel.advance(99).unwrap().is_empty());
        assert_eq!(wheel.advance(100).unwrap(), vec![0]);
        assert!(!wheel.is_scheduled(0));

        // 205 rounds up to tick 21
        assert!(wheel.advance(209).unwrap().is_empty());
        assert_eq!(wheel.advance(210).unwrap(), vec![1]);
        assert!(wheel.is_empty());
    }

    #[test]
    fn test_reschedule_moves_entry() {
        let mut wheel = TimerWheel::new(2, 10, 0);
        wheel.schedule(0, 50);
        wheel.schedule(0, 500);

        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.deadline_ms(0), Some(500));
        assert!(wheel.advance(100).unwrap().is_empty());
        assert_eq!(wheel.advance(500).unwrap(), vec![0]);
    }

    #[test]
    fn test_cancel() {
        let mut wheel = TimerWheel::new(3, 10, 0);
        wheel.schedule(0, 50);
        wheel.schedule(1, 50);
        wheel.schedule(2, 50);

        assert!(wheel.cancel(1));
        assert!(!wheel.cancel(1));

        let mut expired = wheel.advance(50).unwrap();
        expired.sort_unstable();
        assert_eq!(expired, vec![0, 2]);
    }

    #[test]
    fn test_long_timeout_survives_rotation() {
        let mut wheel = TimerWheel::new(1, 1, 0);
        // Three full rotations away
        wheel.schedule(0, 3 * WHEEL_SLOTS as u64 + 7);

        for now in (0..3 * WHEEL_SLOTS as u64 + 7).step_by(5) {
            assert!(wheel.advance(now).unwrap().is_empty());
        }
        assert_eq!(wheel.advance(3 * WHEEL_SLOTS as u64 + 7).unwrap(), vec![0]);
    }

    #[test]
    fn test_large_jump_expires_everything_due() {
        let mut wheel = TimerWheel::new(3, 1, 0);
        wheel.schedule(0, 10);
        wheel.schedule(1, 400);
        wheel.schedule(2, 5000);

        let mut expired = wheel.advance(1000).unwrap();
        expired.sort_unstable();
        assert_eq!(expired, vec![0, 1]);
        assert!(wheel.is_scheduled(2));
    }

    #[test]
    fn test_past_deadline_fires_next_tick() {
        let mut wheel = TimerWheel::new(1, 10, 100);
        wheel.schedule(0, 20);

        assert_eq!(wheel.deadline_ms(0), Some(110));
        assert_eq!(wheel.advance(110).unwrap(), vec![0]);
    }

    #[test]
    fn test_rejects_clock_regression() {
        let mut wheel = TimerWheel::new(1, 10, 0);
        wheel.advance(100).unwrap();

        let err = wheel.advance(50).unwrap_err();
        assert_eq!(err, Error::ClockRegression { now: 50, last: 100 });

        // Same tick is fine
        assert!(wheel.advance(105).unwrap().is_empty());
    }
}
