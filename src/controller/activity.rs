// Midi activity throttle - at most one activity notification per channel per period

use std::time::{Duration, Instant};

pub struct ActivityThrottle {
    min_period: Duration,
    last: [Option<Instant>; 16],
}

impl ActivityThrottle {
    pub fn new(min_period: Duration) -> Self {
        Self {
            min_period,
            last: [None; 16],
        }
    }

    /// True if an activity notification can be fired for `channel` at `now`
    pub fn should_fire(&mut self, channel: u8, now: Instant) -> bool {
        let Some(last) = self.last.get_mut(channel as usize) else {
            return false;
        };
        match last {
            Some(t) if now.duration_since(*t) < self.min_period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = [None; 16];
    }
}
