use std::time::{Duration, Instant};

/// Token bucket guarding inbound frame handling. A session gets a burst of
/// `capacity` frames and earns one token back per `refill_every`.
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    tokens: u32,
    capacity: u32,
    refill_every: Duration,
    last_refill: Instant,
}

impl FrameLimiter {
    pub fn new() -> Self {
        Self::with_limits(30, Duration::from_millis(500))
    }

    pub fn with_limits(capacity: u32, refill_every: Duration) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_every,
            last_refill: Instant::now(),
        }
    }

    pub fn allow(&mut self) -> bool {
        self.refill();
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        if elapsed >= self.refill_every {
            let earned = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
            self.tokens = (self.tokens + earned).min(self.capacity);
            self.last_refill = Instant::now();
        }
    }
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_empty() {
        let mut limiter = FrameLimiter::with_limits(3, Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_refill_restores_tokens() {
        let mut limiter = FrameLimiter::with_limits(1, Duration::from_millis(10));
        assert!(limiter.allow());
        assert!(!limiter.allow());

        std::thread::sleep(Duration::from_millis(25));
        assert!(limiter.allow());
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let mut limiter = FrameLimiter::with_limits(2, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
