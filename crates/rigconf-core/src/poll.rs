//! Rate-limited polling primitives shared by verification and the monitor.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Ready,
    Pending,
    TimedOut,
}

pub(crate) fn period_from_hz(hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(hz.max(1)))
}

/// Poll-with-deadline: repeatedly probes a condition at a fixed rate until it
/// holds or the deadline passes.
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    started: Instant,
    timeout: Duration,
    period: Duration,
}

impl Poller {
    pub fn new(rate_hz: u32, timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
            period: period_from_hz(rate_hz),
        }
    }

    /// Classify one probe result against the deadline.
    pub fn check(&self, ready: bool) -> PollStatus {
        if ready {
            PollStatus::Ready
        } else if self.started.elapsed() >= self.timeout {
            PollStatus::TimedOut
        } else {
            PollStatus::Pending
        }
    }

    /// Block until `probe` returns true ([`PollStatus::Ready`]) or the
    /// deadline passes ([`PollStatus::TimedOut`]). Never returns `Pending`.
    pub fn wait(self, mut probe: impl FnMut() -> bool) -> PollStatus {
        loop {
            match self.check(probe()) {
                PollStatus::Pending => std::thread::sleep(self.period),
                done => return done,
            }
        }
    }
}

/// Fixed-rate loop pacing. If the loop falls behind, the schedule restarts
/// from now instead of bursting to catch up.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(rate_hz: u32) -> Self {
        let period = period_from_hz(rate_hz);
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        if self.next > now {
            std::thread::sleep(self.next - now);
            self.next += self.period;
        } else {
            self.next = now + self.period;
        }
    }
}

/// Lets an action through at most once per period.
#[derive(Debug)]
pub struct Throttle {
    period: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_probe_returns_immediately() {
        let start = Instant::now();
        let status = Poller::new(250, Duration::from_secs(4)).wait(|| true);
        assert_eq!(status, PollStatus::Ready);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn probe_eventually_ready() {
        let mut calls = 0;
        let status = Poller::new(1000, Duration::from_secs(2)).wait(|| {
            calls += 1;
            calls >= 5
        });
        assert_eq!(status, PollStatus::Ready);
        assert_eq!(calls, 5);
    }

    #[test]
    fn probe_times_out() {
        let start = Instant::now();
        let status = Poller::new(500, Duration::from_millis(30)).wait(|| false);
        assert_eq!(status, PollStatus::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn check_is_tri_state() {
        let poller = Poller::new(100, Duration::from_secs(10));
        assert_eq!(poller.check(true), PollStatus::Ready);
        assert_eq!(poller.check(false), PollStatus::Pending);
        let expired = Poller::new(100, Duration::ZERO);
        assert_eq!(expired.check(false), PollStatus::TimedOut);
    }

    #[test]
    fn throttle_limits_rate() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());

        let mut open = Throttle::new(Duration::ZERO);
        assert!(open.ready());
        assert!(open.ready());
    }

    #[test]
    fn ticker_paces_loop() {
        let mut ticker = Ticker::new(200);
        let start = Instant::now();
        for _ in 0..4 {
            ticker.tick();
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn zero_rate_is_clamped() {
        assert_eq!(period_from_hz(0), Duration::from_secs(1));
    }
}
