//! Received-traffic meter for connection diagnostics

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Default sliding window over which received traffic is summed
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window count of received frames and bytes
#[derive(Debug, Clone)]
pub struct TrafficMeter {
    samples: VecDeque<(Instant, usize)>,
    window: Duration,
}

impl Default for TrafficMeter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TrafficMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
        }
    }

    /// Record a frame of `bytes` received now
    pub fn record(&mut self, bytes: usize) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        self.prune(now);
    }

    /// Bytes received within the window, scaled to one second
    pub fn bytes_per_second(&self) -> f64 {
        let bytes: usize = self.in_window().map(|(_, bytes)| bytes).sum();
        bytes as f64 / self.window.as_secs_f64()
    }

    /// Number of frames received within the window
    pub fn frames_in_window(&self) -> usize {
        self.in_window().count()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    fn in_window(&self) -> impl Iterator<Item = &(Instant, usize)> {
        let now = Instant::now();
        let window = self.window;
        self.samples
            .iter()
            .filter(move |(at, _)| now.saturating_duration_since(*at) <= window)
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}
