use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Enforces a minimum interval between consecutive requests of one worker.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_request: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: None,
        }
    }

    /// Waits until `interval` has elapsed since the previous call returned.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request
            && !self.interval.is_zero()
        {
            sleep_until(last + self.interval).await;
        }
        self.last_request = Some(Instant::now());
    }
}
