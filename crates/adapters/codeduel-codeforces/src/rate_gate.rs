use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between external API calls.
///
/// One gate is shared process-wide; every outbound call acquires it first.
/// A caller arriving before the interval has elapsed suspends until it
/// would no longer violate the budget. The mutex queue makes ordering
/// first-come-first-served; there is no priority across rooms.
pub struct RateGate {
    last_call: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until an external call is allowed, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let next_allowed = prev + self.min_interval;
            if next_allowed > Instant::now() {
                tokio::time::sleep_until(next_allowed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
