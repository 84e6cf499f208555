use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Grants at most one alert per cooldown window.
pub struct AlertThrottle {
    cooldown: Duration,
    last_fired: Mutex<Option<Instant>>,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: Mutex::new(None),
        }
    }

    /// Returns `true` and starts a new window if the previous one has elapsed.
    pub fn try_fire(&self) -> bool {
        let mut last = self
            .last_fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        match *last {
            Some(at) if now.duration_since(at) < self.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn reset(&self) {
        *self
            .last_fired
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
