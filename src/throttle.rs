//! Error-log throttle
//!
//! Lets a given (operation, direction, cause) key through at most once per
//! suppression window. Only log volume is limited; callers still retry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const ERROR_LOG_SUPPRESSION: Duration = Duration::from_secs(600);

/// Prune expired entries once the map grows past this
const PRUNE_THRESHOLD: usize = 1024;

pub struct ErrorLogThrottle {
    window: Duration,
    last_emitted: Mutex<HashMap<String, Instant>>,
}

impl ErrorLogThrottle {
    pub fn new() -> Self {
        Self::with_window(ERROR_LOG_SUPPRESSION)
    }

    pub fn with_window(window: Duration) -> Self {
        Self { window, last_emitted: Mutex::new(HashMap::new()) }
    }

    /// Build the throttle key for a failed operation
    pub fn key(operation: &str, direction: &str, cause: &str) -> String {
        format!("{}_{}_{}", operation, direction, cause)
    }

    /// True when `key` has not been emitted within the window; records the emission
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = match self.last_emitted.lock() {
            Ok(m) => m,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(last) = map.get(key) {
            if now.duration_since(*last) <= self.window {
                return false;
            }
        }

        if map.len() >= PRUNE_THRESHOLD {
            let window = self.window;
            map.retain(|_, t| now.duration_since(*t) <= window);
        }
        map.insert(key.to_string(), now);
        true
    }
}

impl Default for ErrorLogThrottle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_key_suppressed_within_window() {
        let throttle = ErrorLogThrottle::new();
        let key = ErrorLogThrottle::key("open_market_order", "long", "API Error: 400 X");

        assert!(throttle.should_log(&key));
        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(!throttle.should_log(&key));

        // window measured from the first emission
        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(throttle.should_log(&key));
        assert!(!throttle.should_log(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_independent() {
        let throttle = ErrorLogThrottle::new();
        assert!(throttle.should_log(&ErrorLogThrottle::key("close_position", "long", "a")));
        assert!(throttle.should_log(&ErrorLogThrottle::key("close_position", "short", "a")));
        assert!(throttle.should_log(&ErrorLogThrottle::key("close_position", "long", "b")));
        assert!(!throttle.should_log(&ErrorLogThrottle::key("close_position", "long", "a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_keeps_live_entries() {
        let throttle = ErrorLogThrottle::with_window(Duration::from_secs(10));
        for i in 0..PRUNE_THRESHOLD {
            assert!(throttle.should_log(&format!("k{}", i)));
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(throttle.should_log("fresh"));
        assert!(throttle.last_emitted.lock().unwrap().len() == 1);
        assert!(!throttle.should_log("fresh"));
    }
}
