//! Position Closer
//!
//! Reduce-only IOC close with a bounded number of attempts. When every attempt
//! fails the position is left open and a critical event is raised; the
//! `exhausted` counter makes those events visible to monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::broker::RequestBroker;
use crate::exchange::{Direction, FuturesOrder};
use crate::throttle::ErrorLogThrottle;

pub const CLOSE_MAX_ATTEMPTS: u32 = 3;
pub const CLOSE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed { order_id: String },
    Exhausted,
}

pub struct PositionCloser {
    symbol: String,
    broker: Arc<RequestBroker>,
    throttle: Arc<ErrorLogThrottle>,
    max_attempts: u32,
    retry_delay: Duration,
    exhausted: AtomicU64,
}

impl PositionCloser {
    pub fn new(symbol: String, broker: Arc<RequestBroker>, throttle: Arc<ErrorLogThrottle>) -> Self {
        Self {
            symbol,
            broker,
            throttle,
            max_attempts: CLOSE_MAX_ATTEMPTS,
            retry_delay: CLOSE_RETRY_DELAY,
            exhausted: AtomicU64::new(0),
        }
    }

    /// Close `qty` contracts of a `direction` position
    pub async fn close(&self, direction: Direction, qty: i64) -> CloseOutcome {
        for attempt in 0..self.max_attempts {
            let order = FuturesOrder::market_close(&self.symbol, direction, qty);
            match self.broker.create_order(order).await {
                Ok(resp) => {
                    info!("[{}][{}] Position closed: qty={}, ID={}", self.symbol, direction.tag(), qty, resp.id);
                    return CloseOutcome::Closed { order_id: resp.id };
                }
                Err(e) => {
                    let cause = format!("{}_{}", attempt, e);
                    let key = ErrorLogThrottle::key("close_position", direction.as_str(), &cause);
                    if self.throttle.should_log(&key) {
                        error!(
                            "[{}][{}] Position close failed (attempt {}): {}",
                            self.symbol, direction.tag(), attempt + 1, e
                        );
                    }
                    if attempt + 1 < self.max_attempts {
                        sleep(self.retry_delay).await;
                    }
                }
            }
        }

        self.exhausted.fetch_add(1, Ordering::SeqCst);
        error!(
            critical = true,
            "[{}][{}] CRITICAL: failed to close position after {} attempts, position left open",
            self.symbol, direction.tag(), self.max_attempts
        );
        CloseOutcome::Exhausted
    }

    /// Number of closes that ran out of attempts
    pub fn exhausted_count(&self) -> u64 {
        self.exhausted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerSettings;
    use crate::exchange::mock::{api_error, MockConnector, MockGateway};
    use crate::test_support::LogCapture;

    fn closer(gw: &Arc<MockGateway>) -> PositionCloser {
        let settings = BrokerSettings { rate_limit_delay: Duration::ZERO, ..BrokerSettings::default() };
        let broker = RequestBroker::new(settings, MockConnector::new(gw.clone())).unwrap();
        PositionCloser::new("BTC_USDT".to_string(), Arc::new(broker), Arc::new(ErrorLogThrottle::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_exhaust_without_fourth_attempt() {
        let (logs, _guard) = LogCapture::install();
        let gw = MockGateway::new();
        gw.set_fail_orders(true);
        let closer = closer(&gw);

        let outcome = closer.close(Direction::Long, 7).await;
        assert_eq!(outcome, CloseOutcome::Exhausted);
        assert_eq!(closer.exhausted_count(), 1);

        sleep(Duration::from_secs(5)).await;
        let times = gw.attempt_times();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert_eq!(pair[1].duration_since(pair[0]), Duration::from_millis(100));
        }

        // distinct attempt numbers are distinct throttle keys
        assert_eq!(logs.count("Position close failed"), 3);
        let terminal: Vec<String> = logs
            .contents()
            .lines()
            .filter(|l| l.contains("CRITICAL: failed to close position after 3 attempts"))
            .map(str::to_string)
            .collect();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].contains("ERROR"));
        assert!(terminal[0].contains("critical=true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_recovers_after_transient_failure() {
        let gw = MockGateway::new();
        gw.push_order_failure(api_error(502, "BAD_GATEWAY"));
        let closer = closer(&gw);

        let outcome = closer.close(Direction::Short, 4).await;
        assert_eq!(outcome, CloseOutcome::Closed { order_id: "1".to_string() });
        assert_eq!(gw.attempt_times().len(), 2);
        assert_eq!(closer.exhausted_count(), 0);

        let placed = gw.placed_orders();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].size, 4);
        assert!(placed[0].reduce_only);
        assert_eq!(placed[0].tif, "ioc");
    }
}
