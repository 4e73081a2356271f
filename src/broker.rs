//! Request Broker
//!
//! Single gate for every exchange call:
//! - global in-flight cap (semaphore permit per call)
//! - minimum spacing between dispatches, serialized per broker
//! - price and position caches refreshed by background loops
//! - reconnect when a cache has been stale for too long
//!
//! Caches are immutable snapshots swapped whole, so a reader sees either the
//! previous refresh or the next one, never a mix.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{error, info};

use crate::config::BotConfig;
use crate::throttle::ErrorLogThrottle;
use crate::exchange::{
    Contract, ExchangeGateway, FuturesOrder, GatewayConnector, GatewayError, OrderResponse, Position,
};

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub settle: String,
    pub rate_limit_delay: Duration,
    pub refresh_interval: Duration,
    /// Pause after a failed refresh before trying again
    pub error_backoff: Duration,
    pub max_cache_delay: Duration,
    pub max_in_flight: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            settle: "usdt".to_string(),
            rate_limit_delay: Duration::from_millis(100),
            refresh_interval: Duration::from_millis(1100),
            error_backoff: Duration::from_secs(1),
            max_cache_delay: Duration::from_secs(60),
            max_in_flight: 1000,
        }
    }
}

impl BrokerSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            settle: config.settle.clone(),
            rate_limit_delay: config.rate_limit_delay(),
            refresh_interval: config.refresh_interval(),
            max_cache_delay: config.max_cache_delay(),
            max_in_flight: config.max_concurrent_symbols,
            ..Self::default()
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    pub prices: HashMap<String, Decimal>,
    pub updated_at: Option<Instant>,
}

impl PriceSnapshot {
    pub fn get(&self, symbol: &str) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionSnapshot {
    pub positions: Vec<Position>,
    pub updated_at: Option<Instant>,
}

impl PositionSnapshot {
    pub fn for_symbol(&self, symbol: &str) -> Vec<Position> {
        self.positions.iter().filter(|p| p.contract == symbol).cloned().collect()
    }
}

/// Which cache a refresh loop maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFeed {
    Prices,
    Positions,
}

impl CacheFeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheFeed::Prices => "price",
            CacheFeed::Positions => "positions",
        }
    }
}

// ============================================================================
// Broker
// ============================================================================

pub struct RequestBroker {
    settings: BrokerSettings,
    connector: Arc<dyn GatewayConnector>,
    gateway: RwLock<Arc<dyn ExchangeGateway>>,
    limiter: Arc<Semaphore>,
    /// Dispatch time of the most recently scheduled call
    last_dispatch: Mutex<Option<Instant>>,
    prices: RwLock<Arc<PriceSnapshot>>,
    positions: RwLock<Arc<PositionSnapshot>>,
    reconnects: AtomicU64,
    /// Refresh-loop failure logs
    throttle: ErrorLogThrottle,
}

impl RequestBroker {
    pub fn new(settings: BrokerSettings, connector: Arc<dyn GatewayConnector>) -> Result<Self, GatewayError> {
        let gateway = connector.connect()?;
        let limiter = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Ok(Self {
            settings,
            connector,
            gateway: RwLock::new(gateway),
            limiter,
            last_dispatch: Mutex::new(None),
            prices: RwLock::new(Arc::new(PriceSnapshot::default())),
            positions: RwLock::new(Arc::new(PositionSnapshot::default())),
            reconnects: AtomicU64::new(0),
            throttle: ErrorLogThrottle::new(),
        })
    }

    /// Run one gateway call under the concurrency cap and rate limit.
    /// Failures are logged and handed back; nothing is retried here.
    pub async fn execute<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, GatewayError>
    where
        F: FnOnce(Arc<dyn ExchangeGateway>) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| GatewayError::Unavailable("call limiter closed".to_string()))?;

        self.wait_for_slot().await;

        let gateway = self.gateway.read().await.clone();
        match call(gateway).await {
            Ok(v) => Ok(v),
            Err(e) => {
                error!("[BROKER] {} failed: {}", operation, e);
                Err(e)
            }
        }
    }

    /// Reserve the next dispatch slot, then sleep until it without holding the lock
    async fn wait_for_slot(&self) {
        let delay = self.settings.rate_limit_delay;
        let dispatch_at = {
            let mut last = self.last_dispatch.lock().await;
            let now = Instant::now();
            let at = match *last {
                Some(prev) => (prev + delay).max(now),
                None => now,
            };
            *last = Some(at);
            at
        };
        if dispatch_at > Instant::now() {
            sleep_until(dispatch_at).await;
        }
    }

    // ==================== Operations ====================

    pub async fn get_contract(&self, symbol: &str) -> Result<Contract, GatewayError> {
        let settle = self.settings.settle.clone();
        let symbol = symbol.to_string();
        self.execute("get_contract", move |gw| async move { gw.get_contract(&settle, &symbol).await })
            .await
    }

    pub async fn create_order(&self, order: FuturesOrder) -> Result<OrderResponse, GatewayError> {
        let settle = self.settings.settle.clone();
        self.execute("create_order", move |gw| async move { gw.create_order(&settle, &order).await })
            .await
    }

    // ==================== Caches ====================

    pub async fn price_snapshot(&self) -> Arc<PriceSnapshot> {
        self.prices.read().await.clone()
    }

    pub async fn price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().await.get(symbol)
    }

    pub async fn position_snapshot(&self) -> Arc<PositionSnapshot> {
        self.positions.read().await.clone()
    }

    pub async fn positions_for(&self, symbol: &str) -> Vec<Position> {
        self.positions.read().await.for_symbol(symbol)
    }

    /// Time of the last successful refresh of `feed`
    pub async fn last_update(&self, feed: CacheFeed) -> Option<Instant> {
        match feed {
            CacheFeed::Prices => self.price_snapshot().await.updated_at,
            CacheFeed::Positions => self.position_snapshot().await.updated_at,
        }
    }

    /// Fetch all tickers and swap in a fresh price snapshot
    pub async fn refresh_prices(&self) -> Result<usize, GatewayError> {
        let settle = self.settings.settle.clone();
        let tickers = self
            .execute("list_tickers", move |gw| async move { gw.list_tickers(&settle).await })
            .await?;

        let prices: HashMap<String, Decimal> = tickers.into_iter().map(|t| (t.contract, t.last)).collect();
        let count = prices.len();
        *self.prices.write().await = Arc::new(PriceSnapshot { prices, updated_at: Some(Instant::now()) });
        Ok(count)
    }

    /// Fetch all positions and swap in a fresh position snapshot
    pub async fn refresh_positions(&self) -> Result<usize, GatewayError> {
        let settle = self.settings.settle.clone();
        let positions = self
            .execute("list_positions", move |gw| async move { gw.list_positions(&settle).await })
            .await?;

        let count = positions.len();
        *self.positions.write().await = Arc::new(PositionSnapshot { positions, updated_at: Some(Instant::now()) });
        Ok(count)
    }

    /// One-shot ticker load before the loops start; failure is not fatal
    pub async fn initial_price_load(&self) {
        match self.refresh_prices().await {
            Ok(n) => info!("[BROKER] Initial price load complete: {} contracts", n),
            Err(e) => error!("[BROKER] Initial price load failed: {}", e),
        }
    }

    /// Refresh one cache forever. Transient failures are tolerated; a cache
    /// whose `updated_at` is older than `max_cache_delay` triggers one
    /// reconnect per window.
    pub async fn run_refresh_loop(self: Arc<Self>, feed: CacheFeed) {
        // Staleness is measured from the later of the last update and the
        // last reconnect (or loop start)
        let mut window_start = Instant::now();
        loop {
            let result = match feed {
                CacheFeed::Prices => self.refresh_prices().await,
                CacheFeed::Positions => self.refresh_positions().await,
            };

            match result {
                Ok(_) => sleep(self.settings.refresh_interval).await,
                Err(e) => {
                    let key = ErrorLogThrottle::key("cache_refresh", feed.as_str(), &e.to_string());
                    if self.throttle.should_log(&key) {
                        error!("[BROKER] {} cache refresh failed: {}", feed.as_str(), e);
                    }
                    let since = match self.last_update(feed).await {
                        Some(updated) => updated.max(window_start),
                        None => window_start,
                    };
                    if since.elapsed() > self.settings.max_cache_delay {
                        self.reconnect().await;
                        window_start = Instant::now();
                    }
                    sleep(self.settings.error_backoff).await;
                }
            }
        }
    }

    /// Drop the current session and build a new one
    pub async fn reconnect(&self) {
        info!("[BROKER] Reconnecting to API...");
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        match self.connector.connect() {
            Ok(gateway) => *self.gateway.write().await = gateway,
            Err(e) => error!("[BROKER] Reconnect failed: {}", e),
        }
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}
