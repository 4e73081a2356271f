//! Level State Machine
//!
//! One instance per (symbol, direction, level):
//!
//! ```text
//! ARMED --price crosses trigger--> TRIGGERED --order filled--> OPEN
//!   ^                                  |                         |
//!   |<---- qty < 1 / open failed ------+                         v
//!   +<---------------- retrace confirmed ---------------- RETRACE_WAIT
//! ```
//!
//! There is no terminal state; a machine cycles for the lifetime of its symbol.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::RequestBroker;
use crate::closer::{CloseOutcome, PositionCloser};
use crate::config::LevelConfig;
use crate::contract::ContractSpec;
use crate::exchange::{Direction, FuturesOrder, GatewayError};
use crate::throttle::ErrorLogThrottle;

// ============================================================================
// Pure calculations
// ============================================================================

/// `base * (1 + percent/100)`, rounded against the level to a whole tick
pub fn trigger_price(base: Decimal, percent: Decimal, spec: &ContractSpec, direction: Direction) -> Decimal {
    let raw = base * (Decimal::ONE + percent / dec!(100));
    spec.round_directional(raw, direction)
}

/// Contracts for `amount` notional at `trigger`, rounded half-up
pub fn order_quantity(amount: Decimal, trigger: Decimal, step: Decimal) -> Decimal {
    let per_contract = trigger * step;
    if per_contract <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    amount
        .checked_div(per_contract)
        .map(|q| q.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .unwrap_or(Decimal::ZERO)
}

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelState {
    Armed,
    Triggered,
    Open,
    RetraceWait,
}

/// What happens to the level's position once a retrace is confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetracePolicy {
    /// Keep the position and rearm
    Hold,
    /// Reduce-only close through the Position Closer, then rearm
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionRecord {
    pub direction: Direction,
    pub qty: i64,
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Quantity rounded below one contract; nothing sent
    Skipped { qty: Decimal },
    OpenFailed,
    Completed { order_id: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub opens: u64,
    pub skips: u64,
    pub open_failures: u64,
    pub retraces: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LevelTiming {
    /// Price poll interval while waiting on a condition
    pub poll_interval: Duration,
    pub skip_backoff: Duration,
    pub open_retry_backoff: Duration,
}

impl Default for LevelTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            skip_backoff: Duration::from_millis(10),
            open_retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Everything a level needs from its symbol
#[derive(Clone)]
pub struct LevelContext {
    pub symbol: String,
    pub spec: ContractSpec,
    pub broker: Arc<RequestBroker>,
    pub closer: Arc<PositionCloser>,
    pub throttle: Arc<ErrorLogThrottle>,
    pub policy: RetracePolicy,
    pub timing: LevelTiming,
}

impl LevelContext {
    /// Latest cached price quantized to the tick; waits until the symbol is cached
    pub async fn current_price(&self) -> Decimal {
        loop {
            if let Some(price) = self.broker.price(&self.symbol).await {
                return self.spec.quantize(price);
            }
            let key = ErrorLogThrottle::key("price_missing", "", &self.symbol);
            if self.throttle.should_log(&key) {
                warn!("[{}] Price not in cache, waiting for refresh", self.symbol);
            }
            sleep(self.timing.poll_interval).await;
        }
    }
}

// ============================================================================
// Machine
// ============================================================================

pub struct LevelMachine {
    ctx: LevelContext,
    direction: Direction,
    level: LevelConfig,
    trigger: Decimal,
    state: LevelState,
    /// Position held by this level, aggregated across cycles
    position: Option<PositionRecord>,
    stats: LevelStats,
}

impl LevelMachine {
    pub fn new(ctx: LevelContext, direction: Direction, level: LevelConfig, base_price: Decimal) -> Self {
        let trigger = trigger_price(base_price, level.percent, &ctx.spec, direction);
        Self {
            ctx,
            direction,
            level,
            trigger,
            state: LevelState::Armed,
            position: None,
            stats: LevelStats::default(),
        }
    }

    pub fn trigger(&self) -> Decimal {
        self.trigger
    }

    #[cfg(test)]
    pub fn state(&self) -> LevelState {
        self.state
    }

    #[cfg(test)]
    pub fn position(&self) -> Option<&PositionRecord> {
        self.position.as_ref()
    }

    /// Signed contracts currently held by this level
    pub fn open_qty(&self) -> i64 {
        self.position.as_ref().map_or(0, |p| p.direction.sign() * p.qty)
    }

    pub fn stats(&self) -> LevelStats {
        self.stats
    }

    /// Cycle until the task is dropped
    pub async fn run(mut self) {
        info!(
            "[{}][{}] Level {}% armed: trigger={} amount={} tp={}% sl={}%",
            self.ctx.symbol, self.direction.tag(), self.level.percent, self.trigger(),
            self.level.amount, self.level.tp_percent, self.level.sl_percent
        );
        loop {
            if let CycleOutcome::Completed { .. } = self.run_cycle().await {
                let stats = self.stats();
                let last_order = self.position.as_ref().map_or("-", |p| p.order_id.as_str());
                info!(
                    "[{}][{}] Level {}% rearmed: opens={} retraces={} skips={} open_failures={} held={} last_order={}",
                    self.ctx.symbol, self.direction.tag(), self.level.percent, stats.opens,
                    stats.retraces, stats.skips, stats.open_failures, self.open_qty(), last_order
                );
            }
        }
    }

    /// One pass from ARMED back to ARMED
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.transition(LevelState::Armed);
        self.wait_for_trigger().await;
        self.transition(LevelState::Triggered);

        let qty = order_quantity(self.level.amount, self.trigger, self.ctx.spec.step_size);
        let size = match qty.to_i64() {
            Some(size) if qty >= Decimal::ONE => size,
            _ => return self.skip(qty).await,
        };

        let order_id = match self.open_market_order(size).await {
            Ok(id) => id,
            Err(_) => {
                self.stats.open_failures += 1;
                sleep(self.ctx.timing.open_retry_backoff).await;
                self.transition(LevelState::Armed);
                return CycleOutcome::OpenFailed;
            }
        };

        self.transition(LevelState::Open);
        self.stats.opens += 1;
        match self.position.as_mut() {
            Some(held) => {
                held.qty += size;
                held.order_id = order_id.clone();
            }
            None => {
                self.position = Some(PositionRecord { direction: self.direction, qty: size, order_id: order_id.clone() });
            }
        }

        self.transition(LevelState::RetraceWait);
        self.wait_for_retrace().await;
        self.stats.retraces += 1;

        if self.ctx.policy == RetracePolicy::Close {
            self.close_position().await;
        }

        self.transition(LevelState::Armed);
        CycleOutcome::Completed { order_id }
    }

    fn transition(&mut self, next: LevelState) {
        if self.state != next {
            debug!("[{}][{}] {:?} -> {:?}", self.ctx.symbol, self.direction.tag(), self.state, next);
        }
        self.state = next;
    }

    async fn skip(&mut self, qty: Decimal) -> CycleOutcome {
        self.stats.skips += 1;
        let key = ErrorLogThrottle::key("level_skip", self.direction.as_str(), &self.level.percent.to_string());
        if self.ctx.throttle.should_log(&key) {
            warn!(
                "[{}][{}] Order size too small at {}%: qty={}",
                self.ctx.symbol, self.direction.tag(), self.level.percent, qty
            );
        }
        sleep(self.ctx.timing.skip_backoff).await;
        self.transition(LevelState::Armed);
        CycleOutcome::Skipped { qty }
    }

    fn triggered(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= self.trigger,
            Direction::Short => price <= self.trigger,
        }
    }

    fn retraced(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price < self.trigger,
            Direction::Short => price > self.trigger,
        }
    }

    async fn wait_for_trigger(&self) {
        loop {
            let price = self.ctx.current_price().await;
            if self.triggered(price) {
                return;
            }
            sleep(self.ctx.timing.poll_interval).await;
        }
    }

    async fn wait_for_retrace(&self) {
        loop {
            let price = self.ctx.current_price().await;
            if self.retraced(price) {
                info!(
                    "[{}][{}] Retrace confirmed at {} (trigger {})",
                    self.ctx.symbol, self.direction.tag(), price, self.trigger
                );
                return;
            }
            sleep(self.ctx.timing.poll_interval).await;
        }
    }

    async fn open_market_order(&self, size: i64) -> Result<String, GatewayError> {
        let order = FuturesOrder::market_open(&self.ctx.symbol, self.direction, size);
        match self.ctx.broker.create_order(order).await {
            Ok(resp) => {
                info!(
                    "[{}][{}] Position opened: qty={}, ID={}",
                    self.ctx.symbol, self.direction.tag(), size, resp.id
                );
                Ok(resp.id)
            }
            Err(e) => {
                let key = ErrorLogThrottle::key("open_market_order", self.direction.as_str(), &e.to_string());
                if self.ctx.throttle.should_log(&key) {
                    error!("[{}][{}] Order open failed: {}", self.ctx.symbol, self.direction.tag(), e);
                }
                Err(e)
            }
        }
    }

    /// Close everything the level holds; kept on exhaustion so the next
    /// retrace retries the full quantity
    async fn close_position(&mut self) {
        let Some(held) = self.position.clone() else {
            return;
        };
        match self.ctx.closer.close(held.direction, held.qty).await {
            CloseOutcome::Closed { .. } => self.position = None,
            CloseOutcome::Exhausted => {}
        }
    }
}
