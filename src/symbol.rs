//! Per-symbol supervision unit
//!
//! Resolves the contract, captures the base price, then owns every task the
//! symbol runs: one per primary level, one per non-empty additional/counter
//! group, and the global take-profit monitor.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info};

use crate::broker::RequestBroker;
use crate::closer::PositionCloser;
use crate::config::{BotConfig, LevelGroup};
use crate::contract::{ContractResolver, ContractSpec};
use crate::exchange::Direction;
use crate::level::{LevelContext, LevelMachine, LevelTiming, RetracePolicy};
use crate::throttle::ErrorLogThrottle;

pub const GLOBAL_TP_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide handles every symbol shares
#[derive(Clone)]
pub struct BotShared {
    pub config: Arc<BotConfig>,
    pub broker: Arc<RequestBroker>,
    pub throttle: Arc<ErrorLogThrottle>,
}

pub struct SymbolBot {
    symbol: String,
    spec: ContractSpec,
    base_price: Decimal,
    level_count: usize,
    closer: Arc<PositionCloser>,
    tasks: JoinSet<()>,
}

impl SymbolBot {
    /// Initialize the symbol and spawn its tasks. An error here is fatal to
    /// this symbol only.
    pub async fn start(symbol: String, shared: BotShared) -> Result<Self> {
        let spec = ContractResolver::new(shared.broker.clone())
            .resolve(&symbol)
            .await
            .with_context(|| format!("[{}] contract initialization failed", symbol))?;

        let closer = Arc::new(PositionCloser::new(symbol.clone(), shared.broker.clone(), shared.throttle.clone()));
        let policy = if shared.config.close_on_retrace { RetracePolicy::Close } else { RetracePolicy::Hold };
        let ctx = LevelContext {
            symbol: symbol.clone(),
            spec,
            broker: shared.broker.clone(),
            closer: closer.clone(),
            throttle: shared.throttle.clone(),
            policy,
            timing: LevelTiming::default(),
        };

        let base_price = ctx.current_price().await;
        info!("[{}] Base price: {}", symbol, base_price);

        let mut tasks = JoinSet::new();
        let mut level_count = 0;
        for (group, direction, levels) in shared.config.level_groups() {
            match group {
                LevelGroup::Primary => {
                    for level in levels {
                        let machine = LevelMachine::new(ctx.clone(), direction, level.clone(), base_price);
                        tasks.spawn(machine.run());
                        level_count += 1;
                    }
                }
                LevelGroup::Additional | LevelGroup::Counter => {
                    if !levels.is_empty() {
                        tasks.spawn(idle_group(symbol.clone(), group, direction, levels.len()));
                    }
                }
            }
        }

        let monitor = GlobalTpMonitor::new(
            symbol.clone(),
            shared.broker.clone(),
            shared.config.global_tp_threshold,
            shared.config.use_realized_pnl,
        );
        tasks.spawn(monitor.run());

        Ok(Self { symbol, spec, base_price, level_count, closer, tasks })
    }

    pub fn spec(&self) -> ContractSpec {
        self.spec
    }

    pub fn base_price(&self) -> Decimal {
        self.base_price
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Wait on every task of the symbol. Dropping the bot aborts them.
    pub async fn run(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!("[{}] Task panicked: {}", self.symbol, e);
                }
            }
        }
        info!(
            "[{}] All tasks finished ({} levels, {} closes exhausted)",
            self.symbol, self.level_count, self.closer.exhausted_count()
        );
    }
}

async fn idle_group(symbol: String, group: LevelGroup, direction: Direction, count: usize) {
    info!(
        "[{}][{}] {} group: {} levels configured, no trading logic attached",
        symbol, direction.tag(), group.as_str(), count
    );
}

// ============================================================================
// Global take-profit monitor
// ============================================================================

/// Watches the symbol's summed PnL against `global_tp_threshold`. Reports
/// each upward crossing once; never trades.
pub struct GlobalTpMonitor {
    symbol: String,
    broker: Arc<RequestBroker>,
    threshold: Decimal,
    use_realized: bool,
    interval: Duration,
    above: bool,
}

impl GlobalTpMonitor {
    pub fn new(symbol: String, broker: Arc<RequestBroker>, threshold: Decimal, use_realized: bool) -> Self {
        Self { symbol, broker, threshold, use_realized, interval: GLOBAL_TP_INTERVAL, above: false }
    }

    pub async fn total_pnl(&self) -> Decimal {
        self.broker
            .positions_for(&self.symbol)
            .await
            .iter()
            .map(|p| p.pnl(self.use_realized))
            .sum()
    }

    /// Returns the PnL when this check is a new crossing
    pub async fn check(&mut self) -> Option<Decimal> {
        let pnl = self.total_pnl().await;
        let reached = pnl >= self.threshold;
        let crossed = reached && !self.above;
        self.above = reached;
        crossed.then_some(pnl)
    }

    pub async fn run(mut self) {
        loop {
            if let Some(pnl) = self.check().await {
                info!(
                    "[{}] Global TP threshold reached: pnl={} threshold={} ({})",
                    self.symbol, pnl, self.threshold,
                    if self.use_realized { "realized" } else { "unrealized" }
                );
            }
            sleep(self.interval).await;
        }
    }
}
