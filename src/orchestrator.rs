//! Concurrency Orchestrator
//!
//! Starts the broker's cache loops and one supervision unit per symbol. A
//! symbol that fails to initialize is recorded and logged; the others keep
//! running.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

use crate::broker::{BrokerSettings, CacheFeed, RequestBroker};
use crate::config::BotConfig;
use crate::exchange::GatewayConnector;
use crate::symbol::{BotShared, SymbolBot};
use crate::throttle::ErrorLogThrottle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: String,
}

pub struct GridBot {
    shared: BotShared,
    /// Cache refresh loops
    background: JoinSet<()>,
    symbols: JoinSet<(String, Result<()>)>,
    /// Symbol per unit, for units that end without returning (panic).
    /// Symbols are unique, see `BotConfig::validate`.
    unit_symbols: HashMap<Id, String>,
    failures: Vec<SymbolFailure>,
}

impl GridBot {
    pub fn new(config: BotConfig, connector: Arc<dyn GatewayConnector>) -> Result<Self> {
        config.validate()?;
        let broker = RequestBroker::new(BrokerSettings::from_config(&config), connector)?;
        Ok(Self {
            shared: BotShared {
                config: Arc::new(config),
                broker: Arc::new(broker),
                throttle: Arc::new(ErrorLogThrottle::new()),
            },
            background: JoinSet::new(),
            symbols: JoinSet::new(),
            unit_symbols: HashMap::new(),
            failures: Vec::new(),
        })
    }

    pub fn broker(&self) -> &Arc<RequestBroker> {
        &self.shared.broker
    }

    pub fn failures(&self) -> &[SymbolFailure] {
        &self.failures
    }

    /// Load prices once, start the cache loops, then spawn every symbol
    pub async fn start(&mut self) {
        let broker = self.shared.broker.clone();
        broker.initial_price_load().await;
        self.background.spawn(broker.clone().run_refresh_loop(CacheFeed::Prices));
        self.background.spawn(broker.run_refresh_loop(CacheFeed::Positions));

        let symbols = self.shared.config.symbols.clone();
        info!("Starting {} symbols", symbols.len());
        for symbol in symbols {
            let shared = self.shared.clone();
            let name = symbol.clone();
            let handle = self.symbols.spawn(async move {
                let result = match SymbolBot::start(symbol.clone(), shared).await {
                    Ok(bot) => {
                        let spec = bot.spec();
                        info!(
                            "[{}] Started {} levels: base={} tick={} step={}",
                            symbol, bot.level_count(), bot.base_price(), spec.tick_size, spec.step_size
                        );
                        bot.run().await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                (symbol, result)
            });
            self.unit_symbols.insert(handle.id(), name);
        }
    }

    /// Wait for the next symbol unit to end and record it. `None` once no
    /// symbol is left.
    pub async fn supervise_next(&mut self) -> Option<String> {
        loop {
            let (symbol, result) = match self.symbols.join_next().await? {
                Ok(done) => {
                    self.unit_symbols.retain(|_, s| *s != done.0);
                    done
                }
                Err(e) => {
                    let Some(symbol) = self.unit_symbols.remove(&e.id()) else {
                        error!("Symbol task aborted: {}", e);
                        continue;
                    };
                    let reason = if e.is_panic() { "task panicked".to_string() } else { e.to_string() };
                    (symbol, Err(anyhow::anyhow!(reason)))
                }
            };
            match result {
                Ok(()) => warn!("[{}] Symbol stopped", symbol),
                Err(e) => {
                    error!("[{}] Symbol failed: {:#}", symbol, e);
                    self.failures.push(SymbolFailure { symbol: symbol.clone(), error: format!("{:#}", e) });
                }
            }
            return Some(symbol);
        }
    }

    /// Run until every symbol has ended
    pub async fn run(mut self) -> Result<()> {
        self.start().await;
        while self.supervise_next().await.is_some() {}

        info!("[BROKER] Reconnects: {}", self.broker().reconnect_count());
        if self.failures.is_empty() {
            info!("All symbols finished");
        } else {
            error!("{} symbols failed", self.failures().len());
            for failure in self.failures() {
                error!("[{}] {}", failure.symbol, failure.error);
            }
        }
        Ok(())
    }
}
