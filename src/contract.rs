//! Contract Resolver
//!
//! Fetches tick size and quantity step for a symbol once, before any level
//! starts. An invalid contract aborts that symbol only.

use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::broker::RequestBroker;
use crate::exchange::{Contract, Direction, GatewayError};

/// Validated per-symbol trading increments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractSpec {
    /// Price rounding increment, > 0
    pub tick_size: Decimal,
    /// Base units per contract, > 0
    pub step_size: Decimal,
}

impl ContractSpec {
    pub fn from_contract(symbol: &str, contract: &Contract) -> Result<Self, ContractError> {
        let tick_size = contract.order_price_round;
        let step_size = contract.quanto_multiplier;
        if tick_size <= Decimal::ZERO {
            return Err(ContractError::InvalidTickSize { symbol: symbol.to_string(), value: tick_size });
        }
        if step_size <= Decimal::ZERO {
            return Err(ContractError::InvalidStepSize { symbol: symbol.to_string(), value: step_size });
        }
        Ok(Self { tick_size, step_size })
    }

    /// Round to a whole number of ticks with the given strategy
    pub fn round_to_tick(&self, price: Decimal, strategy: RoundingStrategy) -> Decimal {
        let ticks = (price / self.tick_size).round_dp_with_strategy(0, strategy);
        ticks * self.tick_size
    }

    /// Nearest tick, ties to even
    pub fn quantize(&self, price: Decimal) -> Decimal {
        self.round_to_tick(price, RoundingStrategy::MidpointNearestEven)
    }

    /// Round against the level: up for longs, down for shorts
    pub fn round_directional(&self, price: Decimal, direction: Direction) -> Decimal {
        let strategy = match direction {
            Direction::Long => RoundingStrategy::ToPositiveInfinity,
            Direction::Short => RoundingStrategy::ToNegativeInfinity,
        };
        self.round_to_tick(price, strategy)
    }
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("failed to fetch contract {symbol}: {source}")]
    Fetch {
        symbol: String,
        #[source]
        source: GatewayError,
    },

    #[error("Invalid tick_size for {symbol}: {value}")]
    InvalidTickSize { symbol: String, value: Decimal },

    #[error("Invalid step_size for {symbol}: {value}")]
    InvalidStepSize { symbol: String, value: Decimal },
}

pub struct ContractResolver {
    broker: Arc<RequestBroker>,
}

impl ContractResolver {
    pub fn new(broker: Arc<RequestBroker>) -> Self {
        Self { broker }
    }

    pub async fn resolve(&self, symbol: &str) -> Result<ContractSpec, ContractError> {
        let contract = self
            .broker
            .get_contract(symbol)
            .await
            .map_err(|source| ContractError::Fetch { symbol: symbol.to_string(), source })?;

        match ContractSpec::from_contract(symbol, &contract) {
            Ok(spec) => {
                info!("[{}] Contract: tick={} step={}", symbol, spec.tick_size, spec.step_size);
                Ok(spec)
            }
            Err(e) => {
                error!("[{}] Contract info rejected: {}", symbol, e);
                Err(e)
            }
        }
    }
}
