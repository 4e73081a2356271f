//! Scripted in-memory gateway for tests

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use super::traits::{ExchangeGateway, GatewayConnector, GatewayError};
use super::types::*;

pub fn api_error(status: u16, reason: &str) -> GatewayError {
    GatewayError::Api { status, reason: reason.to_string(), body: None }
}

pub fn ticker(contract: &str, last: Decimal) -> Ticker {
    Ticker { contract: contract.to_string(), last }
}

#[derive(Default)]
pub struct MockGateway {
    /// Consumed one per call; the last successful snapshot repeats once drained
    ticker_script: Mutex<VecDeque<Result<Vec<Ticker>, GatewayError>>>,
    sticky_tickers: Mutex<Vec<Ticker>>,
    fail_tickers: AtomicBool,
    positions: Mutex<Vec<Position>>,
    contracts: Mutex<HashMap<String, Contract>>,
    order_failures: Mutex<VecDeque<GatewayError>>,
    fail_orders: AtomicBool,
    next_order_id: AtomicU64,
    pub orders: Mutex<Vec<FuturesOrder>>,
    pub order_attempts: Mutex<Vec<Instant>>,
    pub ticker_calls: AtomicU64,
    pub contract_calls: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_prices(&self, prices: &[(&str, Decimal)]) {
        *self.sticky_tickers.lock().unwrap() = prices.iter().map(|(c, p)| ticker(c, *p)).collect();
    }

    /// One snapshot per ticker call, in order
    pub fn script_prices(&self, contract: &str, prices: &[Decimal]) {
        let mut script = self.ticker_script.lock().unwrap();
        for p in prices {
            script.push_back(Ok(vec![ticker(contract, *p)]));
        }
    }

    pub fn push_ticker_result(&self, result: Result<Vec<Ticker>, GatewayError>) {
        self.ticker_script.lock().unwrap().push_back(result);
    }

    pub fn set_fail_tickers(&self, fail: bool) {
        self.fail_tickers.store(fail, Ordering::SeqCst);
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock().unwrap() = positions;
    }

    pub fn add_contract(&self, name: &str, tick: Decimal, step: Decimal) {
        self.contracts.lock().unwrap().insert(
            name.to_string(),
            Contract { name: name.to_string(), order_price_round: tick, quanto_multiplier: step },
        );
    }

    pub fn push_order_failure(&self, e: GatewayError) {
        self.order_failures.lock().unwrap().push_back(e);
    }

    pub fn set_fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    pub fn placed_orders(&self) -> Vec<FuturesOrder> {
        self.orders.lock().unwrap().clone()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.order_attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for MockGateway {
    async fn list_tickers(&self, _settle: &str) -> Result<Vec<Ticker>, GatewayError> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tickers.load(Ordering::SeqCst) {
            return Err(api_error(503, "SERVICE_UNAVAILABLE"));
        }
        let scripted = self.ticker_script.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(tickers)) => {
                *self.sticky_tickers.lock().unwrap() = tickers.clone();
                Ok(tickers)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.sticky_tickers.lock().unwrap().clone()),
        }
    }

    async fn list_positions(&self, _settle: &str) -> Result<Vec<Position>, GatewayError> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_contract(&self, _settle: &str, contract: &str) -> Result<Contract, GatewayError> {
        self.contract_calls.fetch_add(1, Ordering::SeqCst);
        self.contracts
            .lock()
            .unwrap()
            .get(contract)
            .cloned()
            .ok_or_else(|| api_error(400, "CONTRACT_NOT_FOUND"))
    }

    async fn create_order(&self, _settle: &str, order: &FuturesOrder) -> Result<OrderResponse, GatewayError> {
        self.order_attempts.lock().unwrap().push(Instant::now());
        if let Some(e) = self.order_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(api_error(400, "INSUFFICIENT_AVAILABLE"));
        }
        self.orders.lock().unwrap().push(order.clone());
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderResponse { id: id.to_string() })
    }
}

/// Hands out the same mock session and counts connects
pub struct MockConnector {
    pub gateway: Arc<MockGateway>,
    pub connects: AtomicU64,
}

impl MockConnector {
    pub fn new(gateway: Arc<MockGateway>) -> Arc<Self> {
        Arc::new(Self { gateway, connects: AtomicU64::new(0) })
    }

    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl GatewayConnector for MockConnector {
    fn connect(&self) -> Result<Arc<dyn ExchangeGateway>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.gateway.clone())
    }
}
