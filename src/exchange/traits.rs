//! Exchange abstraction layer
//!
//! The engine only talks to the exchange through these traits; the REST
//! client and the test double both implement them.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::types::{Contract, FuturesOrder, OrderResponse, Position, Ticker};

// ======================= ERRORS =======================

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Exchange answered with a non-success status
    #[error("API Error: {status} {reason} - {}", body.as_deref().unwrap_or("No error details"))]
    Api {
        status: u16,
        reason: String,
        body: Option<String>,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// No session or permit could be obtained
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

// ======================= TRAITS =======================

/// Futures exchange session
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// All tickers for a settlement asset
    async fn list_tickers(&self, settle: &str) -> Result<Vec<Ticker>, GatewayError>;

    /// All open positions for a settlement asset
    async fn list_positions(&self, settle: &str) -> Result<Vec<Position>, GatewayError>;

    /// Contract metadata (tick size, quantity multiplier)
    async fn get_contract(&self, settle: &str, contract: &str) -> Result<Contract, GatewayError>;

    /// Submit an order
    async fn create_order(&self, settle: &str, order: &FuturesOrder) -> Result<OrderResponse, GatewayError>;
}

/// Builds fresh gateway sessions; used on startup and on reconnect
pub trait GatewayConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn ExchangeGateway>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let e = GatewayError::Api { status: 400, reason: "INVALID_PARAM_VALUE".into(), body: None };
        assert_eq!(e.to_string(), "API Error: 400 INVALID_PARAM_VALUE - No error details");

        let e = GatewayError::Api {
            status: 429,
            reason: "TOO_MANY_REQUESTS".into(),
            body: Some("slow down".into()),
        };
        assert!(e.to_string().ends_with("- slow down"));
    }
}
