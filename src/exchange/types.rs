//! Gate.io futures types
//!
//! Wire types for tickers, positions, contracts and orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// ======================= ENDPOINTS =======================

/// Gate.io futures endpoint configuration
#[derive(Debug, Clone)]
pub struct GateEndpoints {
    /// Scheme + host, e.g. `https://fx-api.gateio.ws`
    pub host: String,
    /// API prefix included in signed paths
    pub prefix: String,
}

impl GateEndpoints {
    pub fn mainnet() -> Self {
        Self {
            host: "https://fx-api.gateio.ws".to_string(),
            prefix: "/api/v4".to_string(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            host: "https://fx-api-testnet.gateio.ws".to_string(),
            prefix: "/api/v4".to_string(),
        }
    }

    pub fn select(testnet: bool) -> Self {
        if testnet { Self::testnet() } else { Self::mainnet() }
    }
}

// ======================= DIRECTION =======================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// Upper-case tag used in log prefixes
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Sign applied to an order size opening this direction
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ======================= MARKET DATA =======================

#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    pub contract: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub last: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Position {
    pub contract: String,
    /// Signed contract count (negative = short)
    #[serde(default)]
    pub size: i64,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub entry_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub mark_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub unrealised_pnl: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub realised_pnl: Option<Decimal>,
}

impl Position {
    pub fn pnl(&self, realized: bool) -> Decimal {
        let v = if realized { self.realised_pnl } else { self.unrealised_pnl };
        v.unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Contract {
    pub name: String,
    /// Price increment (tick size)
    #[serde(with = "rust_decimal::serde::str")]
    pub order_price_round: Decimal,
    /// Base units per contract (step size)
    #[serde(with = "rust_decimal::serde::str")]
    pub quanto_multiplier: Decimal,
}

// ======================= ORDER =======================

/// Futures order to place on Gate.io
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuturesOrder {
    pub contract: String,
    /// Signed size in contracts; positive buys, negative sells
    pub size: i64,
    /// "0" with tif=ioc makes it a market order
    pub price: String,
    pub tif: String,
    pub reduce_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl FuturesOrder {
    /// Market IOC order opening `qty` contracts in `direction`
    pub fn market_open(contract: &str, direction: Direction, qty: i64) -> Self {
        Self::market(contract, direction.sign() * qty, false)
    }

    /// Reduce-only market IOC order closing `qty` contracts of a `direction` position
    pub fn market_close(contract: &str, direction: Direction, qty: i64) -> Self {
        Self::market(contract, direction.opposite().sign() * qty, true)
    }

    fn market(contract: &str, size: i64, reduce_only: bool) -> Self {
        // Gate caps custom order text at 28 bytes including the "t-" prefix
        let tag = uuid::Uuid::new_v4().simple().to_string();
        Self {
            contract: contract.to_string(),
            size,
            price: "0".to_string(),
            tif: "ioc".to_string(),
            reduce_only,
            text: Some(format!("t-{}", &tag[..16])),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
}

fn id_as_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected order id: {}", other))),
    }
}
