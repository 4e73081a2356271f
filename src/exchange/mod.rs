//! Gate.io Futures Exchange Layer
//!
//! REST gateway, request signing and wire types.

pub mod auth;
pub mod rest;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use auth::GateAuth;
pub use rest::GateConnector;
pub use traits::{ExchangeGateway, GatewayConnector, GatewayError};
pub use types::*;
