//! Gate.io futures REST API client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::auth::GateAuth;
use super::traits::{ExchangeGateway, GatewayConnector, GatewayError};
use super::types::*;

/// Error payload Gate returns with non-2xx statuses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    label: Option<String>,
    message: Option<String>,
}

// ==================== REST CLIENT ====================

pub struct GateRestClient {
    client: Client,
    endpoints: GateEndpoints,
    auth: GateAuth,
}

impl GateRestClient {
    pub fn new(endpoints: GateEndpoints, auth: GateAuth) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()?;
        Ok(Self { client, endpoints, auth })
    }

    fn build_headers(&self, method: &Method, path: &str, query: &str, body: &str) -> Result<HeaderMap, GatewayError> {
        let signed = self.auth.sign(method.as_str(), path, query, body);
        let mut headers = HeaderMap::new();
        headers.insert("KEY", header(&signed.key)?);
        headers.insert("Timestamp", header(&signed.timestamp)?);
        headers.insert("SIGN", header(&signed.sign)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &str,
        body: Option<String>,
    ) -> Result<T, GatewayError> {
        let path = format!("{}{}", self.endpoints.prefix, endpoint);
        let body = body.unwrap_or_default();
        let headers = self.build_headers(&method, &path, query, &body)?;

        let mut url = format!("{}{}", self.endpoints.host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        debug!("[REST] {} {} | {}", method, url, body);

        let mut req = self.client.request(method, url.as_str()).headers(headers);
        if !body.is_empty() {
            req = req.body(body);
        }
        let resp = req.send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        debug!("[REST] Response: {} | {}", status, text);

        if !status.is_success() {
            return Err(api_error(status.as_u16(), status.canonical_reason(), &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn header(value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value).map_err(|e| GatewayError::Transport(e.to_string()))
}

/// Map a failed response onto a gateway error, preferring Gate's own label
fn api_error(status: u16, canonical: Option<&str>, text: &str) -> GatewayError {
    let parsed: Option<ErrorBody> = serde_json::from_str(text).ok();
    let reason = parsed
        .as_ref()
        .and_then(|b| b.label.clone())
        .or_else(|| canonical.map(str::to_string))
        .unwrap_or_else(|| "UNKNOWN".to_string());
    let body = parsed
        .and_then(|b| b.message)
        .or_else(|| (!text.is_empty()).then(|| text.to_string()));
    GatewayError::Api { status, reason, body }
}

#[async_trait]
impl ExchangeGateway for GateRestClient {
    async fn list_tickers(&self, settle: &str) -> Result<Vec<Ticker>, GatewayError> {
        let endpoint = format!("/futures/{}/tickers", settle);
        self.request(Method::GET, &endpoint, "", None).await
    }

    async fn list_positions(&self, settle: &str) -> Result<Vec<Position>, GatewayError> {
        let endpoint = format!("/futures/{}/positions", settle);
        self.request(Method::GET, &endpoint, "", None).await
    }

    async fn get_contract(&self, settle: &str, contract: &str) -> Result<Contract, GatewayError> {
        let endpoint = format!("/futures/{}/contracts/{}", settle, urlencoding::encode(contract));
        self.request(Method::GET, &endpoint, "", None).await
    }

    async fn create_order(&self, settle: &str, order: &FuturesOrder) -> Result<OrderResponse, GatewayError> {
        let endpoint = format!("/futures/{}/orders", settle);
        let body = serde_json::to_string(order)?;
        self.request(Method::POST, &endpoint, "", Some(body)).await
    }
}

// ==================== CONNECTOR ====================

/// Creates a new REST session (fresh connection pool) per connect
pub struct GateConnector {
    endpoints: GateEndpoints,
    auth: GateAuth,
}

impl GateConnector {
    pub fn new(endpoints: GateEndpoints, auth: GateAuth) -> Self {
        Self { endpoints, auth }
    }
}

impl GatewayConnector for GateConnector {
    fn connect(&self) -> Result<Arc<dyn ExchangeGateway>, GatewayError> {
        let client = GateRestClient::new(self.endpoints.clone(), self.auth.clone())?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_prefers_gate_label() {
        let e = api_error(
            400,
            Some("Bad Request"),
            r#"{"label":"INVALID_PARAM_VALUE","message":"size must not be zero"}"#,
        );
        match e {
            GatewayError::Api { status, reason, body } => {
                assert_eq!(status, 400);
                assert_eq!(reason, "INVALID_PARAM_VALUE");
                assert_eq!(body.as_deref(), Some("size must not be zero"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_api_error_plain_body() {
        let e = api_error(502, Some("Bad Gateway"), "upstream down");
        match e {
            GatewayError::Api { reason, body, .. } => {
                assert_eq!(reason, "Bad Gateway");
                assert_eq!(body.as_deref(), Some("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let e = api_error(503, None, "");
        match e {
            GatewayError::Api { reason, body, .. } => {
                assert_eq!(reason, "UNKNOWN");
                assert!(body.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
