use async_trait::async_trait;
use pantrycore::{AdapterError, PartnerAdapter, WebhookAdapter};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;

fn failed(context: &str, e: impl std::fmt::Display) -> AdapterError {
    AdapterError::Failed(format!("{}: {}", context, e))
}

fn check_status(response: &reqwest::Response) -> Result<(), AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(AdapterError::Failed(format!("HTTP {}", status.as_u16())))
}

/// Delivers payloads to user-configured webhook URLs.
#[derive(Clone, Default)]
pub struct HttpWebhookAdapter {
    client: reqwest::Client,
}

impl HttpWebhookAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookAdapter for HttpWebhookAdapter {
    async fn call_webhook(&self, url: &str, method: &str, body: &Value) -> Result<(), AdapterError> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| failed("invalid method", e))?;
        tracing::debug!("{} {}", method, url);

        let request = if method == Method::GET {
            self.client.get(url)
        } else {
            self.client.request(method, url).json(body)
        };

        let response = request
            .header("User-Agent", "pantry-flow-engine")
            .send()
            .await
            .map_err(|e| failed("webhook request failed", e.without_url()))?;
        check_status(&response)
    }
}

/// Pushes item updates to partner platforms.
///
/// Each partner maps to a base URL; requests go to `{base}/{action}` with the
/// decrypted credential as a bearer token.
#[derive(Clone)]
pub struct HttpPartnerAdapter {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

impl HttpPartnerAdapter {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Public API hosts of the supported partners.
    pub fn with_default_endpoints() -> Self {
        let endpoints = [
            ("instacart", "https://connect.instacart.com/v2/pantry"),
            ("toast", "https://ws-api.toasttab.com/pantry/v1"),
            ("square", "https://connect.squareup.com/v2/pantry"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self::new(endpoints)
    }

    pub fn endpoint(&self, partner: &str, action: &str) -> Option<String> {
        self.endpoints
            .get(partner)
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), action))
    }
}

#[async_trait]
impl PartnerAdapter for HttpPartnerAdapter {
    async fn push(&self, partner: &str, action: &str, body: &Value, api_key: &str) -> Result<(), AdapterError> {
        let url = self
            .endpoint(partner, action)
            .ok_or_else(|| AdapterError::Failed(format!("no endpoint for partner {}", partner)))?;
        tracing::debug!(partner, action, "POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| failed("partner request failed", e.without_url()))?;
        check_status(&response)
    }
}
