//! Telegram Bot API messaging gateway
//!
//! Maps every response onto a [`DeliveryOutcome`]:
//!
//! | Response                               | Outcome                  |
//! |----------------------------------------|--------------------------|
//! | 2xx with `"ok": true`                  | `Delivered`              |
//! | 403 (bot blocked, user deactivated)    | `RecipientUnreachable`   |
//! | 400 "chat not found"                   | `RecipientUnreachable`   |
//! | anything else, timeouts, network errors| `TransientError`         |

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::relay::MessagingGateway;
use crate::types::{DeliveryOutcome, UserId};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Envelope of every Bot API response
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Messaging gateway backed by the Telegram Bot API
pub struct TelegramGateway {
    http_client: reqwest::Client,
    /// `{api_base}/bot{token}/sendMessage`; never logged, it carries the token
    send_url: Url,
    timeout: Duration,
}

impl TelegramGateway {
    /// Create a gateway from configuration
    ///
    /// # Errors
    /// Returns an error if the bot token is empty, the API base URL is invalid,
    /// or the HTTP client cannot be created
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        if config.bot_token.trim().is_empty() {
            return Err(Error::config(
                "gateway.bot_token",
                "bot token must not be empty",
            ));
        }

        let send_url = Url::parse(&format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.bot_token.trim()
        ))
        .map_err(|e| Error::config("gateway.api_base", format!("invalid API base URL: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Gateway(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            send_url,
            timeout: config.timeout,
        })
    }
}

/// Describe a transport error without echoing the request URL
fn describe_transport_error(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "request timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_body() || e.is_decode() {
        "malformed response"
    } else {
        "request failed"
    }
}

async fn classify(response: reqwest::Response) -> DeliveryOutcome {
    let status = response.status();
    let body: ApiResponse = response.json().await.unwrap_or_default();
    let description = body
        .description
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

    if status.is_success() && body.ok {
        return DeliveryOutcome::Delivered;
    }

    match status {
        StatusCode::FORBIDDEN => DeliveryOutcome::RecipientUnreachable(description),
        StatusCode::BAD_REQUEST if description.to_lowercase().contains("chat not found") => {
            DeliveryOutcome::RecipientUnreachable(description)
        }
        _ => DeliveryOutcome::TransientError(format!(
            "HTTP {}: {}",
            status.as_u16(),
            description
        )),
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send(&self, user_id: UserId, text: &str) -> DeliveryOutcome {
        let request = self
            .http_client
            .post(self.send_url.clone())
            .json(&SendMessage {
                chat_id: user_id.get(),
                text,
            });

        let outcome = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => classify(response).await,
            Ok(Err(e)) => DeliveryOutcome::TransientError(describe_transport_error(&e).to_string()),
            Err(_) => DeliveryOutcome::TransientError(format!(
                "send timed out after {:?}",
                self.timeout
            )),
        };

        if outcome.is_delivered() {
            tracing::trace!(user_id = %user_id, "message delivered");
        }

        outcome
    }
}
