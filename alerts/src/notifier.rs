//! Delivery of alert texts to condition owners.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, owner: &str, text: &str) -> Result<(), NotifyError>;
}

/// Writes alerts to the log. Used when no chat transport is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, owner: &str, text: &str) -> Result<(), NotifyError> {
        info!(target: "dispatcher", owner, text, "alert");
        Ok(())
    }
}

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Sends alerts through the Telegram Bot API. The owner is the chat id.
#[derive(Clone)]
pub struct TelegramNotifier {
    http: Client,
    url: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Self::with_base_url(TELEGRAM_API, token, timeout)
    }

    pub fn with_base_url(base: &str, token: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: format!("{}/bot{}/sendMessage", base.trim_end_matches('/'), token),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, text), target = "dispatcher", level = "debug")]
    async fn send(&self, owner: &str, text: &str) -> Result<(), NotifyError> {
        let resp: ApiResponse = self
            .http
            .post(&self.url)
            .json(&SendMessage {
                chat_id: owner,
                text,
            })
            .send()
            .await
            .map_err(redact)?
            .json()
            .await
            .map_err(redact)?;

        if !resp.ok {
            return Err(NotifyError::Rejected(
                resp.description.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        debug!("message delivered");
        Ok(())
    }
}

/// The request URL carries the bot token.
fn redact(e: reqwest::Error) -> NotifyError {
    NotifyError::Http(e.without_url())
}
