//! Telegram Bot API adapter.
//!
//! Implements the notification channel (`sendMessage`) and the payment
//! provider ledger (`getStarTransactions`). The bot token is part of every
//! request URL, so transport errors are logged without their URL.

use async_trait::async_trait;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use storefront_invoicing::{InvoiceId, LedgerPage, ProviderTransaction};

use super::{Notification, Notifier, PaymentProvider, Recipient};
use crate::config::TelegramConfig;
use crate::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone)]
pub struct TelegramBot {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
}

#[derive(Debug, Serialize)]
struct GetStarTransactions {
    offset: u32,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct StarTransactions {
    transactions: Vec<StarTransaction>,
}

#[derive(Debug, Deserialize)]
struct StarTransaction {
    id: String,
    date: i64,
    source: Option<TransactionPartner>,
}

#[derive(Debug, Deserialize)]
struct TransactionPartner {
    invoice_payload: Option<String>,
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig) -> LifecycleResult<Self> {
        if config.token.trim().is_empty() {
            return Err(LifecycleError::Config("telegram token is not set".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LifecycleError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.token),
        })
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, String>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(params)
            .send()
            .await
            .map_err(|e| format!("{method}: {}", e.without_url()))?;

        let body: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| format!("{method}: {}", e.without_url()))?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(format!(
                "{method}: {}",
                description.unwrap_or_else(|| "request rejected".to_string())
            )),
        }
    }
}

/// Map a ledger page; entries with an unusable timestamp are dropped but
/// still counted as fetched.
fn map_transactions(page: StarTransactions) -> LedgerPage {
    let fetched = page.transactions.len();
    let mut mapped: Vec<ProviderTransaction> = page
        .transactions
        .into_iter()
        .filter_map(|tx| {
            let Some(occurred_at) = DateTime::from_timestamp(tx.date, 0) else {
                tracing::warn!(provider_tx_id = %tx.id, date = tx.date, "dropping ledger entry with invalid date");
                return None;
            };
            let invoice_id = tx
                .source
                .and_then(|source| source.invoice_payload)
                .and_then(|payload| payload.parse::<InvoiceId>().ok());
            Some(ProviderTransaction {
                provider_tx_id: tx.id,
                invoice_id,
                occurred_at,
            })
        })
        .collect();
    mapped.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    LedgerPage {
        transactions: mapped,
        fetched,
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    async fn send(&self, recipient: &Recipient, notification: &Notification) -> LifecycleResult<()> {
        let params = SendMessage {
            chat_id: &recipient.0,
            text: notification.text(),
        };
        self.call::<_, serde_json::Value>("sendMessage", &params)
            .await
            .map(|_| ())
            .map_err(LifecycleError::Notification)
    }
}

#[async_trait]
impl PaymentProvider for TelegramBot {
    async fn list_transactions(
        &self,
        offset: u32,
        limit: u32,
    ) -> LifecycleResult<LedgerPage> {
        let page: StarTransactions = self
            .call("getStarTransactions", &GetStarTransactions { offset, limit })
            .await
            .map_err(LifecycleError::ProviderUnavailable)?;
        Ok(map_transactions(page))
    }
}
