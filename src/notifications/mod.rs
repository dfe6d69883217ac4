//! Notification dispatchers. Delivery itself belongs to the notification
//! service; this core only hands events over.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::ports::{NotificationDispatcher, NotifyError};

/// Posts notifications to the notification service over HTTP.
#[derive(Clone)]
pub struct HttpNotificationDispatcher {
    client: Client,
    base_url: String,
}

impl HttpNotificationDispatcher {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self { client, base_url }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), NotifyError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "notification service returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for HttpNotificationDispatcher {
    async fn notify_in_app(
        &self,
        user_id: Uuid,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.post(
            "in-app",
            json!({
                "userId": user_id,
                "event": event_name,
                "payload": payload,
            }),
        )
        .await
    }

    async fn notify_push(
        &self,
        user_id: Uuid,
        buyer_name: &str,
        product_title: &str,
        transaction_id: Uuid,
        amount: i64,
    ) -> Result<(), NotifyError> {
        self.post(
            "push",
            json!({
                "userId": user_id,
                "buyerName": buyer_name,
                "productTitle": product_title,
                "transactionId": transaction_id,
                "amount": amount,
            }),
        )
        .await
    }
}

/// Writes notifications to the log. Used when no notification service is
/// configured.
#[derive(Clone, Default)]
pub struct LogNotificationDispatcher;

#[async_trait]
impl NotificationDispatcher for LogNotificationDispatcher {
    async fn notify_in_app(
        &self,
        user_id: Uuid,
        event_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), NotifyError> {
        tracing::info!(user_id = %user_id, event = event_name, payload = %payload, "In-app notification");
        Ok(())
    }

    async fn notify_push(
        &self,
        user_id: Uuid,
        buyer_name: &str,
        product_title: &str,
        transaction_id: Uuid,
        amount: i64,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %user_id,
            buyer_name,
            product_title,
            transaction_id = %transaction_id,
            amount,
            "Push notification"
        );
        Ok(())
    }
}
