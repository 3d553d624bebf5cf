//! HTTP order notifications.
//!
//! Posts a small JSON document per event to a configured endpoint (a mail
//! relay or a queue bridge). Delivery failures come back as `NotifyError`;
//! the core logs them and carries on.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use storefront_core::{Notifier, NotifyError, Order};
use tracing::debug;

#[derive(Debug, Serialize)]
struct OrderNotification<'a> {
    event: &'static str,
    order_id: String,
    order_number: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    amount: i64,
    currency: &'a str,
}

impl<'a> OrderNotification<'a> {
    fn new(event: &'static str, order: &'a Order) -> Self {
        Self {
            event,
            order_id: order.id.to_string(),
            order_number: &order.order_number,
            email: order.customer.as_ref().map(|c| c.email.as_str()),
            name: order.customer.as_ref().map(|c| c.full_name.as_str()),
            amount: order.final_amount,
            currency: &order.currency,
        }
    }
}

pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn post(&self, body: OrderNotification<'_>) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError(format!("{} answered {}", self.url, status)));
        }
        debug!(event = body.event, order_number = body.order_number, "Notification delivered");
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn order_confirmation(&self, order: &Order) -> Result<(), NotifyError> {
        self.post(OrderNotification::new("order_confirmation", order))
            .await
    }

    async fn order_shipped(&self, order: &Order) -> Result<(), NotifyError> {
        self.post(OrderNotification::new("order_shipped", order)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_core::Checkout;

    #[test]
    fn test_payload_shape() {
        let now = chrono::Utc::now();
        let checkout = Checkout::new("sess".to_string(), "DKK".to_string(), now, chrono::Duration::hours(1));
        let mut order = Order::from_checkout(&checkout, "ORD-20261016-000001".to_string(), now);
        order.final_amount = 13593;

        let body = serde_json::to_value(OrderNotification::new("order_shipped", &order)).unwrap();
        assert_eq!(body["event"], "order_shipped");
        assert_eq!(body["order_number"], "ORD-20261016-000001");
        assert_eq!(body["amount"], 13593);
        assert_eq!(body["currency"], "DKK");
        assert!(body.get("email").is_none());
    }
}
