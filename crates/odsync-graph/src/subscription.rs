//! Webhook subscription lifecycle
//!
//! Creating, renewing, and cancelling a change-notification subscription.
//! The webhook *receiver* that accepts Microsoft's POST callbacks is an
//! external collaborator and out of scope here; this module only manages
//! the subscription resource itself.

use anyhow::{Context, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::GraphClient;

/// Body sent to create a subscription.
#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest {
    #[serde(rename = "changeType")]
    change_type: &'static str,
    #[serde(rename = "notificationUrl")]
    notification_url: String,
    resource: String,
    #[serde(rename = "expirationDateTime")]
    expiration_date_time: String,
    #[serde(rename = "clientState")]
    client_state: String,
}

/// Body sent to renew a subscription (only the expiry changes).
#[derive(Debug, Serialize)]
struct RenewSubscriptionRequest {
    #[serde(rename = "expirationDateTime")]
    expiration_date_time: String,
}

/// A Graph change-notification subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "resource")]
    pub resource: String,
    #[serde(rename = "expirationDateTime")]
    pub expiration_date_time: String,
    #[serde(rename = "clientState")]
    pub client_state: Option<String>,
}

/// Creates a subscription on `resource` (e.g. `/me/drive/root`) pointing
/// at `notification_url`, expiring at `expiration_date_time` (RFC 3339).
/// `clientState` is a fresh random UUID used by the receiver to validate
/// that a notification actually originated from this subscription.
pub async fn create_subscription(
    client: &GraphClient,
    resource: &str,
    notification_url: &str,
    expiration_date_time: &str,
) -> Result<Subscription> {
    let client_state = Uuid::new_v4().to_string();
    let body = CreateSubscriptionRequest {
        change_type: "updated",
        notification_url: notification_url.to_string(),
        resource: resource.to_string(),
        expiration_date_time: expiration_date_time.to_string(),
        client_state,
    };

    debug!(resource, notification_url, "creating webhook subscription");
    let (_, result) = client
        .execute_json(Method::POST, "/subscriptions", |b| b.json(&body))
        .await;
    let subscription: Subscription =
        serde_json::from_value(result.context("Failed to create subscription")?)
            .context("Failed to parse subscription response")?;

    info!(id = %subscription.id, "webhook subscription created");
    Ok(subscription)
}

/// Renews an existing subscription's expiry.
pub async fn renew_subscription(
    client: &GraphClient,
    subscription_id: &str,
    expiration_date_time: &str,
) -> Result<Subscription> {
    let body = RenewSubscriptionRequest {
        expiration_date_time: expiration_date_time.to_string(),
    };
    let path = format!("/subscriptions/{subscription_id}");

    debug!(subscription_id, "renewing webhook subscription");
    let (_, result) = client
        .execute_json(Method::PATCH, &path, |b| b.json(&body))
        .await;
    let subscription: Subscription =
        serde_json::from_value(result.context("Failed to renew subscription")?)
            .context("Failed to parse renewed subscription response")?;

    Ok(subscription)
}

/// Cancels a subscription.
pub async fn cancel_subscription(client: &GraphClient, subscription_id: &str) -> Result<()> {
    let path = format!("/subscriptions/{subscription_id}");
    debug!(subscription_id, "cancelling webhook subscription");

    let (_, result) = client.execute_json(Method::DELETE, &path, |b| b).await;
    result.context("Failed to cancel subscription")?;

    info!(subscription_id, "webhook subscription cancelled");
    Ok(())
}
