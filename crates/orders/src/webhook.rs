use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, SubscriptionId, TenantId};

/// Registration request for a webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubscription {
    pub tenant_id: TenantId,
    pub callback_url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub secret: Option<String>,
}

impl NewSubscription {
    pub fn validate(&self) -> Result<(), DomainError> {
        let url = self.callback_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DomainError::validation(format!(
                "callback_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.events.is_empty() || self.events.iter().any(|e| e.trim().is_empty()) {
            return Err(DomainError::validation("events must be a non-empty list of names"));
        }
        Ok(())
    }

    /// Materialise an active subscription.
    pub fn into_subscription(self, at: DateTime<Utc>) -> Result<WebhookSubscription, DomainError> {
        self.validate()?;
        Ok(WebhookSubscription {
            id: SubscriptionId::new(),
            tenant_id: self.tenant_id,
            callback_url: self.callback_url.trim().to_string(),
            events: self.events.into_iter().map(|e| e.trim().to_string()).collect(),
            headers: self.headers,
            secret: self.secret.filter(|s| !s.is_empty()),
            is_active: true,
            created_at: at,
            updated_at: at,
        })
    }
}

/// A registered webhook destination. Read-only to the order pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub callback_url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Never echoed back over the API.
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    /// Active, same tenant, and subscribed to `event`.
    pub fn wants(&self, tenant_id: &TenantId, event: &str) -> bool {
        self.is_active && &self.tenant_id == tenant_id && self.events.iter().any(|e| e == event)
    }
}

/// Body POSTed to a subscription's callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub tenant_id: TenantId,
    pub event: String,
    pub data: serde_json::Value,
}

impl WebhookPayload {
    pub fn new<T: Serialize>(
        tenant_id: TenantId,
        event: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            tenant_id,
            event: event.into(),
            data: serde_json::to_value(data)?,
        })
    }
}
