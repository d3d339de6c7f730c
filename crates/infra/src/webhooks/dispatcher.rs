use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error};

use orderflow_core::TenantId;
use orderflow_events::RetryPolicy;
use orderflow_orders::{WebhookPayload, WebhookSubscription};

use crate::store::WebhookRegistry;

use super::pool::{DeliveryJob, DeliveryOutcome, DeliveryPool};
use super::signing::{SIGNATURE_HEADER, sign_payload};
use super::transport::WebhookRequest;

/// Completion handle for one `notify` call.
///
/// Dropping it is fire-and-forget; deliveries continue in the pool.
#[derive(Debug)]
pub struct DispatchTicket {
    receiver: Option<mpsc::Receiver<DeliveryOutcome>>,
    expected: usize,
}

impl DispatchTicket {
    fn empty() -> Self {
        Self {
            receiver: None,
            expected: 0,
        }
    }

    /// Number of destinations the payload was fanned out to.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Collect outcomes until all destinations report or `timeout` elapses.
    pub fn wait(self, timeout: Duration) -> Vec<DeliveryOutcome> {
        let Some(receiver) = self.receiver else {
            return Vec::new();
        };
        let deadline = Instant::now() + timeout;
        let mut out = Vec::with_capacity(self.expected);
        while out.len() < self.expected {
            let left = deadline.saturating_duration_since(Instant::now());
            match receiver.recv_timeout(left) {
                Ok(outcome) => out.push(outcome),
                Err(_) => break,
            }
        }
        out
    }
}

/// Looks up active subscriptions for a tenant/event and fans the payload out
/// to the delivery pool.
pub struct WebhookDispatcher {
    registry: Arc<dyn WebhookRegistry>,
    pool: DeliveryPool,
    retry: RetryPolicy,
}

impl WebhookDispatcher {
    pub fn new(registry: Arc<dyn WebhookRegistry>, pool: DeliveryPool, retry: RetryPolicy) -> Self {
        Self { registry, pool, retry }
    }

    /// Deliver `{tenant_id, event, data}` to every matching subscription.
    ///
    /// Never fails: lookup and serialization errors are logged and yield an
    /// empty ticket.
    pub fn notify<T: Serialize>(&self, tenant_id: &TenantId, event: &str, data: &T) -> DispatchTicket {
        let subscriptions = match self.registry.active_for(tenant_id, event) {
            Ok(subs) => subs,
            Err(e) => {
                error!(tenant_id = %tenant_id, event, error = %e, "failed to load webhook subscriptions");
                return DispatchTicket::empty();
            }
        };
        let subscriptions: Vec<WebhookSubscription> =
            subscriptions.into_iter().filter(|s| s.wants(tenant_id, event)).collect();
        if subscriptions.is_empty() {
            debug!(tenant_id = %tenant_id, event, "no webhook subscriptions");
            return DispatchTicket::empty();
        }

        let body = match WebhookPayload::new(tenant_id.clone(), event, data).and_then(|p| serde_json::to_vec(&p)) {
            Ok(body) => body,
            Err(e) => {
                error!(tenant_id = %tenant_id, event, error = %e, "failed to serialize webhook payload");
                return DispatchTicket::empty();
            }
        };

        let (reply, receiver) = mpsc::channel();
        let expected = subscriptions.len();
        for sub in subscriptions {
            self.pool.submit(DeliveryJob {
                subscription_id: sub.id,
                request: build_request(&sub, &body),
                retry: self.retry,
                reply: reply.clone(),
            });
        }

        DispatchTicket {
            receiver: Some(receiver),
            expected,
        }
    }

    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

/// Content-Type first so subscription headers may override it; signature last.
fn build_request(sub: &WebhookSubscription, body: &[u8]) -> WebhookRequest {
    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    headers.extend(sub.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    if let Some(secret) = &sub.secret {
        headers.push((SIGNATURE_HEADER.to_string(), sign_payload(secret, body)));
    }
    WebhookRequest {
        url: sub.callback_url.clone(),
        headers,
        body: body.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use orderflow_orders::NewSubscription;

    use super::*;
    use crate::store::InMemoryWebhookRegistry;
    use crate::webhooks::{DeliveryStatus, RecordingTransport, verify_signature};

    const WAIT: Duration = Duration::from_secs(5);

    fn tenant() -> TenantId {
        TenantId::new("t1").unwrap()
    }

    fn register(reg: &InMemoryWebhookRegistry, url: &str, headers: &[(&str, &str)], secret: Option<&str>) {
        reg.register(NewSubscription {
            tenant_id: tenant(),
            callback_url: url.to_string(),
            events: vec!["order.created".into()],
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            secret: secret.map(str::to_string),
        })
        .unwrap();
    }

    fn dispatcher(reg: Arc<InMemoryWebhookRegistry>, transport: Arc<RecordingTransport>) -> WebhookDispatcher {
        WebhookDispatcher::new(reg, DeliveryPool::new(2, 16, transport), RetryPolicy::no_retry())
    }

    #[test]
    fn unreachable_destination_does_not_affect_others() {
        let reg = Arc::new(InMemoryWebhookRegistry::new());
        register(&reg, "http://up.test/hook", &[], None);
        register(&reg, "http://down.test/hook", &[], None);
        let transport = Arc::new(RecordingTransport::new().unreachable("http://down.test/hook"));
        let d = dispatcher(reg, transport.clone());

        let ticket = d.notify(&tenant(), "order.created", &serde_json::json!({"order_id": "o1"}));
        assert_eq!(ticket.expected(), 2);
        let outcomes = ticket.wait(WAIT);

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes.iter().filter(|o| o.is_delivered()).count(), 1);
        let delivered = transport.requests_to("http://up.test/hook");
        assert_eq!(delivered.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&delivered[0].body).unwrap();
        assert_eq!(body["tenant_id"], "t1");
        assert_eq!(body["event"], "order.created");
        assert_eq!(body["data"]["order_id"], "o1");
    }

    #[test]
    fn custom_headers_follow_content_type_and_body_is_signed() {
        let reg = Arc::new(InMemoryWebhookRegistry::new());
        register(
            &reg,
            "http://a.test/hook",
            &[("Authorization", "Bearer x"), ("Content-Type", "application/vnd.custom+json")],
            Some("s3cret"),
        );
        let transport = Arc::new(RecordingTransport::new());
        let d = dispatcher(reg, transport.clone());

        d.notify(&tenant(), "order.created", &1).wait(WAIT);

        let req = transport.requests().remove(0);
        assert_eq!(req.headers[0].0, "Content-Type");
        assert_eq!(req.header("content-type"), Some("application/vnd.custom+json"));
        assert_eq!(req.header("Authorization"), Some("Bearer x"));
        let sig = req.header(SIGNATURE_HEADER).unwrap();
        assert!(verify_signature("s3cret", &req.body, sig));
    }

    #[test]
    fn no_matching_subscription_yields_empty_ticket() {
        let reg = Arc::new(InMemoryWebhookRegistry::new());
        register(&reg, "http://a.test/hook", &[], None);
        let transport = Arc::new(RecordingTransport::new());
        let d = dispatcher(reg, transport.clone());

        let ticket = d.notify(&tenant(), "order.updated", &1);
        assert_eq!(ticket.expected(), 0);
        assert!(ticket.wait(WAIT).is_empty());
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn per_destination_retry_is_bounded() {
        let reg = Arc::new(InMemoryWebhookRegistry::new());
        register(&reg, "http://down.test/hook", &[], None);
        let transport = Arc::new(RecordingTransport::new().unreachable("http://down.test/hook"));
        let d = WebhookDispatcher::new(
            reg,
            DeliveryPool::new(1, 4, transport),
            RetryPolicy::fixed(3, Duration::ZERO),
        );

        let outcomes = d.notify(&tenant(), "order.created", &1).wait(WAIT);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].attempts, 3);
        assert!(matches!(outcomes[0].status, DeliveryStatus::Failed { .. }));
    }
}
