//! Webhook fan-out: subscription lookup, signing, bounded delivery pool.

mod dispatcher;
mod pool;
mod signing;
mod transport;

pub use dispatcher::{DispatchTicket, WebhookDispatcher};
pub use pool::{DeliveryOutcome, DeliveryPool, DeliveryStatus};
pub use signing::{SIGNATURE_HEADER, sign_payload, verify_signature};
pub use transport::{HttpWebhookTransport, RecordingTransport, TransportError, WebhookRequest, WebhookTransport};
