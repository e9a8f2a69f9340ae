// Domain layer modules
pub mod customer_record;
pub mod domain_event;
pub mod event_pattern;
pub mod permission;
pub mod stripe_event_type;
pub mod stripe_webhook;
pub mod topology;
pub mod webhook_signature;

// Re-exports
pub use customer_record::{CustomerRecord, CUSTOMER_ID_ATTRIBUTE};
pub use domain_event::{DomainEvent, EventDetail};
pub use event_pattern::{EventPattern, PatternError, STRIPE_EVENT_DETAIL_KEY};
pub use permission::{
    AuthorizationError, InvocationEdge, InvocationSource, PermissionGraph, ServicePrincipal,
};
pub use stripe_event_type::{EventSource, StripeEventType, UnknownIdentifier};
pub use stripe_webhook::{StripeEvent, WebhookError};
pub use topology::{Topology, TopologyError, TopologyProblem, TopologyVariant};
pub use webhook_signature::{SignatureError, WebhookSignatureVerifier, SIGNATURE_HEADER};
