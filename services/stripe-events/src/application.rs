// アプリケーション層モジュール
pub mod create_customer_handler;
pub mod event_router;
pub mod webhook_handler;

// 再エクスポート
pub use create_customer_handler::{CreateCustomerError, CreateCustomerHandler};
pub use event_router::{
    DeliveryOutcome, DeliveryRecord, EventRouter, EventRule, EventTarget, InvocationError,
};
pub use webhook_handler::{WebhookHandler, WebhookHandlerError, WebhookOutcome, WebhookResponse};
