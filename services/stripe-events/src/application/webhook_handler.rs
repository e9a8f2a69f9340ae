/// Webhookレシーバー
///
/// Stripeからの通知を検証し、設定されたイベント種別であればドメインイベントを発行する。
///
/// # 応答
/// - シークレット取得失敗: 500
/// - 署名検証・本文解析の失敗: 401 `Update failed`
/// - それ以外: 200 `Update succeeded`（発行失敗はログのみ）
use tracing::{error, info, warn};

use crate::domain::{
    DomainEvent, EventSource, StripeEvent, StripeEventType, WebhookError, WebhookSignatureVerifier,
};
use crate::infrastructure::{EventPublisher, SecretError, SecretProvider};

pub const UPDATE_SUCCEEDED: &str = "Update succeeded";
pub const UPDATE_FAILED: &str = "Update failed";
pub const INTERNAL_SERVER_ERROR: &str = "Internal server error";

/// Webhookハンドラーのエラー型
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookHandlerError {
    /// エンドポイントシークレットの取得に失敗
    SecretUnavailable(String),
    /// 署名検証または本文解析に失敗
    Verification(WebhookError),
}

impl From<SecretError> for WebhookHandlerError {
    fn from(err: SecretError) -> Self {
        WebhookHandlerError::SecretUnavailable(err.to_string())
    }
}

impl From<WebhookError> for WebhookHandlerError {
    fn from(err: WebhookError) -> Self {
        WebhookHandlerError::Verification(err)
    }
}

impl std::fmt::Display for WebhookHandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookHandlerError::SecretUnavailable(msg) => {
                write!(f, "Failed to load endpoint secret: {}", msg)
            }
            WebhookHandlerError::Verification(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for WebhookHandlerError {}

/// 受理したWebhookの処理結果
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// ドメインイベントを発行した
    Published { customer_id: String },
    /// 発行に失敗した（応答は成功のまま）
    PublishFailed { customer_id: String, reason: String },
    /// 対象種別だが顧客IDを取り出せなかった
    MissingCustomerId,
    /// 対象外のイベント種別
    Ignored { event_type: String },
}

/// HTTP応答
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status_code: u16,
    pub body: &'static str,
    pub outcome: Option<WebhookOutcome>,
}

impl WebhookResponse {
    fn succeeded(outcome: WebhookOutcome) -> Self {
        Self {
            status_code: 200,
            body: UPDATE_SUCCEEDED,
            outcome: Some(outcome),
        }
    }

    fn from_error(err: &WebhookHandlerError) -> Self {
        let (status_code, body) = match err {
            WebhookHandlerError::SecretUnavailable(_) => (500, INTERNAL_SERVER_ERROR),
            WebhookHandlerError::Verification(_) => (401, UPDATE_FAILED),
        };
        Self {
            status_code,
            body,
            outcome: None,
        }
    }
}

/// Webhookを処理するハンドラー
pub struct WebhookHandler<SP, EP>
where
    SP: SecretProvider,
    EP: EventPublisher,
{
    secret_provider: SP,
    publisher: EP,
    event_source: EventSource,
    event_type: StripeEventType,
    tolerance_seconds: Option<i64>,
}

impl<SP, EP> WebhookHandler<SP, EP>
where
    SP: SecretProvider,
    EP: EventPublisher,
{
    /// 発行元と発行対象のイベント種別を指定して作成
    pub fn new(
        secret_provider: SP,
        publisher: EP,
        event_source: EventSource,
        event_type: StripeEventType,
    ) -> Self {
        Self {
            secret_provider,
            publisher,
            event_source,
            event_type,
            tolerance_seconds: None,
        }
    }

    /// 署名タイムスタンプの許容誤差を変更（0で無効）
    pub fn with_tolerance(mut self, tolerance_seconds: i64) -> Self {
        self.tolerance_seconds = Some(tolerance_seconds);
        self
    }

    pub fn event_source(&self) -> EventSource {
        self.event_source
    }

    pub fn event_type(&self) -> StripeEventType {
        self.event_type
    }

    /// リクエストを処理して応答を返す
    pub async fn handle(&self, signature_header: Option<&str>, body: &[u8]) -> WebhookResponse {
        match self.process(signature_header, body).await {
            Ok(outcome) => WebhookResponse::succeeded(outcome),
            Err(err) => {
                match &err {
                    WebhookHandlerError::SecretUnavailable(_) => error!(error = %err, "シークレット取得失敗"),
                    WebhookHandlerError::Verification(_) => {
                        warn!(error = %err, "Webhook署名検証失敗")
                    }
                }
                WebhookResponse::from_error(&err)
            }
        }
    }

    /// 検証から発行までの処理
    pub async fn process(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, WebhookHandlerError> {
        let secret = self.secret_provider.endpoint_secret().await?;
        let mut verifier = WebhookSignatureVerifier::new(secret);
        if let Some(tolerance) = self.tolerance_seconds {
            verifier = verifier.with_tolerance(tolerance);
        }

        let stripe_event = StripeEvent::construct(body, signature_header, &verifier)?;

        if stripe_event.event_type != self.event_type.as_str() {
            warn!(
                event_type = %stripe_event.event_type,
                stripe_event_id = %stripe_event.id,
                "unexpected event type"
            );
            return Ok(WebhookOutcome::Ignored {
                event_type: stripe_event.event_type,
            });
        }

        let Some(customer_id) = stripe_event.customer_id(self.event_type) else {
            warn!(stripe_event_id = %stripe_event.id, "顧客IDを取得できないためイベントを発行しない");
            return Ok(WebhookOutcome::MissingCustomerId);
        };

        let event = DomainEvent::new(self.event_source, self.event_type, customer_id.clone());

        match self.publisher.publish(&event).await {
            Ok(()) => {
                info!(
                    customer_id = %customer_id,
                    source = %self.event_source,
                    stripe_event = %self.event_type,
                    "ドメインイベント発行完了"
                );
                Ok(WebhookOutcome::Published { customer_id })
            }
            Err(err) => {
                error!(customer_id = %customer_id, error = %err, "ドメインイベント発行失敗");
                Ok(WebhookOutcome::PublishFailed {
                    customer_id,
                    reason: err.to_string(),
                })
            }
        }
    }
}
