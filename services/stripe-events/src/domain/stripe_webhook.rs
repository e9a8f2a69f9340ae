/// Stripe Webhookペイロード
///
/// 署名検証を通過した本文のみをこの型へ変換する。
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::stripe_event_type::StripeEventType;
use super::webhook_signature::{SignatureError, WebhookSignatureVerifier};

/// Webhook受信処理のエラー型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    #[error("signature verification failed: {0}")]
    Signature(#[from] SignatureError),
    #[error("failed to parse webhook body JSON: {0}")]
    InvalidPayload(String),
}

/// `data`部分
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StripeEventData {
    #[serde(default)]
    pub object: Value,
}

/// Stripeイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: StripeEventData,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub livemode: Option<bool>,
}

impl StripeEvent {
    /// 署名を検証してから本文を解析する
    ///
    /// 解析できない本文も検証失敗として扱う。
    pub fn construct(
        payload: &[u8],
        signature_header: Option<&str>,
        verifier: &WebhookSignatureVerifier,
    ) -> Result<Self, WebhookError> {
        verifier.verify(payload, signature_header)?;
        Self::parse(payload)
    }

    /// 本文を解析する（署名検証なし）
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        serde_json::from_slice(payload).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
    }

    /// 既知のイベント種別であれば返す
    pub fn known_type(&self) -> Option<StripeEventType> {
        self.event_type.parse().ok()
    }

    /// 指定種別として顧客IDを取り出す
    pub fn customer_id(&self, event_type: StripeEventType) -> Option<String> {
        event_type.customer_id(&self.data.object)
    }
}
