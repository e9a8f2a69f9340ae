/// EventBridge上を流れるドメインイベントのエンベロープ
///
/// Webhookレシーバーが発行し、イベントルールが評価し、顧客作成ハンドラーが受け取る。
/// `detail-type`には顧客IDを載せる。
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::stripe_event_type::{EventSource, StripeEventType};

/// `detail`部分
///
/// `stripeEvent`は配列で表現する（EventBridgeパターンの配列マッチに合わせる）。
/// 受信時は単一の文字列も受け付ける。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventDetail {
    #[serde(rename = "stripeEvent", default, deserialize_with = "one_or_many")]
    pub stripe_event: Vec<String>,
}

/// 文字列または文字列配列を配列として読む
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// ドメインイベント
///
/// 発行時は`source`・`detail-type`・`detail`のみを設定し、
/// 残りのフィールドはEventBridgeが配送時に付与する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "detail-type")]
    pub detail_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub detail: EventDetail,
}

impl DomainEvent {
    /// 発行用のイベントを作成
    pub fn new(source: EventSource, event_type: StripeEventType, customer_id: impl Into<String>) -> Self {
        Self {
            version: None,
            id: None,
            detail_type: customer_id.into(),
            source: source.as_str().to_string(),
            account: None,
            time: None,
            region: None,
            resources: Vec::new(),
            detail: EventDetail {
                stripe_event: vec![event_type.as_str().to_string()],
            },
        }
    }

    /// 顧客ID（`detail-type`）
    pub fn customer_id(&self) -> &str {
        &self.detail_type
    }

    /// `detail.stripeEvent`の値
    pub fn stripe_events(&self) -> &[String] {
        &self.detail.stripe_event
    }

    /// 既知のStripeイベント種別に変換できる最初の値
    pub fn primary_event_type(&self) -> Option<StripeEventType> {
        self.detail
            .stripe_event
            .iter()
            .find_map(|s| s.parse::<StripeEventType>().ok())
    }

    /// `detail`のJSON文字列（PutEventsのDetailフィールド用）
    pub fn detail_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.detail)
    }

    /// パターン評価用のJSON表現
    pub fn to_json_value(&self) -> Value {
        // 全フィールドがString/Vecのためシリアライズは失敗しない
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
