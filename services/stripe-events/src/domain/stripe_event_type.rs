/// Stripeイベント種別とイベント発行元の共通定義
///
/// Webhookレシーバー（発行側）とイベントルール（フィルター側）の両方が
/// この列挙型を参照する。文字列リテラルを各所に重複させないことで、
/// 発行側とルール側の不一致によるイベントの無言破棄を防ぐ。
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// 未知のイベント種別・発行元文字列のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnknownIdentifier {
    #[error("unknown stripe event type: {0}")]
    EventType(String),
    #[error("unknown event source: {0}")]
    EventSource(String),
}

/// パイプラインが扱うStripeイベント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StripeEventType {
    /// 顧客作成
    #[serde(rename = "customer.created")]
    CustomerCreated,
    /// サブスクリプション作成
    #[serde(rename = "customer.subscription.created")]
    CustomerSubscriptionCreated,
}

impl StripeEventType {
    /// 全種別
    pub const ALL: [StripeEventType; 2] = [
        StripeEventType::CustomerCreated,
        StripeEventType::CustomerSubscriptionCreated,
    ];

    /// Stripe上のイベント名を返す
    pub fn as_str(&self) -> &'static str {
        match self {
            StripeEventType::CustomerCreated => "customer.created",
            StripeEventType::CustomerSubscriptionCreated => "customer.subscription.created",
        }
    }

    /// `data.object`から顧客IDを抽出する
    ///
    /// - `customer.*`: オブジェクト自身が顧客なので`id`
    /// - `customer.subscription.*`: オブジェクトはサブスクリプションなので`customer`
    ///   （欠落時は`id`にフォールバック）
    pub fn customer_id(&self, object: &Value) -> Option<String> {
        let field = |name: &str| {
            object
                .get(name)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match self {
            StripeEventType::CustomerCreated => field("id"),
            StripeEventType::CustomerSubscriptionCreated => {
                field("customer").or_else(|| field("id"))
            }
        }
    }
}

impl fmt::Display for StripeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StripeEventType {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownIdentifier::EventType(s.to_string()))
    }
}

/// ドメインイベントの発行元（EventBridgeの`source`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSource {
    #[serde(rename = "stripeWebHookHandler.lambda")]
    StripeWebhookHandler,
    #[serde(rename = "stripeHandler.lambda")]
    StripeHandler,
}

impl EventSource {
    pub const ALL: [EventSource; 2] = [EventSource::StripeWebhookHandler, EventSource::StripeHandler];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::StripeWebhookHandler => "stripeWebHookHandler.lambda",
            EventSource::StripeHandler => "stripeHandler.lambda",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = UnknownIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|src| src.as_str() == s)
            .ok_or_else(|| UnknownIdentifier::EventSource(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_wire_strings() {
        assert_eq!(StripeEventType::CustomerCreated.as_str(), "customer.created");
        assert_eq!(
            StripeEventType::CustomerSubscriptionCreated.as_str(),
            "customer.subscription.created"
        );
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!(
            "customer.subscription.created".parse::<StripeEventType>(),
            Ok(StripeEventType::CustomerSubscriptionCreated)
        );
        assert_eq!(
            "invoice.paid".parse::<StripeEventType>(),
            Err(UnknownIdentifier::EventType("invoice.paid".to_string()))
        );
    }

    #[test]
    fn test_event_type_serde_matches_as_str() {
        for t in StripeEventType::ALL {
            let serialized = serde_json::to_value(t).unwrap();
            assert_eq!(serialized, json!(t.as_str()));
        }
    }

    #[test]
    fn test_event_source_wire_strings() {
        assert_eq!(
            EventSource::StripeWebhookHandler.to_string(),
            "stripeWebHookHandler.lambda"
        );
        assert_eq!(EventSource::StripeHandler.to_string(), "stripeHandler.lambda");
        assert_eq!(
            "stripeHandler.lambda".parse::<EventSource>(),
            Ok(EventSource::StripeHandler)
        );
        // 大文字小文字は区別する
        assert!("stripewebhookhandler.lambda".parse::<EventSource>().is_err());
    }

    #[test]
    fn test_customer_id_from_customer_object() {
        let object = json!({"id": "cus_123", "object": "customer"});
        assert_eq!(
            StripeEventType::CustomerCreated.customer_id(&object),
            Some("cus_123".to_string())
        );
    }

    #[test]
    fn test_customer_id_from_subscription_object() {
        let object = json!({"id": "sub_999", "object": "subscription", "customer": "cus_456"});
        assert_eq!(
            StripeEventType::CustomerSubscriptionCreated.customer_id(&object),
            Some("cus_456".to_string())
        );
    }

    #[test]
    fn test_customer_id_subscription_falls_back_to_id() {
        let object = json!({"id": "sub_999"});
        assert_eq!(
            StripeEventType::CustomerSubscriptionCreated.customer_id(&object),
            Some("sub_999".to_string())
        );
    }

    #[test]
    fn test_customer_id_missing_or_empty() {
        assert_eq!(StripeEventType::CustomerCreated.customer_id(&json!({})), None);
        assert_eq!(
            StripeEventType::CustomerCreated.customer_id(&json!({"id": ""})),
            None
        );
        assert_eq!(
            StripeEventType::CustomerCreated.customer_id(&json!({"id": 42})),
            None
        );
    }
}
