/// 顧客テーブルに書き込むレコード
use serde_json::{Map, Value};

use super::domain_event::DomainEvent;

/// パーティションキー属性名
pub const CUSTOMER_ID_ATTRIBUTE: &str = "customerID";

/// 顧客レコード
///
/// `customerID`以外の属性は任意。同じキーへの再書き込みは属性を丸ごと置き換える。
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub attributes: Map<String, Value>,
}

impl CustomerRecord {
    pub fn new(customer_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            attributes: Map::new(),
        }
    }

    /// 属性を追加（`customerID`は無視する）
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != CUSTOMER_ID_ATTRIBUTE {
            self.attributes.insert(key, value.into());
        }
        self
    }

    /// ドメインイベントからレコードを組み立てる
    pub fn from_event(event: &DomainEvent, received_at: &str) -> Self {
        let mut record = Self::new(event.customer_id())
            .with_attribute("eventSource", event.source.clone())
            .with_attribute("receivedAt", received_at.to_string());

        if let Some(event_type) = event.primary_event_type() {
            record = record.with_attribute("stripeEvent", event_type.as_str());
        }
        if let Some(id) = &event.id {
            record = record.with_attribute("eventId", id.clone());
        }

        record
    }

    /// テーブルアイテム（キー属性込み）のJSON表現
    pub fn to_item(&self) -> Map<String, Value> {
        let mut item = self.attributes.clone();
        item.insert(
            CUSTOMER_ID_ATTRIBUTE.to_string(),
            Value::String(self.customer_id.clone()),
        );
        item
    }

    /// テーブルアイテムから復元
    pub fn from_item(mut item: Map<String, Value>) -> Option<Self> {
        let customer_id = match item.remove(CUSTOMER_ID_ATTRIBUTE) {
            Some(Value::String(id)) => id,
            _ => return None,
        };
        Some(Self {
            customer_id,
            attributes: item,
        })
    }
}
