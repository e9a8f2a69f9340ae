/// ドメインイベントの発行
///
/// EventBridgeへのPutEvents、または顧客作成ハンドラーの非同期直接呼び出し。
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_eventbridge::types::PutEventsRequestEntry;
use aws_sdk_eventbridge::Client as EventBridgeClient;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_lambda::Client as LambdaClient;
use thiserror::Error;
use tracing::info;

use crate::domain::DomainEvent;

/// 発行のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    #[error("AWS API error: {0}")]
    AwsSdkError(String),
    #[error("event rejected by bus: {0}")]
    Rejected(String),
    #[error("failed to serialize event: {0}")]
    Serialization(String),
}

/// イベント発行トレイト
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError>;
}

#[async_trait]
impl<T> EventPublisher for Arc<T>
where
    T: EventPublisher + ?Sized,
{
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        (**self).publish(event).await
    }
}

/// EventBridge実装
pub struct EventBridgePublisher {
    client: EventBridgeClient,
    event_bus_name: String,
}

impl EventBridgePublisher {
    pub fn new(client: EventBridgeClient, event_bus_name: impl Into<String>) -> Self {
        Self {
            client,
            event_bus_name: event_bus_name.into(),
        }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(event_bus_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(EventBridgeClient::new(&config), event_bus_name)
    }

    fn entry(&self, event: &DomainEvent) -> Result<PutEventsRequestEntry, PublishError> {
        let detail = event
            .detail_json()
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        Ok(PutEventsRequestEntry::builder()
            .event_bus_name(&self.event_bus_name)
            .source(&event.source)
            .detail_type(&event.detail_type)
            .detail(detail)
            .build())
    }
}

#[async_trait]
impl EventPublisher for EventBridgePublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let output = self
            .client
            .put_events()
            .entries(self.entry(event)?)
            .send()
            .await
            .map_err(|e| PublishError::AwsSdkError(e.to_string()))?;

        // PutEventsはエントリ単位で失敗を返す
        if output.failed_entry_count() > 0 {
            let reason = output
                .entries()
                .iter()
                .find_map(|entry| {
                    entry.error_code().map(|code| {
                        format!("{}: {}", code, entry.error_message().unwrap_or_default())
                    })
                })
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(PublishError::Rejected(reason));
        }

        info!(
            event_bus = %self.event_bus_name,
            source = %event.source,
            customer_id = %event.customer_id(),
            "ドメインイベント発行"
        );
        Ok(())
    }
}

/// 顧客作成ハンドラーを直接呼び出す実装
///
/// 配送時の形式（エンベロープ全体）をペイロードとして非同期呼び出しする。
pub struct LambdaInvokePublisher {
    client: LambdaClient,
    function_name: String,
}

impl LambdaInvokePublisher {
    pub fn new(client: LambdaClient, function_name: impl Into<String>) -> Self {
        Self {
            client,
            function_name: function_name.into(),
        }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(function_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(LambdaClient::new(&config), function_name)
    }
}

#[async_trait]
impl EventPublisher for LambdaInvokePublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| PublishError::Serialization(e.to_string()))?;

        let output = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| PublishError::AwsSdkError(e.to_string()))?;

        if let Some(function_error) = output.function_error() {
            return Err(PublishError::Rejected(function_error.to_string()));
        }

        info!(
            function_name = %self.function_name,
            status_code = output.status_code(),
            customer_id = %event.customer_id(),
            "顧客作成ハンドラー呼び出し"
        );
        Ok(())
    }
}
