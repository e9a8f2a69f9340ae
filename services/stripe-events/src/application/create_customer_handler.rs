/// 顧客作成ハンドラー
///
/// イベントルールに一致したドメインイベントを受け取り、`detail-type`の顧客IDを
/// キーとして顧客レコードを書き込む。
use tracing::info;

use crate::domain::{CustomerRecord, DomainEvent};
use crate::infrastructure::{CustomerRepository, RepositoryError};

/// 顧客作成ハンドラーのエラー型
#[derive(Debug, Clone, PartialEq)]
pub enum CreateCustomerError {
    /// `detail-type`が空
    MissingCustomerId,
    /// リポジトリ操作エラー
    RepositoryError(String),
}

impl From<RepositoryError> for CreateCustomerError {
    fn from(err: RepositoryError) -> Self {
        CreateCustomerError::RepositoryError(err.to_string())
    }
}

impl std::fmt::Display for CreateCustomerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateCustomerError::MissingCustomerId => {
                write!(f, "Missing customer id in detail-type")
            }
            CreateCustomerError::RepositoryError(msg) => {
                write!(f, "Repository error: {}", msg)
            }
        }
    }
}

impl std::error::Error for CreateCustomerError {}

/// ドメインイベントから顧客レコードを作成するハンドラー
pub struct CreateCustomerHandler<R>
where
    R: CustomerRepository,
{
    repository: R,
}

impl<R> CreateCustomerHandler<R>
where
    R: CustomerRepository,
{
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// イベントを処理し、書き込んだレコードを返す
    ///
    /// 同じ顧客IDへの再配送は既存レコードを置き換える。
    pub async fn handle(&self, event: &DomainEvent) -> Result<CustomerRecord, CreateCustomerError> {
        let customer_id = event.customer_id().trim();
        if customer_id.is_empty() {
            return Err(CreateCustomerError::MissingCustomerId);
        }

        let received_at = chrono::Utc::now().to_rfc3339();
        let mut record = CustomerRecord::from_event(event, &received_at);
        record.customer_id = customer_id.to_string();

        self.repository.put(&record).await?;

        info!(
            customer_id = %record.customer_id,
            source = %event.source,
            event_id = ?event.id,
            "顧客レコード書き込み完了"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventSource, StripeEventType};
    use crate::infrastructure::customer_repository::tests::MockCustomerRepository;
    use crate::infrastructure::logging::init_test_logging;

    fn create_test_handler() -> (CreateCustomerHandler<MockCustomerRepository>, MockCustomerRepository) {
        init_test_logging();
        let repository = MockCustomerRepository::new();
        (CreateCustomerHandler::new(repository.clone()), repository)
    }

    /// 配送時の形式のイベント
    fn delivered_event(customer_id: &str) -> DomainEvent {
        serde_json::from_value(serde_json::json!({
            "version": "0",
            "id": "evb-123",
            "detail-type": customer_id,
            "source": "stripeHandler.lambda",
            "account": "123456789012",
            "time": "2024-01-01T00:00:00Z",
            "region": "us-east-1",
            "resources": [],
            "detail": {"stripeEvent": ["customer.created"]}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_writes_record_keyed_by_detail_type() {
        let (handler, repository) = create_test_handler();

        let record = handler.handle(&delivered_event("cus_abc")).await.unwrap();

        assert_eq!(record.customer_id, "cus_abc");
        let stored = repository.record("cus_abc").unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.attributes["stripeEvent"], "customer.created");
        assert_eq!(stored.attributes["eventSource"], "stripeHandler.lambda");
        assert_eq!(stored.attributes["eventId"], "evb-123");
        assert!(chrono::DateTime::parse_from_rfc3339(
            stored.attributes["receivedAt"].as_str().unwrap()
        )
        .is_ok());
    }

    #[tokio::test]
    async fn test_scalar_stripe_event_is_written() {
        let (handler, repository) = create_test_handler();
        let event: DomainEvent = serde_json::from_value(serde_json::json!({
            "detail-type": "cus_1",
            "source": "stripeHandler.lambda",
            "detail": {"stripeEvent": "customer.created"}
        }))
        .unwrap();

        let record = handler.handle(&event).await.unwrap();

        assert_eq!(record.customer_id, "cus_1");
        let stored = repository.record("cus_1").unwrap();
        assert_eq!(stored.attributes["stripeEvent"], "customer.created");
        assert_eq!(stored.attributes["eventSource"], "stripeHandler.lambda");
    }

    #[tokio::test]
    async fn test_redelivery_replaces_record() {
        let (handler, repository) = create_test_handler();

        let first = delivered_event("cus_abc");
        let mut second = DomainEvent::new(
            EventSource::StripeWebhookHandler,
            StripeEventType::CustomerSubscriptionCreated,
            "cus_abc",
        );
        second.id = None;

        handler.handle(&first).await.unwrap();
        handler.handle(&second).await.unwrap();

        let stored = repository.record("cus_abc").unwrap();
        assert_eq!(repository.record_count(), 1);
        assert_eq!(repository.write_count(), 2);
        assert_eq!(stored.attributes["stripeEvent"], "customer.subscription.created");
        // 前回の属性は残らない
        assert!(!stored.attributes.contains_key("eventId"));
    }

    #[tokio::test]
    async fn test_empty_customer_id_is_rejected() {
        let (handler, repository) = create_test_handler();

        let result = handler.handle(&delivered_event("  ")).await;

        assert_eq!(result, Err(CreateCustomerError::MissingCustomerId));
        assert_eq!(repository.write_count(), 0);
    }

    #[tokio::test]
    async fn test_repository_failure_is_surfaced() {
        let (handler, repository) = create_test_handler();
        repository.set_next_error(RepositoryError::WriteError("ProvisionedThroughputExceeded".to_string()));

        let result = handler.handle(&delivered_event("cus_abc")).await;

        assert_eq!(
            result,
            Err(CreateCustomerError::RepositoryError(
                "Write error: ProvisionedThroughputExceeded".to_string()
            ))
        );
        assert_eq!(repository.record_count(), 0);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            CreateCustomerError::MissingCustomerId.to_string(),
            "Missing customer id in detail-type"
        );
    }
}
