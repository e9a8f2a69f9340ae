/// 顧客作成ハンドラー Lambdaエントリポイント
///
/// イベントルールから配送されたドメインイベントを受け取り、顧客テーブルに書き込む。
/// テーブル名は`CUSTOMER_TABLE_NAME`（なければ`HG_TABLE_NAME`）から読み込む。
use aws_sdk_dynamodb::Client as DynamoDbClient;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
use stripe_events::application::CreateCustomerHandler;
use stripe_events::domain::DomainEvent;
use stripe_events::infrastructure::{
    init_logging, CustomerRepository, CustomerTableConfig, DynamoCustomerRepository,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    let config = CustomerTableConfig::from_env()?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let repository = DynamoCustomerRepository::new(DynamoDbClient::new(&aws_config), config.table_name());

    info!(table_name = %config.table_name(), "顧客作成ハンドラーを初期化");

    let handler = CreateCustomerHandler::new(repository);
    let handler = &handler;

    lambda_runtime::run(service_fn(move |event: LambdaEvent<DomainEvent>| async move {
        handle(handler, event).await
    }))
    .await
}

/// Lambda関数のメインハンドラー
///
/// 失敗はそのままランタイムに返す（再試行・DLQはなし）。
async fn handle<R>(handler: &CreateCustomerHandler<R>, event: LambdaEvent<DomainEvent>) -> Result<Value, Error>
where
    R: CustomerRepository,
{
    let request_id = event.context.request_id.clone();

    match handler.handle(&event.payload).await {
        Ok(record) => Ok(json!({ "customerID": record.customer_id })),
        Err(err) => {
            error!(request_id = %request_id, error = %err, "顧客作成失敗");
            Err(err.into())
        }
    }
}
