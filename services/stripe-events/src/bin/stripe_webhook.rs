/// Stripe Webhookレシーバー HTTP Lambdaエントリポイント
///
/// API Gatewayのキャッチオールプロキシ経由でStripeからの通知を受け取り、
/// 署名を検証してドメインイベントを発行する。
///
/// # 環境変数
/// - EVENT_BUS_NAME: 発行先イベントバス（デフォルト: stripeAppEventBus）
/// - EVENT_SOURCE / STRIPE_EVENT_TYPE: 発行するイベントの発行元と種別
/// - STRIPE_SECRET_SOURCE: secretsmanager | ssm | env
/// - STRIPE_SECRET_NAME / STRIPE_SECRET_VERSION: エンドポイントシークレットの場所
///   （envの場合はシークレットを持つ環境変数名、デフォルト: STRIPE_WEBHOOK_SECRET）
/// - EVENT_DISPATCH: eventbridge | lambda
/// - CREATE_CUSTOMER_FUNCTION_NAME: lambda配送時の呼び出し先
use std::sync::Arc;

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use stripe_events::application::WebhookHandler;
use stripe_events::domain::topology::SecretSource;
use stripe_events::domain::SIGNATURE_HEADER;
use stripe_events::infrastructure::{
    init_logging, EnvironmentSecretProvider, EventBridgePublisher, EventDispatch, EventPublisher,
    LambdaInvokePublisher, SecretProvider, SecretsManagerSecretProvider, SsmParameterSecretProvider,
    WebhookConfig,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // 構造化ログを初期化
    init_logging();

    let config = WebhookConfig::from_env()?;

    let secrets: Arc<dyn SecretProvider> = match config.secret_source {
        SecretSource::SecretsManager => Arc::new(
            SecretsManagerSecretProvider::from_config(&config.secret_name, &config.secret_version).await,
        ),
        SecretSource::Ssm => Arc::new(SsmParameterSecretProvider::from_config(&config.secret_name).await),
        SecretSource::Env => Arc::new(EnvironmentSecretProvider::new(&config.secret_name)),
    };

    let publisher: Arc<dyn EventPublisher> = match (config.dispatch, &config.create_customer_function_name) {
        (EventDispatch::Lambda, Some(function_name)) => {
            Arc::new(LambdaInvokePublisher::from_config(function_name).await)
        }
        _ => Arc::new(EventBridgePublisher::from_config(&config.event_bus_name).await),
    };

    info!(
        event_source = %config.event_source,
        stripe_event = %config.event_type,
        event_bus = %config.event_bus_name,
        dispatch = ?config.dispatch,
        "Webhookレシーバーを初期化"
    );

    let handler = WebhookHandler::new(secrets, publisher, config.event_source, config.event_type);
    let handler = &handler;

    run(service_fn(move |request: Request| async move { handle(handler, request).await })).await
}

/// HTTPリクエストハンドラー
///
/// メソッドとパスは問わない。
async fn handle<SP, EP>(handler: &WebhookHandler<SP, EP>, request: Request) -> Result<Response<Body>, Error>
where
    SP: SecretProvider,
    EP: EventPublisher,
{
    let signature = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let response = handler.handle(signature, request.body().as_ref()).await;

    Ok(Response::builder()
        .status(response.status_code)
        .header("content-type", "text/plain")
        .body(Body::from(response.body))?)
}
