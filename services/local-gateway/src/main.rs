//! Stripe Webhookパイプラインのローカルゲートウェイ
//!
//! API Gatewayのキャッチオールプロキシ・イベントバス・顧客作成ハンドラー・
//! 顧客テーブルを1プロセスで再現する開発用HTTPサーバー。
//! - 全メソッド・全パスのリクエストをWebhookレシーバーに渡す (ANY / , ANY /{proxy+})
//! - 発行されたドメインイベントはプロセス内のイベントルーターがルール評価して配送
//! - 顧客テーブルはSQLiteファイル

mod config;
mod store;

pub use config::GatewayConfig;
pub use store::{SqliteCustomerStore, StoreError};

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use stripe_events::application::{CreateCustomerHandler, EventRouter, EventTarget, WebhookHandler};
use stripe_events::domain::{Topology, SIGNATURE_HEADER};
use stripe_events::infrastructure::{init_logging, StaticSecretProvider};
use tokio::signal;
use tower_http::trace::TraceLayer;

/// ゲートウェイで使うWebhookレシーバー
pub type Receiver = WebhookHandler<StaticSecretProvider, Arc<EventRouter>>;

/// アプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<Receiver>,
}

/// 組み立て済みのパイプライン
pub struct Pipeline {
    pub receiver: Arc<Receiver>,
    pub router: Arc<EventRouter>,
    pub store: Arc<SqliteCustomerStore>,
}

impl Pipeline {
    /// トポロジーの宣言どおりにレシーバー・ルール・テーブルを結線する
    pub async fn build(topology: &Topology, config: &GatewayConfig) -> Result<Self, StoreError> {
        let store = Arc::new(SqliteCustomerStore::new(&config.db_path, &topology.table.table_name).await?);

        let handler: Arc<dyn EventTarget> = Arc::new(CreateCustomerHandler::new(Arc::clone(&store)));
        let router = Arc::new(EventRouter::from_topology(topology, handler));

        let mut receiver = WebhookHandler::new(
            StaticSecretProvider::new(config.webhook_secret.clone()),
            Arc::clone(&router),
            topology.emission.source,
            topology.emission.event_type,
        );
        if let Some(tolerance) = config.tolerance_seconds {
            receiver = receiver.with_tolerance(tolerance);
        }

        Ok(Self {
            receiver: Arc::new(receiver),
            router,
            store,
        })
    }
}

/// Webhook受信エンドポイント（メソッド・パスを問わない）
async fn receive_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let response = state.receiver.handle(signature, &body).await;
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    (status, [(header::CONTENT_TYPE, "text/plain")], response.body).into_response()
}

/// ルーターを構築する
pub fn create_router(receiver: Arc<Receiver>) -> Router {
    let state = AppState { receiver };

    Router::new()
        .route("/", any(receive_webhook))
        .route("/{*path}", any(receive_webhook))
        // リクエストトレーシングレイヤー（method, path, status, latencyを自動記録）
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// シャットダウンシグナルを待機する
///
/// SIGTERMまたはCtrl+C (SIGINT) のいずれかを受信したらリターンする。
/// ハンドラーを登録できなかったシグナルは待たない。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Ctrl+C シグナルハンドラーの登録に失敗しました");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "SIGTERM シグナルハンドラーの登録に失敗しました");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C (SIGINT) を受信しました。graceful shutdownを開始します");
        }
        _ = terminate => {
            tracing::info!("SIGTERM を受信しました。graceful shutdownを開始します");
        }
    }
}

/// メイン関数
///
/// 終了時は受付を止めたあと、配送中のイベントの処理完了を待つ。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = GatewayConfig::from_env()?;
    let topology = Topology::for_variant(config.variant);

    // 壊れた構成もそのまま再現する（デプロイ後と同じ挙動を確認するため）
    for problem in topology.problems() {
        tracing::warn!(variant = %config.variant, problem = %problem, "トポロジーに問題があります");
    }

    let pipeline = Pipeline::build(&topology, &config).await?;
    tracing::info!(
        variant = %config.variant,
        table_name = %pipeline.store.table_name(),
        db_path = %config.db_path,
        rules = pipeline.router.rules().len(),
        "パイプラインを初期化しました"
    );

    let app = create_router(Arc::clone(&pipeline.receiver));

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!("リッスン開始: {}", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.router.wait_idle().await;
    tracing::info!("サーバーが正常に停止しました");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::temp_db_path;
    use axum::{body::Body, http::Request};
    use stripe_events::application::DeliveryOutcome;
    use stripe_events::domain::{TopologyVariant, WebhookSignatureVerifier};
    use tower::ServiceExt;

    const SECRET: &str = "whsec_gateway_test";

    fn config(db_path: &str, variant: TopologyVariant) -> GatewayConfig {
        GatewayConfig {
            webhook_secret: SECRET.to_string(),
            variant,
            db_path: db_path.to_string(),
            addr: "127.0.0.1:0".parse().unwrap(),
            tolerance_seconds: None,
        }
    }

    async fn pipeline(db_path: &str, variant: TopologyVariant) -> Pipeline {
        Pipeline::build(&Topology::for_variant(variant), &config(db_path, variant))
            .await
            .unwrap()
    }

    fn stripe_event(event_type: &str, object: &str) -> String {
        format!(
            r#"{{"id":"evt_local","object":"event","type":"{}","created":1700000000,"data":{{"object":{}}}}}"#,
            event_type, object
        )
    }

    fn signed_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = WebhookSignatureVerifier::new(SECRET).sign_header(timestamp, body.as_bytes());

        Request::builder()
            .uri(uri)
            .method(method)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_customer_created_is_stored() {
        let (_dir, path) = temp_db_path();
        let pipeline = pipeline(&path, TopologyVariant::Customers).await;
        let app = create_router(Arc::clone(&pipeline.receiver));

        let body = stripe_event("customer.created", r#"{"id":"cus_local","object":"customer"}"#);
        let response = app.oneshot(signed_request("POST", "/", &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Update succeeded");

        pipeline.router.wait_idle().await;
        let stored = pipeline.store.find_customer("cus_local").await.unwrap().unwrap();
        assert_eq!(stored.attributes["eventSource"], "stripeHandler.lambda");
        assert_eq!(pipeline.router.outcomes()[0].outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_any_method_and_path_reaches_receiver() {
        let (_dir, path) = temp_db_path();
        let pipeline = pipeline(&path, TopologyVariant::Customers).await;

        for (method, uri) in [("PUT", "/webhooks/stripe"), ("PATCH", "/a/b/c"), ("GET", "/")] {
            let app = create_router(Arc::clone(&pipeline.receiver));
            let body = stripe_event("customer.created", r#"{"id":"cus_any"}"#);
            let response = app.oneshot(signed_request(method, uri, &body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{} {}", method, uri);
        }

        pipeline.router.wait_idle().await;
        assert_eq!(pipeline.store.list_customers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let (_dir, path) = temp_db_path();
        let pipeline = pipeline(&path, TopologyVariant::Customers).await;
        let app = create_router(Arc::clone(&pipeline.receiver));

        let request = Request::builder()
            .uri("/")
            .method("POST")
            .body(Body::from(stripe_event("customer.created", r#"{"id":"cus_x"}"#)))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(body_text(response).await, "Update failed");
        assert!(pipeline.store.list_customers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_body_is_unauthorized() {
        let (_dir, path) = temp_db_path();
        let pipeline = pipeline(&path, TopologyVariant::Customers).await;
        let app = create_router(Arc::clone(&pipeline.receiver));

        let body = stripe_event("customer.created", r#"{"id":"cus_x"}"#);
        let mut request = signed_request("POST", "/", &body);
        *request.body_mut() = Body::from(body.replace("cus_x", "cus_y"));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_other_event_type_is_acknowledged_but_not_stored() {
        let (_dir, path) = temp_db_path();
        let pipeline = pipeline(&path, TopologyVariant::Primary).await;
        let app = create_router(Arc::clone(&pipeline.receiver));

        let body = stripe_event("customer.created", r#"{"id":"cus_ignored"}"#);
        let response = app.oneshot(signed_request("POST", "/", &body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        pipeline.router.wait_idle().await;
        assert!(pipeline.store.list_customers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_primary_subscription_created_writes_customer_of_subscription() {
        let (_dir, path) = temp_db_path();
        let pipeline = pipeline(&path, TopologyVariant::Primary).await;
        let app = create_router(Arc::clone(&pipeline.receiver));

        let body = stripe_event(
            "customer.subscription.created",
            r#"{"id":"sub_1","object":"subscription","customer":"cus_sub"}"#,
        );
        let response = app.oneshot(signed_request("POST", "/", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        pipeline.router.wait_idle().await;
        assert_eq!(pipeline.store.table_name(), "StripeSampleCustomers");
        assert!(pipeline.store.find_customer("cus_sub").await.unwrap().is_some());
    }
}
