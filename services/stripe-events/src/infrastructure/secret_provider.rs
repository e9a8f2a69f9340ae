/// Webhookエンドポイントシークレットの取得
///
/// Secrets Manager（JSONシークレット内のキー）またはSSMパラメーターから読み込む。
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use aws_sdk_ssm::Client as SsmClient;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

/// JSONシークレット内のエンドポイントシークレットのキー
pub const ENDPOINT_SECRET_KEY: &str = "stripe-webhook-endpoint-secret";

/// シークレット取得のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SecretError {
    #[error("AWS API error: {0}")]
    AwsSdkError(String),
    #[error("secret {0} has no string value")]
    EmptySecret(String),
    #[error("secret {name} has no {key} field")]
    MissingKey { name: String, key: String },
}

/// シークレット取得トレイト
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// エンドポイントシークレットを取得
    async fn endpoint_secret(&self) -> Result<String, SecretError>;
}

#[async_trait]
impl<T> SecretProvider for Arc<T>
where
    T: SecretProvider + ?Sized,
{
    async fn endpoint_secret(&self) -> Result<String, SecretError> {
        (**self).endpoint_secret().await
    }
}

/// シークレット文字列からエンドポイントシークレットを取り出す
///
/// JSONオブジェクトなら`stripe-webhook-endpoint-secret`キーの値、
/// そうでなければ文字列そのもの。
pub fn extract_endpoint_secret(name: &str, raw: &str) -> Result<String, SecretError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SecretError::EmptySecret(name.to_string()));
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .get(ENDPOINT_SECRET_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SecretError::MissingKey {
                name: name.to_string(),
                key: ENDPOINT_SECRET_KEY.to_string(),
            }),
        _ => Ok(raw.to_string()),
    }
}

/// Secrets Manager実装
pub struct SecretsManagerSecretProvider {
    client: SecretsManagerClient,
    secret_name: String,
    version_stage: String,
}

impl SecretsManagerSecretProvider {
    pub fn new(
        client: SecretsManagerClient,
        secret_name: impl Into<String>,
        version_stage: impl Into<String>,
    ) -> Self {
        Self {
            client,
            secret_name: secret_name.into(),
            version_stage: version_stage.into(),
        }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(secret_name: impl Into<String>, version_stage: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(SecretsManagerClient::new(&config), secret_name, version_stage)
    }
}

#[async_trait]
impl SecretProvider for SecretsManagerSecretProvider {
    async fn endpoint_secret(&self) -> Result<String, SecretError> {
        let output = self
            .client
            .get_secret_value()
            .secret_id(&self.secret_name)
            .version_stage(&self.version_stage)
            .send()
            .await
            .map_err(|e| SecretError::AwsSdkError(e.to_string()))?;

        let raw = output
            .secret_string()
            .ok_or_else(|| SecretError::EmptySecret(self.secret_name.clone()))?;

        info!(
            secret_name = %self.secret_name,
            version = ?output.version_id(),
            "シークレット取得"
        );

        extract_endpoint_secret(&self.secret_name, raw)
    }
}

/// SSM Parameter Store実装
pub struct SsmParameterSecretProvider {
    client: SsmClient,
    parameter_name: String,
}

impl SsmParameterSecretProvider {
    pub fn new(client: SsmClient, parameter_name: impl Into<String>) -> Self {
        Self {
            client,
            parameter_name: parameter_name.into(),
        }
    }

    /// AWS設定からデフォルトのクライアントを作成
    pub async fn from_config(parameter_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(SsmClient::new(&config), parameter_name)
    }
}

#[async_trait]
impl SecretProvider for SsmParameterSecretProvider {
    async fn endpoint_secret(&self) -> Result<String, SecretError> {
        let output = self
            .client
            .get_parameter()
            .name(&self.parameter_name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| SecretError::AwsSdkError(e.to_string()))?;

        let raw = output
            .parameter()
            .and_then(|p| p.value())
            .ok_or_else(|| SecretError::EmptySecret(self.parameter_name.clone()))?;

        info!(parameter_name = %self.parameter_name, "パラメーター取得");

        extract_endpoint_secret(&self.parameter_name, raw)
    }
}

/// 環境変数から読む実装
///
/// 値はJSONシークレットでも生の文字列でもよい。呼び出しごとに読み直す。
#[derive(Debug, Clone)]
pub struct EnvironmentSecretProvider {
    variable: String,
}

impl EnvironmentSecretProvider {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for EnvironmentSecretProvider {
    async fn endpoint_secret(&self) -> Result<String, SecretError> {
        let raw = std::env::var(&self.variable)
            .map_err(|_| SecretError::EmptySecret(self.variable.clone()))?;
        extract_endpoint_secret(&self.variable, &raw)
    }
}

/// 固定値を返す実装（ローカル実行用）
#[derive(Debug, Clone)]
pub struct StaticSecretProvider {
    secret: String,
}

impl StaticSecretProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for StaticSecretProvider {
    async fn endpoint_secret(&self) -> Result<String, SecretError> {
        if self.secret.is_empty() {
            return Err(SecretError::EmptySecret("static".to_string()));
        }
        Ok(self.secret.clone())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// 呼び出し回数と次のエラーを制御できるモック
    #[derive(Debug, Clone)]
    pub struct MockSecretProvider {
        secret: String,
        calls: Arc<Mutex<usize>>,
        next_error: Arc<Mutex<Option<SecretError>>>,
    }

    impl MockSecretProvider {
        pub fn new(secret: impl Into<String>) -> Self {
            Self {
                secret: secret.into(),
                calls: Arc::new(Mutex::new(0)),
                next_error: Arc::new(Mutex::new(None)),
            }
        }

        pub fn set_next_error(&self, error: SecretError) {
            *self.next_error.lock().unwrap() = Some(error);
        }

        pub fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SecretProvider for MockSecretProvider {
        async fn endpoint_secret(&self) -> Result<String, SecretError> {
            *self.calls.lock().unwrap() += 1;
            if let Some(error) = self.next_error.lock().unwrap().take() {
                return Err(error);
            }
            Ok(self.secret.clone())
        }
    }

    #[test]
    fn test_extract_from_json_secret() {
        let raw = r#"{"stripe-webhook-endpoint-secret":"whsec_abc","other":"x"}"#;
        assert_eq!(
            extract_endpoint_secret("dev/StripeApp/stripe/secret", raw),
            Ok("whsec_abc".to_string())
        );
    }

    #[test]
    fn test_extract_plain_secret() {
        assert_eq!(
            extract_endpoint_secret("/stripe/secret", "  whsec_plain\n"),
            Ok("whsec_plain".to_string())
        );
    }

    #[test]
    fn test_extract_json_without_key() {
        assert_eq!(
            extract_endpoint_secret("s", r#"{"other":"x"}"#),
            Err(SecretError::MissingKey {
                name: "s".to_string(),
                key: ENDPOINT_SECRET_KEY.to_string(),
            })
        );
    }

    #[test]
    fn test_extract_empty() {
        assert_eq!(
            extract_endpoint_secret("s", "   "),
            Err(SecretError::EmptySecret("s".to_string()))
        );
    }

    #[tokio::test]
    async fn test_static_provider() {
        assert_eq!(
            StaticSecretProvider::new("whsec_local").endpoint_secret().await,
            Ok("whsec_local".to_string())
        );
        assert!(StaticSecretProvider::new("").endpoint_secret().await.is_err());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_environment_provider() {
        const VARIABLE: &str = "STRIPE_WEBHOOK_SECRET_PROVIDER_TEST";
        let provider = EnvironmentSecretProvider::new(VARIABLE);

        unsafe {
            std::env::remove_var(VARIABLE);
        }
        assert_eq!(
            provider.endpoint_secret().await,
            Err(SecretError::EmptySecret(VARIABLE.to_string()))
        );

        unsafe {
            std::env::set_var(VARIABLE, r#"{"stripe-webhook-endpoint-secret":"whsec_env"}"#);
        }
        assert_eq!(provider.endpoint_secret().await, Ok("whsec_env".to_string()));

        unsafe {
            std::env::remove_var(VARIABLE);
        }
    }

    #[tokio::test]
    async fn test_mock_provider_error_is_consumed() {
        let provider = MockSecretProvider::new("whsec_x");
        provider.set_next_error(SecretError::AwsSdkError("throttled".to_string()));

        assert!(provider.endpoint_secret().await.is_err());
        assert_eq!(provider.endpoint_secret().await, Ok("whsec_x".to_string()));
        assert_eq!(provider.call_count(), 2);
    }
}
