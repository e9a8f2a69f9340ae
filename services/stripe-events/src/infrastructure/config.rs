/// 環境変数からの設定読み込み
///
/// Webhookレシーバーと顧客作成ハンドラーの設定を保持する。
use std::str::FromStr;

use thiserror::Error;

use crate::domain::topology::{env, SecretSource, DEFAULT_EVENT_BUS_NAME, DEFAULT_SECRET_NAME};
use crate::domain::{EventSource, StripeEventType};

/// シークレットのデフォルトバージョンステージ
pub const DEFAULT_SECRET_VERSION: &str = "AWSCURRENT";

const STRIPE_SECRET_VERSION: &str = "STRIPE_SECRET_VERSION";
const EVENT_DISPATCH: &str = "EVENT_DISPATCH";
const CREATE_CUSTOMER_FUNCTION_NAME: &str = "CREATE_CUSTOMER_FUNCTION_NAME";

/// 設定読み込みのエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// ドメインイベントの配送方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDispatch {
    /// EventBridgeのPutEvents
    EventBridge,
    /// 顧客作成ハンドラーの非同期直接呼び出し
    Lambda,
}

impl FromStr for EventDispatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eventbridge" => Ok(EventDispatch::EventBridge),
            "lambda" => Ok(EventDispatch::Lambda),
            other => Err(format!("expected eventbridge or lambda, got {}", other)),
        }
    }
}

/// Webhookレシーバーの設定
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub event_bus_name: String,
    pub event_source: EventSource,
    pub event_type: StripeEventType,
    pub secret_name: String,
    pub secret_version: String,
    pub secret_source: SecretSource,
    pub dispatch: EventDispatch,
    /// `EventDispatch::Lambda`の場合のみ必須
    pub create_customer_function_name: Option<String>,
}

impl WebhookConfig {
    /// デフォルト値で作成（サブスクリプション作成を発行）
    pub fn new(event_source: EventSource, event_type: StripeEventType) -> Self {
        Self {
            event_bus_name: DEFAULT_EVENT_BUS_NAME.to_string(),
            event_source,
            event_type,
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            secret_version: DEFAULT_SECRET_VERSION.to_string(),
            secret_source: SecretSource::SecretsManager,
            dispatch: EventDispatch::EventBridge,
            create_customer_function_name: None,
        }
    }

    /// 環境変数から読み込み
    ///
    /// 未設定の項目はデフォルト値を使う。`EVENT_DISPATCH=lambda`の場合は
    /// `CREATE_CUSTOMER_FUNCTION_NAME`が必須。
    pub fn from_env() -> Result<Self, ConfigError> {
        let event_source = parse_env_or(env::EVENT_SOURCE, EventSource::StripeWebhookHandler)?;
        let event_type =
            parse_env_or(env::STRIPE_EVENT_TYPE, StripeEventType::CustomerSubscriptionCreated)?;

        let mut config = Self::new(event_source, event_type);
        config.event_bus_name = env_or(env::EVENT_BUS_NAME, DEFAULT_EVENT_BUS_NAME);
        config.secret_source = parse_env_or(env::STRIPE_SECRET_SOURCE, SecretSource::SecretsManager)?;
        config.secret_name = env_or(env::STRIPE_SECRET_NAME, config.secret_source.default_secret_name());
        config.secret_version = env_or(STRIPE_SECRET_VERSION, DEFAULT_SECRET_VERSION);
        config.dispatch = parse_env_or(EVENT_DISPATCH, EventDispatch::EventBridge)?;
        config.create_customer_function_name = non_empty_env(CREATE_CUSTOMER_FUNCTION_NAME);

        if config.dispatch == EventDispatch::Lambda && config.create_customer_function_name.is_none() {
            return Err(ConfigError::MissingEnvVar(CREATE_CUSTOMER_FUNCTION_NAME.to_string()));
        }

        Ok(config)
    }
}

/// 顧客テーブルの設定
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTableConfig {
    table_name: String,
}

impl CustomerTableConfig {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }

    /// `CUSTOMER_TABLE_NAME`、なければ`HG_TABLE_NAME`から読み込み
    pub fn from_env() -> Result<Self, ConfigError> {
        non_empty_env(env::CUSTOMER_TABLE_NAME)
            .or_else(|| non_empty_env(env::HG_TABLE_NAME))
            .map(Self::new)
            .ok_or_else(|| ConfigError::MissingEnvVar(env::CUSTOMER_TABLE_NAME.to_string()))
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    non_empty_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_env(name) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
