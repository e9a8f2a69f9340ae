//! ローカルゲートウェイの設定
//!
//! # 環境変数
//! - `STRIPE_WEBHOOK_SECRET`: エンドポイントシークレット（必須）
//! - `TOPOLOGY_VARIANT`: primary | hg | customers（デフォルト: customers）
//! - `DB_PATH`: データベースファイルのパス（デフォルト: stripe-customers.db）
//! - `GATEWAY_ADDR`: リッスンアドレス（デフォルト: 127.0.0.1:3000）
//! - `SIGNATURE_TOLERANCE_SECONDS`: 署名タイムスタンプの許容誤差（省略時は300秒、0で無効）

use std::net::SocketAddr;
use std::str::FromStr;

use stripe_events::domain::TopologyVariant;
use stripe_events::infrastructure::ConfigError;

const STRIPE_WEBHOOK_SECRET: &str = "STRIPE_WEBHOOK_SECRET";
const TOPOLOGY_VARIANT: &str = "TOPOLOGY_VARIANT";
const DB_PATH: &str = "DB_PATH";
const GATEWAY_ADDR: &str = "GATEWAY_ADDR";
const SIGNATURE_TOLERANCE_SECONDS: &str = "SIGNATURE_TOLERANCE_SECONDS";

pub const DEFAULT_DB_PATH: &str = "stripe-customers.db";
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub webhook_secret: String,
    pub variant: TopologyVariant,
    pub db_path: String,
    pub addr: SocketAddr,
    pub tolerance_seconds: Option<i64>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let webhook_secret = non_empty_env(STRIPE_WEBHOOK_SECRET)
            .ok_or_else(|| ConfigError::MissingEnvVar(STRIPE_WEBHOOK_SECRET.to_string()))?;

        let tolerance_seconds = match non_empty_env(SIGNATURE_TOLERANCE_SECONDS) {
            Some(value) => Some(parse(SIGNATURE_TOLERANCE_SECONDS, &value)?),
            None => None,
        };

        Ok(Self {
            webhook_secret,
            variant: parse(
                TOPOLOGY_VARIANT,
                &non_empty_env(TOPOLOGY_VARIANT).unwrap_or_else(|| "customers".to_string()),
            )?,
            db_path: non_empty_env(DB_PATH).unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            addr: parse(
                GATEWAY_ADDR,
                &non_empty_env(GATEWAY_ADDR).unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            )?,
            tolerance_seconds,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
