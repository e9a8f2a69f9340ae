/// スタック構成の宣言モデル
///
/// 顧客テーブル、イベントバス、実行ロール、2つの関数、RESTフロントドア、
/// イベントルール、呼び出し許可を型付きで宣言する。3つのバリアントを持ち、
/// 検証（許可の網羅性、発行側とルールの契約一致）と合成（JSON出力）を行う。
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::domain_event::DomainEvent;
use super::event_pattern::EventPattern;
use super::permission::{
    InvocationEdge, InvocationSource, PermissionGraph, ServicePrincipal, INVOKE_FUNCTION_ACTION,
};
use super::stripe_event_type::{EventSource, StripeEventType};

/// 関数のタイムアウト（秒）
pub const FUNCTION_TIMEOUT_SECONDS: u64 = 8;

/// デフォルトのイベントバス名
pub const DEFAULT_EVENT_BUS_NAME: &str = "stripeAppEventBus";

/// デフォルトのシークレット名
pub const DEFAULT_SECRET_NAME: &str = "dev/StripeApp/stripe/secret";

/// 環境変数経由でシークレットを受け取る場合の変数名
pub const DEFAULT_SECRET_ENV_VAR: &str = "STRIPE_WEBHOOK_SECRET";

/// Webhookレシーバーの環境変数名
pub mod env {
    pub const EVENT_BUS_NAME: &str = "EVENT_BUS_NAME";
    pub const EVENT_SOURCE: &str = "EVENT_SOURCE";
    pub const STRIPE_EVENT_TYPE: &str = "STRIPE_EVENT_TYPE";
    pub const STRIPE_SECRET_NAME: &str = "STRIPE_SECRET_NAME";
    pub const STRIPE_SECRET_SOURCE: &str = "STRIPE_SECRET_SOURCE";
    pub const CUSTOMER_TABLE_NAME: &str = "CUSTOMER_TABLE_NAME";
    pub const HG_TABLE_NAME: &str = "HG_TABLE_NAME";
}

// ==================== 宣言要素 ====================

/// スタックのバリアント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyVariant {
    /// eu-west-1、Secrets Manager利用、サブスクリプション作成を購読
    Primary,
    /// HG_TABLE_NAME、関数ごとに個別ロール
    Hg,
    /// StripeCustomersテーブル、顧客作成を購読、ランタイム変更
    Customers,
}

impl TopologyVariant {
    pub const ALL: [TopologyVariant; 3] = [
        TopologyVariant::Primary,
        TopologyVariant::Hg,
        TopologyVariant::Customers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyVariant::Primary => "primary",
            TopologyVariant::Hg => "hg",
            TopologyVariant::Customers => "customers",
        }
    }
}

impl fmt::Display for TopologyVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopologyVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown variant: {} (expected primary, hg or customers)", s))
    }
}

/// マネージドポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ManagedPolicy {
    #[serde(rename = "service-role/AWSLambdaBasicExecutionRole")]
    LambdaBasicExecution,
    #[serde(rename = "AmazonEventBridgeFullAccess")]
    EventBridgeFullAccess,
    #[serde(rename = "SecretsManagerReadWrite")]
    SecretsManagerReadWrite,
    #[serde(rename = "AmazonSSMReadOnlyAccess")]
    SsmReadOnly,
}

/// 関数ランタイム
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Runtime {
    #[serde(rename = "provided.al2")]
    ProvidedAl2,
    #[serde(rename = "provided.al2023")]
    ProvidedAl2023,
}

/// 関数の役割
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionKind {
    WebhookReceiver,
    CustomerCreation,
}

/// シークレットの取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSource {
    SecretsManager,
    Ssm,
    /// デプロイ時に注入される環境変数（ポリシー不要）
    Env,
}

impl SecretSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretSource::SecretsManager => "secretsmanager",
            SecretSource::Ssm => "ssm",
            SecretSource::Env => "env",
        }
    }

    /// 取得に必要なポリシー
    pub fn required_policy(&self) -> Option<ManagedPolicy> {
        match self {
            SecretSource::SecretsManager => Some(ManagedPolicy::SecretsManagerReadWrite),
            SecretSource::Ssm => Some(ManagedPolicy::SsmReadOnly),
            SecretSource::Env => None,
        }
    }

    /// `STRIPE_SECRET_NAME`の既定値
    pub fn default_secret_name(&self) -> &'static str {
        match self {
            SecretSource::SecretsManager | SecretSource::Ssm => DEFAULT_SECRET_NAME,
            SecretSource::Env => DEFAULT_SECRET_ENV_VAR,
        }
    }

    /// シークレットを読めるマネージドポリシーか
    pub fn grants_secret_access(policy: ManagedPolicy) -> bool {
        matches!(
            policy,
            ManagedPolicy::SecretsManagerReadWrite | ManagedPolicy::SsmReadOnly
        )
    }
}

impl FromStr for SecretSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "secretsmanager" => Ok(SecretSource::SecretsManager),
            "ssm" => Ok(SecretSource::Ssm),
            "env" => Ok(SecretSource::Env),
            other => Err(format!("unknown secret source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyAttribute {
    pub name: String,
    #[serde(rename = "type")]
    pub attribute_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDecl {
    pub logical_id: String,
    pub table_name: String,
    pub partition_key: KeyAttribute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBusDecl {
    pub logical_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDecl {
    pub logical_id: String,
    pub role_name: String,
    pub assumed_by: ServicePrincipal,
    pub managed_policies: BTreeSet<ManagedPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDecl {
    pub logical_id: String,
    pub kind: FunctionKind,
    pub runtime: Runtime,
    pub handler: String,
    pub code_asset: String,
    pub timeout_seconds: u64,
    pub role: String,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestApiDecl {
    pub logical_id: String,
    pub handler: String,
    pub routes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDecl {
    pub logical_id: String,
    pub rule_name: String,
    pub event_bus: String,
    pub enabled: bool,
    pub description: String,
    pub event_pattern: EventPattern,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecl {
    pub logical_id: String,
    pub function: String,
    pub principal: ServicePrincipal,
    pub action: String,
    pub source: InvocationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableGrant {
    pub table: String,
    pub function: String,
    pub access: String,
}

/// Webhookレシーバーが発行するイベントの定義
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Emission {
    pub source: EventSource,
    pub event_type: StripeEventType,
}

impl Emission {
    /// このバリアントのレシーバーが発行する代表イベント
    pub fn sample_event(&self, customer_id: &str) -> DomainEvent {
        DomainEvent::new(self.source, self.event_type, customer_id)
    }
}

// ==================== 検証エラー ====================

/// 構成上の問題
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyProblem {
    #[error("duplicate logical id: {0}")]
    DuplicateLogicalId(String),
    #[error("{context} references unknown function {function}")]
    UnknownFunction { context: String, function: String },
    #[error("function {function} references unknown role {role}")]
    UnknownRole { function: String, role: String },
    #[error("rule {rule} is attached to unknown event bus {bus}")]
    UnknownEventBus { rule: String, bus: String },
    #[error("function {function} timeout must be between 1 and 8s, got {seconds}s")]
    InvalidTimeout { function: String, seconds: u64 },
    #[error("missing invocation grant for {0}")]
    MissingGrant(InvocationEdge),
    #[error("function {function} has no table name variable")]
    MissingTableEnvironment { function: String },
    #[error("function {function} has no read/write grant on table {table}")]
    MissingTableGrant { function: String, table: String },
    #[error("role {role} of function {function} lacks managed policy {policy:?}")]
    MissingPolicy {
        function: String,
        role: String,
        policy: ManagedPolicy,
    },
    #[error("rule {rule} does not match the receiver's emission ({source_name} / {event_type})")]
    ContractMismatch {
        rule: String,
        source_name: String,
        event_type: String,
    },
}

/// 検証エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("topology has {} problem(s): {}", .0.len(), join_problems(.0))]
    Invalid(Vec<TopologyProblem>),
}

fn join_problems(problems: &[TopologyProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ==================== トポロジー ====================

/// スタック全体の宣言
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub variant: TopologyVariant,
    pub stack_name: String,
    pub region: Option<String>,
    pub table: TableDecl,
    pub event_bus: EventBusDecl,
    pub roles: Vec<RoleDecl>,
    pub functions: Vec<FunctionDecl>,
    pub rest_api: RestApiDecl,
    pub rules: Vec<RuleDecl>,
    pub permissions: Vec<PermissionDecl>,
    pub table_grants: Vec<TableGrant>,
    pub emission: Emission,
}

/// バリアントごとの差分
struct VariantSettings {
    stack_name: &'static str,
    region: Option<&'static str>,
    table_name: &'static str,
    table_env_var: &'static str,
    emission: Emission,
    runtime: Runtime,
    secret_source: SecretSource,
    shared_role: bool,
}

impl VariantSettings {
    fn of(variant: TopologyVariant) -> Self {
        match variant {
            TopologyVariant::Primary => Self {
                stack_name: "eventbridge-stripe",
                region: Some("eu-west-1"),
                table_name: "StripeSampleCustomers",
                table_env_var: env::CUSTOMER_TABLE_NAME,
                emission: Emission {
                    source: EventSource::StripeWebhookHandler,
                    event_type: StripeEventType::CustomerSubscriptionCreated,
                },
                runtime: Runtime::ProvidedAl2,
                secret_source: SecretSource::SecretsManager,
                shared_role: true,
            },
            TopologyVariant::Hg => Self {
                stack_name: "eventbridge-stripe-hg",
                region: None,
                table_name: "HgStripeCustomers",
                table_env_var: env::HG_TABLE_NAME,
                emission: Emission {
                    source: EventSource::StripeWebhookHandler,
                    event_type: StripeEventType::CustomerSubscriptionCreated,
                },
                runtime: Runtime::ProvidedAl2,
                secret_source: SecretSource::Env,
                shared_role: false,
            },
            TopologyVariant::Customers => Self {
                stack_name: "eventbridge-stripe-customers",
                region: None,
                table_name: "StripeCustomers",
                table_env_var: env::CUSTOMER_TABLE_NAME,
                emission: Emission {
                    source: EventSource::StripeHandler,
                    event_type: StripeEventType::CustomerCreated,
                },
                runtime: Runtime::ProvidedAl2023,
                secret_source: SecretSource::Env,
                shared_role: true,
            },
        }
    }
}

/// 論理ID
pub mod logical_ids {
    pub const TABLE: &str = "StripeSampleCustomers";
    pub const EVENT_BUS: &str = "stripeAppEventBus";
    pub const SHARED_ROLE: &str = "Role";
    pub const RECEIVER_ROLE: &str = "WebhookRole";
    pub const HANDLER_ROLE: &str = "CustomerRole";
    pub const HANDLER: &str = "createStripeCustomerHandler";
    pub const RECEIVER: &str = "stripeWebhookEventHandler";
    pub const REST_API: &str = "stripeWebhookAPI";
    pub const RULE: &str = "stripeWebhookEventRule";
    pub const RULE_PERMISSION: &str = "createStripeCustomerHandlerPermission";
    pub const RECEIVER_PERMISSION: &str = "stripeWebhookHandlerPermission";
    pub const API_PERMISSION: &str = "stripeWebhookAPIPermission";
}

impl Topology {
    /// バリアントの宣言を組み立てる
    pub fn for_variant(variant: TopologyVariant) -> Self {
        use logical_ids as ids;

        let settings = VariantSettings::of(variant);

        let base_policies = [
            ManagedPolicy::LambdaBasicExecution,
            ManagedPolicy::EventBridgeFullAccess,
        ];

        let (roles, receiver_role, handler_role) = if settings.shared_role {
            let mut policies: BTreeSet<ManagedPolicy> = base_policies.into_iter().collect();
            policies.extend(settings.secret_source.required_policy());
            let role = RoleDecl {
                logical_id: ids::SHARED_ROLE.to_string(),
                role_name: format!("{}-stripeAppRole", settings.stack_name),
                assumed_by: ServicePrincipal::Lambda,
                managed_policies: policies,
            };
            (vec![role], ids::SHARED_ROLE, ids::SHARED_ROLE)
        } else {
            let mut receiver_policies: BTreeSet<ManagedPolicy> = base_policies.into_iter().collect();
            receiver_policies.extend(settings.secret_source.required_policy());
            let receiver = RoleDecl {
                logical_id: ids::RECEIVER_ROLE.to_string(),
                role_name: format!("{}-webhookRole", settings.stack_name),
                assumed_by: ServicePrincipal::Lambda,
                managed_policies: receiver_policies,
            };
            let handler = RoleDecl {
                logical_id: ids::HANDLER_ROLE.to_string(),
                role_name: format!("{}-customerRole", settings.stack_name),
                assumed_by: ServicePrincipal::Lambda,
                managed_policies: [ManagedPolicy::LambdaBasicExecution].into_iter().collect(),
            };
            (vec![receiver, handler], ids::RECEIVER_ROLE, ids::HANDLER_ROLE)
        };

        let handler = FunctionDecl {
            logical_id: ids::HANDLER.to_string(),
            kind: FunctionKind::CustomerCreation,
            runtime: settings.runtime,
            handler: "bootstrap".to_string(),
            code_asset: "target/lambda/create_customer".to_string(),
            timeout_seconds: FUNCTION_TIMEOUT_SECONDS,
            role: handler_role.to_string(),
            environment: BTreeMap::from([(
                settings.table_env_var.to_string(),
                settings.table_name.to_string(),
            )]),
        };

        let mut receiver_env = BTreeMap::from([
            (env::EVENT_BUS_NAME.to_string(), DEFAULT_EVENT_BUS_NAME.to_string()),
            (env::EVENT_SOURCE.to_string(), settings.emission.source.as_str().to_string()),
            (
                env::STRIPE_EVENT_TYPE.to_string(),
                settings.emission.event_type.as_str().to_string(),
            ),
            (
                env::STRIPE_SECRET_SOURCE.to_string(),
                settings.secret_source.as_str().to_string(),
            ),
        ]);
        receiver_env.insert(
            env::STRIPE_SECRET_NAME.to_string(),
            settings.secret_source.default_secret_name().to_string(),
        );

        let receiver = FunctionDecl {
            logical_id: ids::RECEIVER.to_string(),
            kind: FunctionKind::WebhookReceiver,
            runtime: settings.runtime,
            handler: "bootstrap".to_string(),
            code_asset: "target/lambda/stripe_webhook".to_string(),
            timeout_seconds: FUNCTION_TIMEOUT_SECONDS,
            role: receiver_role.to_string(),
            environment: receiver_env,
        };

        let rule = RuleDecl {
            logical_id: ids::RULE.to_string(),
            rule_name: ids::RULE.to_string(),
            event_bus: ids::EVENT_BUS.to_string(),
            enabled: true,
            description: "all success events are caught here and logged centrally".to_string(),
            event_pattern: EventPattern::for_stripe(
                settings.emission.source,
                &[settings.emission.event_type],
            ),
            targets: vec![ids::HANDLER.to_string()],
        };

        let permissions = vec![
            PermissionDecl {
                logical_id: ids::RULE_PERMISSION.to_string(),
                function: ids::HANDLER.to_string(),
                principal: ServicePrincipal::Events,
                action: INVOKE_FUNCTION_ACTION.to_string(),
                source: InvocationSource::Rule(ids::RULE.to_string()),
            },
            PermissionDecl {
                logical_id: ids::RECEIVER_PERMISSION.to_string(),
                function: ids::HANDLER.to_string(),
                principal: ServicePrincipal::Lambda,
                action: INVOKE_FUNCTION_ACTION.to_string(),
                source: InvocationSource::Function(ids::RECEIVER.to_string()),
            },
            PermissionDecl {
                logical_id: ids::API_PERMISSION.to_string(),
                function: ids::RECEIVER.to_string(),
                principal: ServicePrincipal::ApiGateway,
                action: INVOKE_FUNCTION_ACTION.to_string(),
                source: InvocationSource::RestApi(ids::REST_API.to_string()),
            },
        ];

        Self {
            variant,
            stack_name: settings.stack_name.to_string(),
            region: settings.region.map(str::to_string),
            table: TableDecl {
                logical_id: ids::TABLE.to_string(),
                table_name: settings.table_name.to_string(),
                partition_key: KeyAttribute {
                    name: super::customer_record::CUSTOMER_ID_ATTRIBUTE.to_string(),
                    attribute_type: "S".to_string(),
                },
            },
            event_bus: EventBusDecl {
                logical_id: ids::EVENT_BUS.to_string(),
                name: DEFAULT_EVENT_BUS_NAME.to_string(),
            },
            roles,
            functions: vec![handler, receiver],
            rest_api: RestApiDecl {
                logical_id: ids::REST_API.to_string(),
                handler: ids::RECEIVER.to_string(),
                routes: vec!["ANY /".to_string(), "ANY /{proxy+}".to_string()],
            },
            rules: vec![rule],
            permissions,
            table_grants: vec![TableGrant {
                table: ids::TABLE.to_string(),
                function: ids::HANDLER.to_string(),
                access: "ReadWriteData".to_string(),
            }],
            emission: settings.emission,
        }
    }

    /// 関数を論理IDで取得
    pub fn function(&self, logical_id: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.logical_id == logical_id)
    }

    /// 役割で関数を取得
    pub fn function_of_kind(&self, kind: FunctionKind) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.kind == kind)
    }

    fn role(&self, logical_id: &str) -> Option<&RoleDecl> {
        self.roles.iter().find(|r| r.logical_id == logical_id)
    }

    /// 顧客作成ハンドラーのテーブル名環境変数（名前, 値）
    pub fn table_environment(&self) -> Option<(&str, &str)> {
        let handler = self.function_of_kind(FunctionKind::CustomerCreation)?;
        [env::CUSTOMER_TABLE_NAME, env::HG_TABLE_NAME]
            .into_iter()
            .find_map(|name| handler.environment.get(name).map(|v| (name, v.as_str())))
    }

    /// 宣言されている呼び出し経路
    ///
    /// フロントドア → レシーバー、ルール → ターゲット、レシーバー → ハンドラー。
    pub fn invocation_edges(&self) -> Vec<InvocationEdge> {
        let mut edges = vec![InvocationEdge::new(
            InvocationSource::RestApi(self.rest_api.logical_id.clone()),
            self.rest_api.handler.clone(),
            ServicePrincipal::ApiGateway,
        )];

        for rule in &self.rules {
            for target in &rule.targets {
                edges.push(InvocationEdge::new(
                    InvocationSource::Rule(rule.logical_id.clone()),
                    target.clone(),
                    ServicePrincipal::Events,
                ));
            }
        }

        if let (Some(receiver), Some(handler)) = (
            self.function_of_kind(FunctionKind::WebhookReceiver),
            self.function_of_kind(FunctionKind::CustomerCreation),
        ) {
            edges.push(InvocationEdge::new(
                InvocationSource::Function(receiver.logical_id.clone()),
                handler.logical_id.clone(),
                ServicePrincipal::Lambda,
            ));
        }

        edges
    }

    /// 宣言された許可から権限グラフを構築
    pub fn permission_graph(&self) -> PermissionGraph {
        self.permissions
            .iter()
            .filter(|p| p.action == INVOKE_FUNCTION_ACTION)
            .map(|p| InvocationEdge::new(p.source.clone(), p.function.clone(), p.principal))
            .collect()
    }

    /// 発行側とルールの契約を検証
    ///
    /// レシーバーの発行イベントが、ハンドラーを対象とする全ルールに一致すること。
    pub fn check_event_contract(&self) -> Vec<TopologyProblem> {
        let Some(handler) = self.function_of_kind(FunctionKind::CustomerCreation) else {
            return Vec::new();
        };
        let event = self.emission.sample_event("cus_contract_check");

        self.rules
            .iter()
            .filter(|rule| rule.targets.contains(&handler.logical_id))
            .filter(|rule| !rule.event_pattern.matches(&event))
            .map(|rule| TopologyProblem::ContractMismatch {
                rule: rule.logical_id.clone(),
                source_name: self.emission.source.as_str().to_string(),
                event_type: self.emission.event_type.as_str().to_string(),
            })
            .collect()
    }

    /// 全ての問題を列挙
    pub fn problems(&self) -> Vec<TopologyProblem> {
        let mut problems = Vec::new();

        // 論理IDの重複
        let mut seen = BTreeSet::new();
        let ids = std::iter::once(&self.table.logical_id)
            .chain(std::iter::once(&self.event_bus.logical_id))
            .chain(std::iter::once(&self.rest_api.logical_id))
            .chain(self.roles.iter().map(|r| &r.logical_id))
            .chain(self.functions.iter().map(|f| &f.logical_id))
            .chain(self.rules.iter().map(|r| &r.logical_id))
            .chain(self.permissions.iter().map(|p| &p.logical_id));
        for id in ids {
            if !seen.insert(id.as_str()) {
                problems.push(TopologyProblem::DuplicateLogicalId(id.clone()));
            }
        }

        // 関数ごとの検証
        for function in &self.functions {
            if function.timeout_seconds == 0 || function.timeout_seconds > FUNCTION_TIMEOUT_SECONDS {
                problems.push(TopologyProblem::InvalidTimeout {
                    function: function.logical_id.clone(),
                    seconds: function.timeout_seconds,
                });
            }

            let Some(role) = self.role(&function.role) else {
                problems.push(TopologyProblem::UnknownRole {
                    function: function.logical_id.clone(),
                    role: function.role.clone(),
                });
                continue;
            };

            for policy in self.required_policies(function) {
                if !role.managed_policies.contains(&policy) {
                    problems.push(TopologyProblem::MissingPolicy {
                        function: function.logical_id.clone(),
                        role: role.logical_id.clone(),
                        policy,
                    });
                }
            }

            if function.kind == FunctionKind::CustomerCreation {
                let has_table_env = [env::CUSTOMER_TABLE_NAME, env::HG_TABLE_NAME]
                    .iter()
                    .any(|name| function.environment.contains_key(*name));
                if !has_table_env {
                    problems.push(TopologyProblem::MissingTableEnvironment {
                        function: function.logical_id.clone(),
                    });
                }

                let granted = self
                    .table_grants
                    .iter()
                    .any(|g| g.function == function.logical_id && g.table == self.table.logical_id);
                if !granted {
                    problems.push(TopologyProblem::MissingTableGrant {
                        function: function.logical_id.clone(),
                        table: self.table.logical_id.clone(),
                    });
                }
            }
        }

        // 参照先の存在
        if self.function(&self.rest_api.handler).is_none() {
            problems.push(TopologyProblem::UnknownFunction {
                context: format!("rest api {}", self.rest_api.logical_id),
                function: self.rest_api.handler.clone(),
            });
        }
        for rule in &self.rules {
            if rule.event_bus != self.event_bus.logical_id {
                problems.push(TopologyProblem::UnknownEventBus {
                    rule: rule.logical_id.clone(),
                    bus: rule.event_bus.clone(),
                });
            }
            for target in &rule.targets {
                if self.function(target).is_none() {
                    problems.push(TopologyProblem::UnknownFunction {
                        context: format!("rule {}", rule.logical_id),
                        function: target.clone(),
                    });
                }
            }
        }
        for permission in &self.permissions {
            if self.function(&permission.function).is_none() {
                problems.push(TopologyProblem::UnknownFunction {
                    context: format!("permission {}", permission.logical_id),
                    function: permission.function.clone(),
                });
            }
        }

        // 呼び出し許可の網羅性
        let graph = self.permission_graph();
        let edges = self.invocation_edges();
        problems.extend(
            graph
                .missing_grants(&edges)
                .into_iter()
                .map(TopologyProblem::MissingGrant),
        );

        problems.extend(self.check_event_contract());
        problems
    }

    /// 問題がなければOk
    pub fn validate(&self) -> Result<(), TopologyError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Invalid(problems))
        }
    }

    /// 関数の実行ロールに必要なポリシー
    fn required_policies(&self, function: &FunctionDecl) -> Vec<ManagedPolicy> {
        let mut policies = vec![ManagedPolicy::LambdaBasicExecution];
        if function.kind == FunctionKind::WebhookReceiver {
            policies.push(ManagedPolicy::EventBridgeFullAccess);
            let source = function
                .environment
                .get(env::STRIPE_SECRET_SOURCE)
                .and_then(|s| s.parse::<SecretSource>().ok())
                .unwrap_or(SecretSource::SecretsManager);
            policies.extend(source.required_policy());
        }
        policies
    }

    /// 合成結果（JSONドキュメント）
    pub fn synthesize(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event_pattern::STRIPE_EVENT_DETAIL_KEY;
    use crate::domain::AuthorizationError;

    fn all_topologies() -> Vec<Topology> {
        TopologyVariant::ALL.into_iter().map(Topology::for_variant).collect()
    }

    // ==================== バリアント ====================

    #[test]
    fn test_variant_from_str() {
        assert_eq!("primary".parse::<TopologyVariant>(), Ok(TopologyVariant::Primary));
        assert_eq!("hg".parse::<TopologyVariant>(), Ok(TopologyVariant::Hg));
        assert_eq!("customers".parse::<TopologyVariant>(), Ok(TopologyVariant::Customers));
        assert!("staging".parse::<TopologyVariant>().is_err());
    }

    #[test]
    fn test_all_variants_are_valid() {
        for topology in all_topologies() {
            assert_eq!(topology.validate(), Ok(()), "variant {}", topology.variant);
        }
    }

    #[test]
    fn test_primary_variant_declaration() {
        let t = Topology::for_variant(TopologyVariant::Primary);

        assert_eq!(t.region.as_deref(), Some("eu-west-1"));
        assert_eq!(t.table.partition_key.name, "customerID");
        assert_eq!(t.table.partition_key.attribute_type, "S");
        assert_eq!(t.event_bus.name, "stripeAppEventBus");
        assert_eq!(t.roles.len(), 1);
        assert!(t.roles[0].managed_policies.contains(&ManagedPolicy::SecretsManagerReadWrite));
        assert_eq!(t.table_environment(), Some(("CUSTOMER_TABLE_NAME", "StripeSampleCustomers")));
    }

    #[test]
    fn test_hg_variant_uses_hg_table_name_and_separate_roles() {
        let t = Topology::for_variant(TopologyVariant::Hg);

        assert_eq!(t.table_environment(), Some(("HG_TABLE_NAME", "HgStripeCustomers")));
        assert_eq!(t.roles.len(), 2);
        let receiver = t.function_of_kind(FunctionKind::WebhookReceiver).unwrap();
        let handler = t.function_of_kind(FunctionKind::CustomerCreation).unwrap();
        assert_ne!(receiver.role, handler.role);
    }

    #[test]
    fn test_customers_variant_declaration() {
        let t = Topology::for_variant(TopologyVariant::Customers);

        assert_eq!(t.table.table_name, "StripeCustomers");
        assert_eq!(t.rules[0].event_pattern.sources(), vec!["stripeHandler.lambda"]);
        assert_eq!(
            t.rules[0].event_pattern.detail_values(STRIPE_EVENT_DETAIL_KEY),
            vec!["customer.created"]
        );
        assert!(t.functions.iter().all(|f| f.runtime == Runtime::ProvidedAl2023));
    }

    #[test]
    fn test_secret_access_only_in_one_variant() {
        let with_secrets: Vec<TopologyVariant> = all_topologies()
            .into_iter()
            .filter(|t| {
                t.roles
                    .iter()
                    .any(|r| {
                        r.managed_policies
                            .iter()
                            .any(|p| SecretSource::grants_secret_access(*p))
                    })
            })
            .map(|t| t.variant)
            .collect();
        assert_eq!(with_secrets, vec![TopologyVariant::Primary]);
    }

    #[test]
    fn test_env_secret_variants_declare_variable_name() {
        for variant in [TopologyVariant::Hg, TopologyVariant::Customers] {
            let t = Topology::for_variant(variant);
            let receiver = t.function_of_kind(FunctionKind::WebhookReceiver).unwrap();

            assert_eq!(receiver.environment[env::STRIPE_SECRET_SOURCE], "env");
            assert_eq!(receiver.environment[env::STRIPE_SECRET_NAME], "STRIPE_WEBHOOK_SECRET");
            assert_eq!(t.validate(), Ok(()), "variant {}", variant);
        }
    }

    #[test]
    fn test_every_function_times_out_at_eight_seconds() {
        for t in all_topologies() {
            for f in &t.functions {
                assert_eq!(f.timeout_seconds, 8);
            }
        }
    }

    #[test]
    fn test_handler_has_single_table_variable() {
        for t in all_topologies() {
            let handler = t.function_of_kind(FunctionKind::CustomerCreation).unwrap();
            assert_eq!(handler.environment.len(), 1);
        }
    }

    #[test]
    fn test_rest_api_is_catch_all() {
        let t = Topology::for_variant(TopologyVariant::Primary);
        assert_eq!(t.rest_api.routes, vec!["ANY /", "ANY /{proxy+}"]);
        assert_eq!(t.rest_api.handler, logical_ids::RECEIVER);
    }

    // ==================== 契約 ====================

    #[test]
    fn test_rule_filter_equals_receiver_emission_for_every_variant() {
        for t in all_topologies() {
            let receiver = t.function_of_kind(FunctionKind::WebhookReceiver).unwrap();
            let emitted_type = &receiver.environment[env::STRIPE_EVENT_TYPE];
            let emitted_source = &receiver.environment[env::EVENT_SOURCE];

            for rule in &t.rules {
                assert_eq!(
                    rule.event_pattern.detail_values(STRIPE_EVENT_DETAIL_KEY),
                    vec![emitted_type.as_str()],
                    "variant {}",
                    t.variant
                );
                assert_eq!(rule.event_pattern.sources(), vec![emitted_source.as_str()]);
            }
            assert!(t.check_event_contract().is_empty());
        }
    }

    #[test]
    fn test_primary_rule_matches_only_its_emission() {
        let t = Topology::for_variant(TopologyVariant::Primary);
        let pattern = &t.rules[0].event_pattern;

        let matching = DomainEvent::new(
            EventSource::StripeWebhookHandler,
            StripeEventType::CustomerSubscriptionCreated,
            "cus_1",
        );
        assert!(pattern.matches(&matching));
        assert_eq!(t.rules[0].targets, vec![logical_ids::HANDLER.to_string()]);

        for source in EventSource::ALL {
            for event_type in StripeEventType::ALL {
                let event = DomainEvent::new(source, event_type, "cus_1");
                let expected = source == EventSource::StripeWebhookHandler
                    && event_type == StripeEventType::CustomerSubscriptionCreated;
                assert_eq!(pattern.matches(&event), expected, "{} / {}", source, event_type);
            }
        }
    }

    #[test]
    fn test_drifted_rule_is_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Primary);
        t.rules[0].event_pattern =
            EventPattern::for_stripe(EventSource::StripeHandler, &[StripeEventType::CustomerCreated]);

        assert_eq!(
            t.check_event_contract(),
            vec![TopologyProblem::ContractMismatch {
                rule: logical_ids::RULE.to_string(),
                source_name: "stripeWebHookHandler.lambda".to_string(),
                event_type: "customer.subscription.created".to_string(),
            }]
        );
        assert!(t.validate().is_err());
    }

    // ==================== 権限 ====================

    #[test]
    fn test_every_edge_has_grant() {
        for t in all_topologies() {
            let graph = t.permission_graph();
            for edge in t.invocation_edges() {
                assert_eq!(graph.authorize(&edge), Ok(()), "{}", edge);
            }
        }
    }

    #[test]
    fn test_invocation_edges() {
        let t = Topology::for_variant(TopologyVariant::Primary);
        let edges = t.invocation_edges();

        assert_eq!(edges.len(), 3);
        assert!(edges.contains(&InvocationEdge::new(
            InvocationSource::Rule(logical_ids::RULE.to_string()),
            logical_ids::HANDLER,
            ServicePrincipal::Events,
        )));
        assert!(edges.contains(&InvocationEdge::new(
            InvocationSource::Function(logical_ids::RECEIVER.to_string()),
            logical_ids::HANDLER,
            ServicePrincipal::Lambda,
        )));
    }

    #[test]
    fn test_removed_grant_is_denied_and_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Customers);
        t.permissions.retain(|p| p.logical_id != logical_ids::RULE_PERMISSION);

        let rule_edge = InvocationEdge::new(
            InvocationSource::Rule(logical_ids::RULE.to_string()),
            logical_ids::HANDLER,
            ServicePrincipal::Events,
        );
        assert!(matches!(
            t.permission_graph().authorize(&rule_edge),
            Err(AuthorizationError::Denied { .. })
        ));
        assert_eq!(t.problems(), vec![TopologyProblem::MissingGrant(rule_edge)]);
    }

    // ==================== その他の検証 ====================

    #[test]
    fn test_missing_policy_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Primary);
        t.roles[0].managed_policies.remove(&ManagedPolicy::SecretsManagerReadWrite);

        assert_eq!(
            t.problems(),
            vec![TopologyProblem::MissingPolicy {
                function: logical_ids::RECEIVER.to_string(),
                role: logical_ids::SHARED_ROLE.to_string(),
                policy: ManagedPolicy::SecretsManagerReadWrite,
            }]
        );
    }

    #[test]
    fn test_unknown_rule_target_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Hg);
        t.rules[0].targets.push("ghostFunction".to_string());

        let problems = t.problems();
        assert!(problems.contains(&TopologyProblem::UnknownFunction {
            context: format!("rule {}", logical_ids::RULE),
            function: "ghostFunction".to_string(),
        }));
        // 新しい経路に許可がないことも報告される
        assert!(problems
            .iter()
            .any(|p| matches!(p, TopologyProblem::MissingGrant(e) if e.target == "ghostFunction")));
    }

    #[test]
    fn test_invalid_timeout_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Primary);
        t.functions[0].timeout_seconds = 30;
        assert!(t.problems().contains(&TopologyProblem::InvalidTimeout {
            function: logical_ids::HANDLER.to_string(),
            seconds: 30,
        }));
    }

    #[test]
    fn test_missing_table_grant_and_env_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Primary);
        t.table_grants.clear();
        t.functions[0].environment.clear();

        let problems = t.problems();
        assert!(problems.contains(&TopologyProblem::MissingTableEnvironment {
            function: logical_ids::HANDLER.to_string(),
        }));
        assert!(problems.contains(&TopologyProblem::MissingTableGrant {
            function: logical_ids::HANDLER.to_string(),
            table: logical_ids::TABLE.to_string(),
        }));
    }

    #[test]
    fn test_duplicate_logical_id_reported() {
        let mut t = Topology::for_variant(TopologyVariant::Primary);
        t.permissions[0].logical_id = logical_ids::RULE.to_string();
        assert!(t
            .problems()
            .contains(&TopologyProblem::DuplicateLogicalId(logical_ids::RULE.to_string())));
    }

    #[test]
    fn test_topology_error_display() {
        let err = TopologyError::Invalid(vec![TopologyProblem::DuplicateLogicalId("X".to_string())]);
        assert_eq!(err.to_string(), "topology has 1 problem(s): duplicate logical id: X");
    }

    // ==================== 合成 ====================

    #[test]
    fn test_synthesize_contains_wire_strings() {
        let doc = Topology::for_variant(TopologyVariant::Primary).synthesize();

        assert_eq!(doc["variant"], "primary");
        assert_eq!(doc["table"]["partitionKey"]["name"], "customerID");
        assert_eq!(
            doc["rules"][0]["eventPattern"]["source"][0],
            "stripeWebHookHandler.lambda"
        );
        assert_eq!(doc["permissions"][0]["principal"], "events.amazonaws.com");
        assert_eq!(doc["permissions"][0]["source"]["type"], "Rule");
        assert_eq!(doc["functions"][0]["timeoutSeconds"], 8);
        assert_eq!(
            doc["roles"][0]["managedPolicies"][0],
            "service-role/AWSLambdaBasicExecutionRole"
        );
    }
}
