/// プロセス内イベントバス
///
/// EventBridgeのルール評価と配送をローカルで再現する。ローカルゲートウェイと
/// パイプライン全体のテストで使う。
///
/// - 有効なルールのうちパターンに一致したものごとに、ターゲットを1回だけ非同期に呼び出す
/// - どのルールにも一致しないイベントは破棄し、発行側にはエラーを返さない
/// - 呼び出し前にルール → ターゲットの経路を権限グラフで認可する
/// - 呼び出しは関数タイムアウトで打ち切り、再試行しない
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::application::CreateCustomerHandler;
use crate::domain::topology::{FunctionKind, FUNCTION_TIMEOUT_SECONDS};
use crate::domain::{
    AuthorizationError, DomainEvent, EventPattern, InvocationEdge, InvocationSource,
    PermissionGraph, ServicePrincipal, Topology,
};
use crate::infrastructure::{CustomerRepository, EventPublisher, PublishError};

/// 保持する配送記録の上限（超えた分は古いものから捨てる）
pub const MAX_OUTCOMES: usize = 1024;

/// ターゲット呼び出しのエラー
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct InvocationError(pub String);

/// ルールのターゲット
#[async_trait]
pub trait EventTarget: Send + Sync {
    async fn invoke(&self, event: DomainEvent) -> Result<(), InvocationError>;
}

#[async_trait]
impl<R> EventTarget for CreateCustomerHandler<R>
where
    R: CustomerRepository,
{
    async fn invoke(&self, event: DomainEvent) -> Result<(), InvocationError> {
        self.handle(&event)
            .await
            .map(|_| ())
            .map_err(|e| InvocationError(e.to_string()))
    }
}

/// イベントルール
#[derive(Clone)]
pub struct EventRule {
    pub name: String,
    /// ルールの論理ID（認可に使う）
    pub logical_id: String,
    pub pattern: EventPattern,
    /// ターゲット関数の論理ID（認可に使う）
    pub target_function: String,
    pub target: Arc<dyn EventTarget>,
    pub enabled: bool,
}

impl EventRule {
    pub fn new(
        name: impl Into<String>,
        pattern: EventPattern,
        target_function: impl Into<String>,
        target: Arc<dyn EventTarget>,
    ) -> Self {
        let name = name.into();
        Self {
            logical_id: name.clone(),
            name,
            pattern,
            target_function: target_function.into(),
            target,
            enabled: true,
        }
    }

    /// 表示名と異なる論理IDを設定
    pub fn with_logical_id(mut self, logical_id: impl Into<String>) -> Self {
        self.logical_id = logical_id.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn edge(&self) -> InvocationEdge {
        InvocationEdge::new(
            InvocationSource::Rule(self.logical_id.clone()),
            self.target_function.clone(),
            ServicePrincipal::Events,
        )
    }
}

impl std::fmt::Debug for EventRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRule")
            .field("name", &self.name)
            .field("logical_id", &self.logical_id)
            .field("pattern", &self.pattern)
            .field("target_function", &self.target_function)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// 配送結果
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(String),
    AuthorizationDenied(AuthorizationError),
    TimedOut,
}

/// 配送記録
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryRecord {
    pub rule: String,
    pub target_function: String,
    pub customer_id: String,
    pub outcome: DeliveryOutcome,
}

/// プロセス内イベントルーター
pub struct EventRouter {
    rules: Vec<EventRule>,
    permissions: PermissionGraph,
    timeout: Duration,
    pending: Mutex<JoinSet<()>>,
    outcomes: Arc<Mutex<VecDeque<DeliveryRecord>>>,
}

impl EventRouter {
    pub fn new(permissions: PermissionGraph) -> Self {
        Self {
            rules: Vec::new(),
            permissions,
            timeout: Duration::from_secs(FUNCTION_TIMEOUT_SECONDS),
            pending: Mutex::new(JoinSet::new()),
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// トポロジーのルールと許可から構築
    ///
    /// 顧客作成ハンドラーを対象とするルールのターゲットを`handler`に結び付ける。
    pub fn from_topology(topology: &Topology, handler: Arc<dyn EventTarget>) -> Self {
        let mut router = Self::new(topology.permission_graph());

        let Some(function) = topology.function_of_kind(FunctionKind::CustomerCreation) else {
            return router;
        };
        router.timeout = Duration::from_secs(function.timeout_seconds);

        for rule in &topology.rules {
            if !rule.targets.contains(&function.logical_id) {
                continue;
            }
            let mut event_rule = EventRule::new(
                rule.rule_name.clone(),
                rule.event_pattern.clone(),
                function.logical_id.clone(),
                handler.clone(),
            )
            .with_logical_id(rule.logical_id.clone());
            event_rule.enabled = rule.enabled;
            router.rules.push(event_rule);
        }
        router
    }

    pub fn with_rule(mut self, rule: EventRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rules(&self) -> &[EventRule] {
        &self.rules
    }

    /// イベントをルールに照合して配送を開始する
    ///
    /// 一致したルールの数を返す。配送完了は待たない。
    pub fn route(&self, event: &DomainEvent) -> usize {
        let mut matched = 0;

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !rule.pattern.matches(event) {
                continue;
            }
            matched += 1;

            if let Err(err) = self.permissions.authorize(&rule.edge()) {
                warn!(rule = %rule.name, error = %err, "ターゲット呼び出しが認可されない");
                self.record(DeliveryRecord {
                    rule: rule.name.clone(),
                    target_function: rule.target_function.clone(),
                    customer_id: event.customer_id().to_string(),
                    outcome: DeliveryOutcome::AuthorizationDenied(err),
                });
                continue;
            }

            if let Ok(mut pending) = self.pending.lock() {
                reap_finished(&mut pending);
                pending.spawn(deliver(
                    rule.clone(),
                    event.clone(),
                    self.timeout,
                    Arc::clone(&self.outcomes),
                ));
            }
        }

        if matched == 0 {
            debug!(
                source = %event.source,
                stripe_event = ?event.stripe_events(),
                "一致するルールがないためイベントを破棄"
            );
        }
        matched
    }

    /// 実行中の配送がすべて終わるまで待つ
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = match self.pending.lock() {
                Ok(mut pending) => std::mem::take(&mut *pending),
                Err(_) => return,
            };
            if tasks.is_empty() {
                return;
            }
            while let Some(result) = tasks.join_next().await {
                log_join_result(result);
            }
        }
    }

    /// 実行中の配送数（終了済みのタスクは回収してから数える）
    pub fn in_flight(&self) -> usize {
        match self.pending.lock() {
            Ok(mut pending) => {
                reap_finished(&mut pending);
                pending.len()
            }
            Err(_) => 0,
        }
    }

    /// 保持している配送結果（古い順、最大`MAX_OUTCOMES`件）
    pub fn outcomes(&self) -> Vec<DeliveryRecord> {
        self.outcomes
            .lock()
            .map(|outcomes| outcomes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 保持している配送結果を取り出して空にする
    pub fn take_outcomes(&self) -> Vec<DeliveryRecord> {
        self.outcomes
            .lock()
            .map(|mut outcomes| outcomes.drain(..).collect())
            .unwrap_or_default()
    }

    fn record(&self, record: DeliveryRecord) {
        push_outcome(&self.outcomes, record);
    }
}

#[async_trait]
impl EventPublisher for EventRouter {
    async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        self.route(event);
        Ok(())
    }
}

async fn deliver(
    rule: EventRule,
    event: DomainEvent,
    timeout: Duration,
    outcomes: Arc<Mutex<VecDeque<DeliveryRecord>>>,
) {
    let customer_id = event.customer_id().to_string();

    let outcome = match tokio::time::timeout(timeout, rule.target.invoke(event)).await {
        Ok(Ok(())) => {
            info!(rule = %rule.name, customer_id = %customer_id, "ターゲット呼び出し完了");
            DeliveryOutcome::Delivered
        }
        Ok(Err(err)) => {
            error!(rule = %rule.name, customer_id = %customer_id, error = %err, "ターゲット呼び出し失敗");
            DeliveryOutcome::Failed(err.to_string())
        }
        Err(_) => {
            error!(
                rule = %rule.name,
                customer_id = %customer_id,
                timeout_ms = timeout.as_millis() as u64,
                "ターゲット呼び出しタイムアウト"
            );
            DeliveryOutcome::TimedOut
        }
    };

    push_outcome(
        &outcomes,
        DeliveryRecord {
            rule: rule.name,
            target_function: rule.target_function,
            customer_id,
            outcome,
        },
    );
}

fn push_outcome(outcomes: &Mutex<VecDeque<DeliveryRecord>>, record: DeliveryRecord) {
    if let Ok(mut outcomes) = outcomes.lock() {
        if outcomes.len() >= MAX_OUTCOMES {
            outcomes.pop_front();
        }
        outcomes.push_back(record);
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        log_join_result(result);
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(err) = result {
        error!(error = %err, "配送タスクが異常終了");
    }
}
