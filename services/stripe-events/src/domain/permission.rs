/// 関数呼び出し権限グラフ
///
/// 静的な認可グラフ。呼び出し経路（呼び出し元 → 対象関数）ごとに
/// 明示的な許可が必要で、許可のない経路は認可拒否になる。
use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 関数呼び出しのアクション名
pub const INVOKE_FUNCTION_ACTION: &str = "lambda:InvokeFunction";

/// サービスプリンシパル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ServicePrincipal {
    #[serde(rename = "lambda.amazonaws.com")]
    Lambda,
    #[serde(rename = "events.amazonaws.com")]
    Events,
    #[serde(rename = "apigateway.amazonaws.com")]
    ApiGateway,
}

impl ServicePrincipal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServicePrincipal::Lambda => "lambda.amazonaws.com",
            ServicePrincipal::Events => "events.amazonaws.com",
            ServicePrincipal::ApiGateway => "apigateway.amazonaws.com",
        }
    }
}

impl fmt::Display for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 呼び出し元リソース（論理ID）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", content = "logicalId")]
pub enum InvocationSource {
    Function(String),
    Rule(String),
    RestApi(String),
}

impl fmt::Display for InvocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationSource::Function(id) => write!(f, "function/{}", id),
            InvocationSource::Rule(id) => write!(f, "rule/{}", id),
            InvocationSource::RestApi(id) => write!(f, "restapi/{}", id),
        }
    }
}

/// 呼び出し経路
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEdge {
    pub caller: InvocationSource,
    pub target: String,
    pub principal: ServicePrincipal,
}

impl InvocationEdge {
    pub fn new(caller: InvocationSource, target: impl Into<String>, principal: ServicePrincipal) -> Self {
        Self {
            caller,
            target: target.into(),
            principal,
        }
    }
}

impl fmt::Display for InvocationEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> function/{}", self.caller, self.principal, self.target)
    }
}

/// 認可エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("{principal} (source: {caller}) is not authorized to perform: lambda:InvokeFunction on resource: {target}")]
    Denied {
        principal: ServicePrincipal,
        caller: InvocationSource,
        target: String,
    },
}

/// 権限グラフ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionGraph {
    grants: BTreeSet<InvocationEdge>,
}

impl PermissionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 許可を追加
    pub fn grant(&mut self, edge: InvocationEdge) {
        self.grants.insert(edge);
    }

    /// 許可を取り消す
    pub fn revoke(&mut self, edge: &InvocationEdge) -> bool {
        self.grants.remove(edge)
    }

    /// 経路を認可する
    pub fn authorize(&self, edge: &InvocationEdge) -> Result<(), AuthorizationError> {
        if self.grants.contains(edge) {
            Ok(())
        } else {
            Err(AuthorizationError::Denied {
                principal: edge.principal,
                caller: edge.caller.clone(),
                target: edge.target.clone(),
            })
        }
    }

    /// 許可のない経路を列挙
    pub fn missing_grants<'a>(&self, edges: impl IntoIterator<Item = &'a InvocationEdge>) -> Vec<InvocationEdge> {
        edges
            .into_iter()
            .filter(|edge| !self.grants.contains(*edge))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl FromIterator<InvocationEdge> for PermissionGraph {
    fn from_iter<I: IntoIterator<Item = InvocationEdge>>(iter: I) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}
