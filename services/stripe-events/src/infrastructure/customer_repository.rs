/// 顧客テーブルへの永続化
///
/// パーティションキー`customerID`の単一テーブル。書き込みは無条件の
/// PutItemなので、同じキーへの再書き込みは後勝ちになる。
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::{CustomerRecord, CUSTOMER_ID_ATTRIBUTE};

/// リポジトリ操作のエラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Write error: {0}")]
    WriteError(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// 顧客レコードの永続化トレイト
#[async_trait]
pub trait CustomerRepository: Send + Sync {
    /// レコードを書き込む（既存レコードは置き換え）
    async fn put(&self, record: &CustomerRecord) -> Result<(), RepositoryError>;

    /// 顧客IDでレコードを取得
    async fn get(&self, customer_id: &str) -> Result<Option<CustomerRecord>, RepositoryError>;
}

#[async_trait]
impl<T> CustomerRepository for Arc<T>
where
    T: CustomerRepository + ?Sized,
{
    async fn put(&self, record: &CustomerRecord) -> Result<(), RepositoryError> {
        (**self).put(record).await
    }

    async fn get(&self, customer_id: &str) -> Result<Option<CustomerRecord>, RepositoryError> {
        (**self).get(customer_id).await
    }
}

/// CustomerRepositoryのDynamoDB実装
#[derive(Debug, Clone)]
pub struct DynamoCustomerRepository {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoCustomerRepository {
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// レコードをDynamoDBアイテムに変換
    fn to_attribute_map(
        record: &CustomerRecord,
    ) -> Result<HashMap<String, AttributeValue>, RepositoryError> {
        serde_dynamo::to_item(Value::Object(record.to_item()))
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))
    }

    /// DynamoDBアイテムからレコードを復元
    fn from_attribute_map(
        item: HashMap<String, AttributeValue>,
    ) -> Result<CustomerRecord, RepositoryError> {
        let map: Map<String, Value> = serde_dynamo::from_item(item)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
        CustomerRecord::from_item(map).ok_or_else(|| {
            RepositoryError::SerializationError(format!("item has no {}", CUSTOMER_ID_ATTRIBUTE))
        })
    }
}

#[async_trait]
impl CustomerRepository for DynamoCustomerRepository {
    async fn put(&self, record: &CustomerRecord) -> Result<(), RepositoryError> {
        let item = Self::to_attribute_map(record)?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::WriteError(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, customer_id: &str) -> Result<Option<CustomerRecord>, RepositoryError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(CUSTOMER_ID_ATTRIBUTE, AttributeValue::S(customer_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| RepositoryError::ReadError(e.to_string()))?;

        output
            .item()
            .cloned()
            .map(Self::from_attribute_map)
            .transpose()
    }
}
