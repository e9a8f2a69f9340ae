//! SQLite顧客ストア
//!
//! 顧客テーブルをローカルで再現する。テーブル名ごとに行を分け、
//! `(table_name, customer_id)`を主キーとして後勝ちで置き換える。
//! - 書き込み: 専用の単一接続（Arc<Mutex<Connection>>）
//! - 読み取り: deadpool-sqliteによるasync接続プール

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use stripe_events::domain::CustomerRecord;
use stripe_events::infrastructure::{CustomerRepository, RepositoryError};
use thiserror::Error;

/// ストアエラー
#[derive(Debug, Error)]
pub enum StoreError {
    /// データベースエラー
    #[error("データベースエラー: {0}")]
    Database(String),

    /// プール取得エラー
    #[error("プールエラー: {0}")]
    Pool(String),

    /// 接続構築エラー
    #[error("接続構築エラー: {0}")]
    Build(String),

    /// 属性JSONの変換エラー
    #[error("属性JSONエラー: {0}")]
    Attributes(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<deadpool_sqlite::BuildError> for StoreError {
    fn from(err: deadpool_sqlite::BuildError) -> Self {
        StoreError::Build(err.to_string())
    }
}

impl From<deadpool_sqlite::PoolError> for StoreError {
    fn from(err: deadpool_sqlite::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

impl From<deadpool_sqlite::InteractError> for StoreError {
    fn from(err: deadpool_sqlite::InteractError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Attributes(err.to_string())
    }
}

/// SQLiteデータベースのスキーマを定義するSQL
const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;

CREATE TABLE IF NOT EXISTS customers (
    table_name TEXT NOT NULL,       -- 顧客テーブル名（バリアントごと）
    customer_id TEXT NOT NULL,      -- パーティションキー customerID
    attributes_json TEXT NOT NULL,  -- customerID以外の属性
    updated_at INTEGER NOT NULL,    -- 最終書き込み（UNIXタイムスタンプ）
    PRIMARY KEY (table_name, customer_id)
);
"#;

/// SQLite顧客ストア
pub struct SqliteCustomerStore {
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Pool,
    table_name: String,
}

impl SqliteCustomerStore {
    /// データベースファイルを開き、スキーマを初期化する
    ///
    /// # Arguments
    /// * `db_path` - データベースファイルのパス
    /// * `table_name` - 書き込み先の顧客テーブル名
    pub async fn new(db_path: &str, table_name: impl Into<String>) -> Result<Self, StoreError> {
        let write_conn = Connection::open(db_path)?;
        write_conn.execute_batch(SCHEMA_SQL)?;

        let read_pool = Config::new(db_path)
            .builder(Runtime::Tokio1)
            .map_err(|e| StoreError::Build(e.to_string()))?
            .max_size(4)
            .build()?;

        Ok(Self {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            table_name: table_name.into(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// レコードを書き込む（同じキーの行は丸ごと置き換え）
    pub async fn save_customer(&self, record: &CustomerRecord) -> Result<(), StoreError> {
        let attributes_json = serde_json::to_string(&record.attributes)?;
        let customer_id = record.customer_id.clone();
        let table_name = self.table_name.clone();
        let conn = Arc::clone(&self.write_conn);

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::Database(format!("書き込み接続のロック失敗: {}", e)))?;
            conn.execute(
                "INSERT OR REPLACE INTO customers (table_name, customer_id, attributes_json, updated_at)
                 VALUES (?1, ?2, ?3, strftime('%s', 'now'))",
                params![table_name, customer_id, attributes_json],
            )?;
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
    }

    /// 顧客IDでレコードを取得
    pub async fn find_customer(&self, customer_id: &str) -> Result<Option<CustomerRecord>, StoreError> {
        let customer_id = customer_id.to_string();
        let table_name = self.table_name.clone();
        let conn = self.read_pool.get().await?;

        let row = conn
            .interact(move |conn| {
                conn.query_row(
                    "SELECT customer_id, attributes_json FROM customers
                     WHERE table_name = ?1 AND customer_id = ?2",
                    params![table_name, customer_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
            })
            .await??;

        row.map(|(id, json)| to_record(id, &json)).transpose()
    }

    /// テーブル内の全レコードを顧客ID順に取得
    pub async fn list_customers(&self) -> Result<Vec<CustomerRecord>, StoreError> {
        let table_name = self.table_name.clone();
        let conn = self.read_pool.get().await?;

        let rows = conn
            .interact(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT customer_id, attributes_json FROM customers
                     WHERE table_name = ?1 ORDER BY customer_id",
                )?;
                let rows = stmt
                    .query_map(params![table_name], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok::<_, rusqlite::Error>(rows)
            })
            .await??;

        rows.into_iter()
            .map(|(id, json)| to_record(id, &json))
            .collect()
    }
}

fn to_record(customer_id: String, attributes_json: &str) -> Result<CustomerRecord, StoreError> {
    let attributes: Map<String, Value> = serde_json::from_str(attributes_json)?;
    Ok(CustomerRecord {
        customer_id,
        attributes,
    })
}

#[async_trait]
impl CustomerRepository for SqliteCustomerStore {
    async fn put(&self, record: &CustomerRecord) -> Result<(), RepositoryError> {
        self.save_customer(record)
            .await
            .map_err(|e| RepositoryError::WriteError(e.to_string()))
    }

    async fn get(&self, customer_id: &str) -> Result<Option<CustomerRecord>, RepositoryError> {
        self.find_customer(customer_id)
            .await
            .map_err(|e| RepositoryError::ReadError(e.to_string()))
    }
}
