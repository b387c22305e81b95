//! # PostgreSQL データベース接続管理
//!
//! 通知種別・購読・ダイジェスト通知・送信タスクを保存する
//! PostgreSQL への接続プールを作成する。
//!
//! クエリはすべて実行時検証の `sqlx::query_as` / `sqlx::query` を使用し、
//! ビルド時にデータベース接続を必要としない。

use std::time::Duration;

use sqlx::{PgPool, postgres::PgPoolOptions};

/// データベースマイグレーションを実行する
///
/// 適用済みのマイグレーションはスキップされる。
/// sqlx が advisory lock を使用するため、複数プロセスから同時に呼び出しても安全。
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await
}

/// PostgreSQL 接続プールを作成する
///
/// # 設定値
///
/// - `max_connections(10)`: 最大接続数
/// - `acquire_timeout(5秒)`: 接続取得のタイムアウト
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}
