//! # Notiflow インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 設計方針
//!
//! このクレートはユースケース層が利用するインターフェース（リポジトリトレイト、
//! 送信トレイト）の具体的な実装を提供する。外部システムの詳細をカプセル化し、
//! ドメイン層をインフラの変更から保護する。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とマイグレーション
//! - **リポジトリ実装**: 通知種別・購読・ダイジェスト通知・送信タスクの永続化
//! - **メール送信**: SMTP / SendGrid 互換 API / Noop の 3 実装
//! - **メールキャプチャ**: 開発用メールキャプチャツールの API クライアント
//!
//! ## 依存関係
//!
//! ```text
//! notification-service → infra → domain
//!                          ↘
//!                           shared
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`mail_capture`] - メールキャプチャツールのクライアント
//! - [`notification`] - メール送信の抽象と実装
//! - [`repository`] - リポジトリ実装
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use notiflow_infra::{db, repository::PostgresNotificationTypeRepository};
//!
//! async fn setup() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = db::create_pool("postgres://localhost/notiflow").await?;
//!     db::run_migrations(&pool).await?;
//!     let types = PostgresNotificationTypeRepository::new(pool);
//!     Ok(())
//! }
//! ```

pub mod db;
pub mod error;
pub mod mail_capture;
#[cfg(feature = "test-utils")]
pub mod mock;
pub mod notification;
pub mod repository;

pub use error::InfraError;
pub use notification::NotificationSender;
