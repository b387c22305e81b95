//! # リポジトリ実装
//!
//! 通知パイプラインが扱う 4 種のレコードの永続化を提供する。
//!
//! ## 設計方針
//!
//! - **依存性逆転**: トレイトをユースケース層が利用し、PostgreSQL 実装を差し替え可能にする
//! - **実行時検証クエリ**: `sqlx::query_as` を使用し、ビルド時に DB 接続を要求しない
//! - **テスタビリティ**: トレイト経由でモック可能（[`crate::mock`]）

pub mod email_task_repository;
pub mod notification_repository;
pub mod notification_subscription_repository;
pub mod notification_type_repository;

pub use email_task_repository::{EmailTaskRepository, PostgresEmailTaskRepository};
pub use notification_repository::{NotificationRepository, PostgresNotificationRepository};
pub use notification_subscription_repository::{
    NotificationSubscriptionRepository,
    PostgresNotificationSubscriptionRepository,
};
pub use notification_type_repository::{
    NotificationTypeRepository,
    PostgresNotificationTypeRepository,
};
