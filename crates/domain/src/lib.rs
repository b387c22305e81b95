//! # Notiflow ドメイン層
//!
//! 通知配信パイプラインの中核となるドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: NotificationSubscription, EmailTask）
//! - **値オブジェクト**: 識別子を持たない不変オブジェクト（例: Email, Frequency）
//! - **ドメインエラー**: ビジネスルール違反を表現するエラー型
//!
//! ## 依存関係の方向
//!
//! ```text
//! notification-service → infra → domain
//! ```
//!
//! ドメイン層はインフラ層（DB、SMTP、HTTP API）には一切依存しない。
//!
//! ## モジュール構成
//!
//! - [`clock`] - 時刻プロバイダ
//! - [`email`] - 送信可能なメールメッセージと配信結果
//! - [`email_task`] - 非同期送信の記録
//! - [`error`] - ドメイン層で発生するエラーの定義
//! - [`notification`] - 通知種別・購読・通知キュー
//! - [`user`] - 通知の受信者

#[macro_use]
mod macros;

pub mod clock;
pub mod email;
pub mod email_task;
pub mod error;
pub mod notification;
pub mod user;

pub use error::DomainError;
