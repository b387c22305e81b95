//! # 通知送信
//!
//! メール通知の送信を担当するインフラストラクチャモジュール。
//!
//! ## 設計方針
//!
//! - **trait による抽象化**: `NotificationSender` trait でメール送信を抽象化
//! - **3 つの実装**: SMTP（lettre）、SendGrid 互換 HTTP API（reqwest）、Noop（ログのみ）
//! - **起動時に 1 回だけ選択**: `NOTIFICATION_BACKEND` で選んだ実装を trait object として注入し、
//!   送信のたびに設定を読み直さない
//!
//! ## エラーの非対称性
//!
//! 設定不備の扱いはバックエンドごとに異なり、呼び出し側はこれに依存して分岐する:
//!
//! | バックエンド | 設定不備 | 送信前チェック不合格 | 送信失敗 |
//! |---|---|---|---|
//! | SMTP | `Err(NotConfigured)` | - | `Err(SendFailed)` |
//! | SendGrid | `Ok(Rejected(..))` | `Ok(Rejected(..))` | `Err(Api { .. })` |

mod noop;
mod sendgrid;
mod smtp;

use async_trait::async_trait;
pub use noop::NoopNotificationSender;
use notiflow_domain::{
    email::{DeliveryOutcome, EmailMessage},
    notification::NotificationError,
};
pub use sendgrid::{
    MAX_CATEGORIES,
    MAX_CATEGORY_LENGTH,
    SendGridNotificationSender,
    SendGridSettings,
    normalize_recipients,
    sanitize_categories,
};
pub use smtp::{SmtpEndpoint, SmtpNotificationSender, SmtpSettings};

/// メール送信トレイト
///
/// 通知基盤の中核。メール送信の具体的な方法を抽象化する。
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// メールを送信する
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryOutcome, NotificationError>;
}

/// 送信バックエンドの種別
///
/// 環境変数 `NOTIFICATION_BACKEND` の値（snake_case）に対応する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationBackend {
    /// SMTP サーバー経由（開発時はメールキャプチャツール）
    Smtp,
    /// SendGrid 互換のトランザクションメール API
    #[strum(serialize = "sendgrid")]
    SendGrid,
    /// 送信しない（ログ出力のみ）
    #[default]
    Noop,
}
