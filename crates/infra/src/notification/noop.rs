//! Noop 通知送信実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。
//! 通知を無効化した環境で使用する。

use async_trait::async_trait;
use notiflow_domain::{
    email::{DeliveryOutcome, EmailMessage},
    notification::NotificationError,
};

use super::NotificationSender;

/// Noop 通知送信（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct NoopNotificationSender;

#[async_trait]
impl NotificationSender for NoopNotificationSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryOutcome, NotificationError> {
        tracing::info!(
            to = ?email.to,
            subject = %email.subject,
            notification_type = %email.notification_type,
            "Noop: メール送信をスキップ"
        );
        Ok(DeliveryOutcome::Sent)
    }
}
