//! # ビジネスイベントログ
//!
//! 通知の発行から送信結果までを、JSON ログから `jq` で追跡できるようにするための
//! マクロとフィールド定数。
//!
//! 1 通の通知は `notification.emitted` から始まり、即時送信なら
//! `notification.sent` / `notification.rejected` / `notification.failed` のいずれか、
//! ダイジェストなら `notification.queued` で終わる。
//!
//! ```bash
//! jq 'select(.["event.kind"] == "business_event" and .["event.action"] == "notification.failed")'
//! ```
//!
//! 送信や描画の失敗ログには [`error`] の定数で `error.category` / `error.kind` を付ける。

/// ビジネスイベントを `info` レベルで出力する
///
/// `event.kind = "business_event"` を自動で付ける。呼び出し側は
/// `event.category` / `event.action` / `event.result` を [`event`] の定数で指定し、
/// 対象があれば `event.entity_type` / `event.entity_id`、受信者は `event.actor_id` に入れる。
#[macro_export]
macro_rules! log_business_event {
    ($($args:tt)*) => {
        ::tracing::info!(
            event.kind = "business_event",
            $($args)*
        )
    };
}

/// イベントフィールドの定数
pub mod event {
    /// イベントカテゴリ
    pub mod category {
        pub const NOTIFICATION: &str = "notification";
    }

    /// イベントアクション
    pub mod action {
        pub const NOTIFICATION_EMITTED: &str = "notification.emitted";
        pub const NOTIFICATION_QUEUED: &str = "notification.queued";
        pub const NOTIFICATION_SENT: &str = "notification.sent";
        pub const NOTIFICATION_REJECTED: &str = "notification.rejected";
        pub const NOTIFICATION_FAILED: &str = "notification.failed";
    }

    /// エンティティ種別
    pub mod entity_type {
        pub const NOTIFICATION: &str = "notification";
        pub const NOTIFICATION_SUBSCRIPTION: &str = "notification_subscription";
        pub const EMAIL_TASK: &str = "email_task";
    }

    /// イベント結果
    pub mod result {
        pub const SUCCESS: &str = "success";
        pub const SKIPPED: &str = "skipped";
        pub const FAILURE: &str = "failure";
    }
}

/// エラーコンテキストフィールドの定数
pub mod error {
    /// エラーカテゴリ
    pub mod category {
        /// インフラストラクチャ（DB）
        pub const INFRASTRUCTURE: &str = "infrastructure";
        /// 外部サービス呼び出し（SMTP サーバー、メール送信 API）
        pub const EXTERNAL_SERVICE: &str = "external_service";
        /// アプリケーション内部（テンプレートの不備など）
        pub const APPLICATION: &str = "application";
    }

    /// エラー種別
    pub mod kind {
        pub const DATABASE: &str = "database";
        pub const TEMPLATE: &str = "template";
        pub const SMTP: &str = "smtp";
        pub const MAIL_API: &str = "mail_api";
        pub const CONFIGURATION: &str = "configuration";
    }
}

#[cfg(test)]
mod tests {
    use super::event;

    #[test]
    fn ビジネスイベントマクロがinfoレベルで出力できる() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            crate::log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_SENT,
                event.result = event::result::SUCCESS,
                "テストイベント"
            );
        });
    }
}
