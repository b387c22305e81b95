//! # 通知サービス設定
//!
//! 環境変数から通知サービスの設定を読み込む。
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `NOTIFICATION_BACKEND` | No | `smtp` / `sendgrid` / `noop`（デフォルト: `noop`） |
//! | `NOTIFICATION_FROM_ADDRESS` | No | 送信元アドレス（未設定なら API 送信は見送り、SMTP は `noreply@notiflow.example.com`） |
//! | `SMTP_HOST` / `SMTP_PORT` | No | 本番 SMTP サーバー（未設定なら SMTP 送信は失敗する） |
//! | `MAIL_CAPTURE_HOST` / `MAIL_CAPTURE_PORT` | No | メールキャプチャツールの SMTP（デフォルト: `localhost:1025`） |
//! | `MAIL_CAPTURE_API_URL` | No | メールキャプチャツールの HTTP API（`notiflow captured` が使う。デフォルト: `http://localhost:8025`） |
//! | `SUPPRESS_EMAIL_DELIVERY` | No | `true` ならメッセージを組み立てるが送信しない |
//! | `SENDGRID_API_KEY` | No | メール送信 API のキー |
//! | `SENDGRID_API_BASE_URL` | No | メール送信 API のベース URL |
//! | `SENDGRID_WHITELIST_MODE` | No | `true` ならホワイトリストの宛先にしか送らない |
//! | `SENDGRID_WHITELIST` | No | 許可する宛先（カンマ区切り） |
//! | `ENABLED_SWITCHES` | No | 有効なフィーチャースイッチ（カンマ区切り） |

use std::{str::FromStr, sync::Arc};

use notiflow_infra::{
    mail_capture::MailCaptureClient,
    notification::{
        NoopNotificationSender,
        NotificationBackend,
        NotificationSender,
        SendGridNotificationSender,
        SendGridSettings,
        SmtpEndpoint,
        SmtpNotificationSender,
        SmtpSettings,
    },
};
use thiserror::Error;

use crate::feature_switch::{ENABLE_MAIL_CAPTURE, FeatureSwitches};

/// SMTP 送信で送信元が未設定のときに使うアドレス
const DEFAULT_SMTP_FROM_ADDRESS: &str = "noreply@notiflow.example.com";
const DEFAULT_MAIL_CAPTURE_HOST: &str = "localhost";
const DEFAULT_MAIL_CAPTURE_PORT: u16 = 1025;
const DEFAULT_MAIL_CAPTURE_API_URL: &str = "http://localhost:8025";
const DEFAULT_SENDGRID_API_BASE_URL: &str = "https://api.sendgrid.com";

/// 設定読み込みエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("環境変数 {0} が設定されていません")]
    Missing(&'static str),

    #[error("環境変数 {name} の値が不正です（{value:?}）: {reason}")]
    Invalid {
        name:   &'static str,
        value:  String,
        reason: String,
    },
}

/// 通知サービスの設定
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// データベース接続 URL
    pub database_url: String,
    /// 通知設定
    pub notification: NotificationConfig,
}

/// 通知機能の設定
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// 送信バックエンド
    pub backend:              NotificationBackend,
    /// 送信元メールアドレス
    pub from_address:         Option<String>,
    /// 本番 SMTP サーバー
    pub smtp:                 SmtpEndpoint,
    /// メールキャプチャツールの SMTP
    pub mail_capture:         SmtpEndpoint,
    /// メールキャプチャツールの HTTP API
    pub mail_capture_api_url: String,
    /// メッセージを組み立てるが送信しない
    pub suppress_delivery:    bool,
    pub sendgrid_api_key:     Option<String>,
    pub sendgrid_base_url:    String,
    pub whitelist_mode:       bool,
    pub whitelist:            Vec<String>,
}

impl ServiceConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の変数ソースから設定を読み込む
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            notification: NotificationConfig::from_lookup(&lookup)?,
        })
    }
}

impl NotificationConfig {
    /// 環境変数から通知設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意の変数ソースから通知設定を読み込む
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match lookup("NOTIFICATION_BACKEND") {
            Some(value) => NotificationBackend::from_str(value.trim()).map_err(|_| {
                ConfigError::Invalid {
                    name: "NOTIFICATION_BACKEND",
                    value,
                    reason: "smtp / sendgrid / noop のいずれかを指定してください".to_string(),
                }
            })?,
            None => NotificationBackend::default(),
        };

        Ok(Self {
            backend,
            from_address: non_empty(lookup("NOTIFICATION_FROM_ADDRESS")),
            smtp: SmtpEndpoint {
                host: non_empty(lookup("SMTP_HOST")),
                port: parse_port("SMTP_PORT", lookup("SMTP_PORT"))?,
            },
            mail_capture: SmtpEndpoint {
                host: Some(
                    non_empty(lookup("MAIL_CAPTURE_HOST"))
                        .unwrap_or_else(|| DEFAULT_MAIL_CAPTURE_HOST.to_string()),
                ),
                port: Some(
                    parse_port("MAIL_CAPTURE_PORT", lookup("MAIL_CAPTURE_PORT"))?
                        .unwrap_or(DEFAULT_MAIL_CAPTURE_PORT),
                ),
            },
            mail_capture_api_url: lookup("MAIL_CAPTURE_API_URL")
                .unwrap_or_else(|| DEFAULT_MAIL_CAPTURE_API_URL.to_string()),
            suppress_delivery: parse_bool(
                "SUPPRESS_EMAIL_DELIVERY",
                lookup("SUPPRESS_EMAIL_DELIVERY"),
            )?,
            sendgrid_api_key: non_empty(lookup("SENDGRID_API_KEY")),
            sendgrid_base_url: lookup("SENDGRID_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SENDGRID_API_BASE_URL.to_string()),
            whitelist_mode: parse_bool(
                "SENDGRID_WHITELIST_MODE",
                lookup("SENDGRID_WHITELIST_MODE"),
            )?,
            whitelist: lookup("SENDGRID_WHITELIST")
                .map(|value| {
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|address| !address.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// 設定されたバックエンドの送信実装を作成する
    ///
    /// SMTP の接続先はこの時点のスイッチの状態で決まる。
    pub fn build_sender(&self, switches: &dyn FeatureSwitches) -> Arc<dyn NotificationSender> {
        tracing::info!(backend = %self.backend, "通知送信バックエンドを初期化");

        match self.backend {
            NotificationBackend::Smtp => Arc::new(SmtpNotificationSender::new(&SmtpSettings {
                server:            self.smtp.clone(),
                mail_capture:      self.mail_capture.clone(),
                use_mail_capture:  switches.is_active(ENABLE_MAIL_CAPTURE),
                from_address:      self
                    .from_address
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SMTP_FROM_ADDRESS.to_string()),
                suppress_delivery: self.suppress_delivery,
            })),
            NotificationBackend::SendGrid => {
                Arc::new(SendGridNotificationSender::new(SendGridSettings {
                    api_key:        self.sendgrid_api_key.clone(),
                    from_address:   self.from_address.clone(),
                    base_url:       self.sendgrid_base_url.clone(),
                    whitelist_mode: self.whitelist_mode,
                    whitelist:      self.whitelist.clone(),
                }))
            }
            NotificationBackend::Noop => Arc::new(NoopNotificationSender),
        }
    }

    /// メールキャプチャツールの HTTP API クライアントを作成する
    pub fn mail_capture_client(&self) -> MailCaptureClient {
        MailCaptureClient::new(&self.mail_capture_api_url)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_port(name: &'static str, value: Option<String>) -> Result<Option<u16>, ConfigError> {
    match non_empty(value) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
                name,
                value,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_bool(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(value) = non_empty(value) else {
        return Ok(false);
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "真偽値（true / false）を指定してください".to_string(),
        }),
    }
}
