//! SendGrid 互換 API 通知送信実装
//!
//! トランザクションメール API（v3 `mail/send`）に JSON を POST してメールを送信する。
//!
//! ## 送信前チェック
//!
//! 以下のいずれかに該当する場合、HTTP リクエストを送らずに
//! `DeliveryOutcome::Rejected` を返す。エラーではなく「送らなかった」という結果として扱う。
//!
//! 1. 正規化後の宛先が空
//! 2. API キーが未設定
//! 3. 送信元アドレスが未設定
//! 4. ホワイトリストモードで、許可されていないアドレスが to / cc / bcc に含まれる
//!
//! ## エラーレスポンス
//!
//! 2xx 以外のレスポンスはステータスごとにログを出し分けたうえで
//! `NotificationError::Api` として返す。

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use itertools::Itertools;
use notiflow_domain::{
    email::{DeliveryOutcome, EmailAttachment, EmailMessage, RejectReason},
    notification::NotificationError,
};
use notiflow_shared::event_log::error;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{NotificationSender, smtp::content_type_for};

/// API が受け付けるカテゴリ数の上限
pub const MAX_CATEGORIES: usize = 10;

/// カテゴリ 1 件あたりの最大バイト数
pub const MAX_CATEGORY_LENGTH: usize = 255;

/// SendGrid 互換 API の設定
#[derive(Debug, Clone)]
pub struct SendGridSettings {
    pub api_key:        Option<String>,
    pub from_address:   Option<String>,
    /// API のベース URL（例: `https://api.sendgrid.com`）
    pub base_url:       String,
    /// 有効な場合、`whitelist` に含まれるアドレスにしか送信しない
    pub whitelist_mode: bool,
    pub whitelist:      Vec<String>,
}

/// SendGrid 互換 API 通知送信
pub struct SendGridNotificationSender {
    client:   reqwest::Client,
    settings: SendGridSettings,
}

impl SendGridNotificationSender {
    /// 新しい送信インスタンスを作成
    pub fn new(mut settings: SendGridSettings) -> Self {
        settings.base_url = settings.base_url.trim_end_matches('/').to_string();
        settings.whitelist = settings
            .whitelist
            .iter()
            .map(|address| address.trim().to_lowercase())
            .filter(|address| !address.is_empty())
            .collect();

        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn is_whitelisted(&self, address: &str) -> bool {
        let address = address.to_lowercase();
        self.settings.whitelist.iter().any(|allowed| *allowed == address)
    }

    /// 送信前チェック。送信してよければ `None`
    fn preflight(&self, recipients: &Recipients) -> Option<RejectReason> {
        if recipients.to.is_empty() {
            return Some(RejectReason::NoRecipients);
        }
        if self.settings.api_key.as_deref().is_none_or(str::is_empty) {
            return Some(RejectReason::MissingApiKey);
        }
        if self.settings.from_address.as_deref().is_none_or(str::is_empty) {
            return Some(RejectReason::MissingFromAddress);
        }
        if self.settings.whitelist_mode
            && !recipients.all().all(|address| self.is_whitelisted(address))
        {
            return Some(RejectReason::NotWhitelisted);
        }
        None
    }
}

#[async_trait]
impl NotificationSender for SendGridNotificationSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryOutcome, NotificationError> {
        let recipients = Recipients {
            to:  normalize_recipients(&email.to),
            cc:  normalize_recipients(&email.cc),
            bcc: normalize_recipients(&email.bcc),
        };

        if let Some(reason) = self.preflight(&recipients) {
            tracing::error!(
                error.category = error::category::EXTERNAL_SERVICE,
                error.kind = error::kind::CONFIGURATION,
                %reason,
                notification_type = %email.notification_type,
                to = ?recipients.to,
                "送信前チェックに不合格のため送信を見送りました"
            );
            return Ok(DeliveryOutcome::Rejected(reason));
        }

        // preflight で存在を確認済み
        let api_key = self.settings.api_key.as_deref().unwrap_or_default();
        let from_address = self.settings.from_address.as_deref().unwrap_or_default();

        let payload = MailSendRequest::build(email, &recipients, from_address);
        let url = format!("{}/v3/mail/send", self.settings.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("メール送信 API 接続失敗: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(
                %status,
                to = ?recipients.to,
                subject = %email.subject,
                "メール送信 API でメールを送信"
            );
            return Ok(DeliveryOutcome::Sent);
        }

        let body = response.text().await.unwrap_or_default();
        log_error_response(status, &body, &payload);

        Err(NotificationError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// 宛先を正規化する
///
/// 前後の空白を除去し、空文字を捨て、出現順を保ったまま重複を除く。
pub fn normalize_recipients(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .map(|address| address.trim())
        .filter(|address| !address.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}

/// カテゴリを API が受け付ける形に整える
///
/// 空文字、255 バイト超、印字可能 ASCII（0x20..=0x7E）以外を含むものは丸ごと捨て、
/// 残りの先頭 10 件を返す。
pub fn sanitize_categories(categories: &[String]) -> Vec<String> {
    categories
        .iter()
        .filter(|category| {
            !category.is_empty()
                && category.len() <= MAX_CATEGORY_LENGTH
                && category.bytes().all(|b| (0x20..=0x7E).contains(&b))
        })
        .take(MAX_CATEGORIES)
        .cloned()
        .collect()
}

fn log_error_response(status: StatusCode, body: &str, payload: &MailSendRequest<'_>) {
    let summary = payload.summary();

    match status {
        StatusCode::BAD_REQUEST => {
            let errors = serde_json::from_str::<ApiErrorResponse>(body)
                .map(|response| response.errors)
                .unwrap_or_default();
            if errors.is_empty() {
                tracing::error!(error.category = error::category::EXTERNAL_SERVICE, error.kind = error::kind::MAIL_API, %status, body, %summary, "メール送信 API がリクエストを拒否しました");
            }
            for error in errors {
                tracing::error!(
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::MAIL_API,
                    %status,
                    message = error.message.as_deref().unwrap_or_default(),
                    field = error.field.as_deref().unwrap_or_default(),
                    help = error.help.as_deref().unwrap_or_default(),
                    %summary,
                    "メール送信 API がリクエストを拒否しました"
                );
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            tracing::error!(error.category = error::category::EXTERNAL_SERVICE, error.kind = error::kind::MAIL_API, %status, body, %summary, "メール送信 API の認証・認可に失敗しました");
        }
        _ => {
            tracing::error!(error.category = error::category::EXTERNAL_SERVICE, error.kind = error::kind::MAIL_API, %status, body, %summary, "メール送信 API の呼び出しに失敗しました");
        }
    }
}

/// 正規化済みの宛先
struct Recipients {
    to:  Vec<String>,
    cc:  Vec<String>,
    bcc: Vec<String>,
}

impl Recipients {
    fn all(&self) -> impl Iterator<Item = &str> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .map(String::as_str)
    }
}

// --- リクエスト/レスポンス型 ---

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from:             Address<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to:         Option<Address<'a>>,
    subject:          &'a str,
    content:          Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    categories:       Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments:      Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to:  Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc:  Vec<Address<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

fn addresses(list: &[String]) -> Vec<Address<'_>> {
    list.iter()
        .map(|email| Address {
            email: email.as_str(),
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value:        &'a str,
}

#[derive(Debug, Serialize)]
struct Attachment {
    content:     String,
    filename:    String,
    #[serde(rename = "type")]
    mime_type:   &'static str,
    disposition: &'static str,
}

impl<'a> MailSendRequest<'a> {
    fn build(email: &'a EmailMessage, recipients: &'a Recipients, from_address: &'a str) -> Self {
        Self {
            personalizations: vec![Personalization {
                to:  addresses(&recipients.to),
                cc:  addresses(&recipients.cc),
                bcc: addresses(&recipients.bcc),
            }],
            from:             Address {
                email: from_address,
            },
            reply_to:         email.reply_to.as_deref().map(|email| Address { email }),
            subject:          &email.subject,
            content:          vec![
                Content {
                    content_type: "text/plain",
                    value:        &email.text_body,
                },
                Content {
                    content_type: "text/html",
                    value:        &email.html_body,
                },
            ],
            categories:       sanitize_categories(&email.categories),
            attachments:      email.attachment.iter().map(Attachment::from).collect(),
        }
    }

    /// ログ出力用の要約（本文と添付ファイルの内容は含めない）
    fn summary(&self) -> String {
        let to = self
            .personalizations
            .iter()
            .flat_map(|p| p.to.iter().map(|a| a.email))
            .join(",");
        format!(
            "to=[{to}] subject={:?} categories={:?} attachments={}",
            self.subject,
            self.categories,
            self.attachments.len()
        )
    }
}

impl From<&EmailAttachment> for Attachment {
    fn from(attachment: &EmailAttachment) -> Self {
        Self {
            content:     STANDARD.encode(&attachment.content),
            filename:    attachment.name.clone(),
            mime_type:   content_type_for(&attachment.name),
            disposition: "attachment",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    errors: Vec<ApiFieldError>,
}

#[derive(Debug, Deserialize)]
struct ApiFieldError {
    message: Option<String>,
    field:   Option<String>,
    help:    Option<String>,
}
