//! SMTP 通知送信実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//!
//! ## 接続先の解決
//!
//! メールキャプチャスイッチが有効ならメールキャプチャツール（MailHog / Mailpit）、
//! 無効なら本番の SMTP サーバーに接続する。解決はインスタンス生成時に 1 回だけ行う。
//! 解決した接続先のホストまたはポートが未設定の場合、インスタンスは「未設定」状態になり、
//! 送信のたびに `NotificationError::NotConfigured` を返す。
//!
//! ## 送信抑止
//!
//! `suppress_delivery` が有効な環境（CI）ではメッセージの構築までを行い、
//! トランスポートには渡さない。

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{
        Attachment,
        Mailbox,
        Message,
        MultiPart,
        SinglePart,
        header::ContentType,
    },
};
use notiflow_domain::{
    email::{DeliveryOutcome, EmailAttachment, EmailMessage},
    notification::NotificationError,
};
use notiflow_shared::event_log::error;

use super::NotificationSender;

/// SMTP サーバーの接続先
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtpEndpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl SmtpEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
        }
    }
}

/// SMTP 送信の設定
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    /// 本番の SMTP サーバー
    pub server:            SmtpEndpoint,
    /// メールキャプチャツール
    pub mail_capture:      SmtpEndpoint,
    /// メールキャプチャツールに送るかどうか（フィーチャースイッチで決まる）
    pub use_mail_capture:  bool,
    /// 送信元メールアドレス
    pub from_address:      String,
    /// メッセージを構築するが送信しない（CI 環境向け）
    pub suppress_delivery: bool,
}

impl SmtpSettings {
    /// スイッチに従って接続先を選び、ホストとポートが揃っていれば返す
    pub fn resolve_endpoint(&self) -> Option<(&str, u16)> {
        let endpoint = if self.use_mail_capture {
            &self.mail_capture
        } else {
            &self.server
        };

        match (endpoint.host.as_deref(), endpoint.port) {
            (Some(host), Some(port)) if !host.is_empty() => Some((host, port)),
            _ => None,
        }
    }
}

/// SMTP 通知送信
///
/// `lettre::AsyncSmtpTransport<Tokio1Executor>` をラップする。
pub struct SmtpNotificationSender {
    transport:         Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_address:      String,
    suppress_delivery: bool,
}

impl SmtpNotificationSender {
    /// 新しい SMTP 送信インスタンスを作成
    ///
    /// 接続はこの時点では張らない（送信時に接続する）。
    pub fn new(settings: &SmtpSettings) -> Self {
        let transport = match settings.resolve_endpoint() {
            Some((host, port)) => {
                tracing::debug!(host, port, mail_capture = settings.use_mail_capture, "SMTP 接続先を解決");
                // builder_dangerous: TLS なしで接続（メールキャプチャツールやローカルリレー向け）
                Some(
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                        .port(port)
                        .build(),
                )
            }
            None => {
                tracing::warn!(
                    error.category = error::category::EXTERNAL_SERVICE,
                    error.kind = error::kind::CONFIGURATION,
                    mail_capture = settings.use_mail_capture,
                    "SMTP のホストまたはポートが未設定のため、送信は失敗します"
                );
                None
            }
        };

        Self {
            transport,
            from_address: settings.from_address.clone(),
            suppress_delivery: settings.suppress_delivery,
        }
    }

    fn build_message(&self, email: &EmailMessage) -> Result<Message, NotificationError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.from_address, "送信元")?)
            .subject(&email.subject);

        for to in &email.to {
            builder = builder.to(parse_mailbox(to, "宛先")?);
        }
        for cc in &email.cc {
            builder = builder.cc(parse_mailbox(cc, "CC")?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(parse_mailbox(bcc, "BCC")?);
        }
        if let Some(reply_to) = &email.reply_to {
            builder = builder.reply_to(parse_mailbox(reply_to, "返信先")?);
        }

        let message = match &email.attachment {
            Some(attachment) => builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::html(email.html_body.clone()))
                    .singlepart(build_attachment(attachment)?),
            ),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(email.html_body.clone()),
        };

        message.map_err(|e| NotificationError::SendFailed(format!("メッセージ構築失敗: {e}")))
    }
}

#[async_trait]
impl NotificationSender for SmtpNotificationSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryOutcome, NotificationError> {
        let Some(transport) = &self.transport else {
            return Err(NotificationError::NotConfigured(
                "SMTP のホストまたはポートが設定されていません".to_string(),
            ));
        };

        let message = self.build_message(email)?;

        if self.suppress_delivery {
            tracing::info!(
                to = ?email.to,
                subject = %email.subject,
                "送信抑止が有効なため SMTP 送信をスキップ"
            );
            return Ok(DeliveryOutcome::Suppressed);
        }

        transport.send(message).await.map_err(|e| {
            tracing::error!(
                error.category = error::category::EXTERNAL_SERVICE,
                error.kind = error::kind::SMTP,
                error = %e,
                to = ?email.to,
                "SMTP 送信に失敗しました"
            );
            NotificationError::SendFailed(format!("SMTP 送信失敗: {e}"))
        })?;

        Ok(DeliveryOutcome::Sent)
    }
}

fn parse_mailbox(address: &str, label: &str) -> Result<Mailbox, NotificationError> {
    address
        .parse()
        .map_err(|e| NotificationError::SendFailed(format!("{label}アドレス不正: {e}")))
}

fn build_attachment(attachment: &EmailAttachment) -> Result<SinglePart, NotificationError> {
    let content_type = ContentType::parse(content_type_for(&attachment.name))
        .map_err(|e| NotificationError::SendFailed(format!("添付ファイルの種別が不正: {e}")))?;

    Ok(Attachment::new(attachment.name.clone()).body(attachment.content.clone(), content_type))
}

/// ファイル名の拡張子から MIME タイプを推定する
pub(super) fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
