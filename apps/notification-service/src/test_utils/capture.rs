//! # 通知キャプチャハーネス
//!
//! テスト中に発行された通知と送信されたメールを記録し、終了時にテンプレートを検証する。
//!
//! ## 設計方針
//!
//! - **差し替えは依存注入で行う**: テスト対象には [`NotificationCapture::notifier`] と
//!   [`NotificationCapture::sender`] が返すラッパーを渡す。グローバルな差し替えはしない
//! - **検証は `finish` で明示的に行う**: `finish` は `self` を消費する。
//!   `?` やパニックで途中離脱した場合は検証されない
//! - **検証は厳格モード**: 本番経路は寛容モードでテンプレート不備を握りつぶすため、
//!   記録した emit を [`RenderPolicy::Strict`] で再レンダリングして不足変数を検出する
//! - **期待するメールも厳格モードで作る**: [`NotificationCapture::expected_emails`] は記録した emit を
//!   組み立て直し、メールキャプチャツールの実際のメールと [`assert_emails`] で比較できる形にする
//! - **入れ子にできる**: `CapturingNotifier` 自体も `Notifier` なので、別のキャプチャの内側に置ける
//!
//! ## 使用例
//!
//! ```ignore
//! let capture = NotificationCapture::start(service, renderer, cache, CaptureOptions::default());
//! usecase_under_test(&capture.notifier()).await?;
//! let captured = capture.finish().await?;
//! assert_eq!(captured.emits.len(), 1);
//! ```

use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use async_trait::async_trait;
use notiflow_domain::{
    email::{DeliveryOutcome, EmailContext, EmailMessage},
    notification::{NotificationError, NotificationTypeName},
    user::User,
};
use notiflow_infra::{NotificationSender, mail_capture::CapturedMail};
use pretty_assertions::Comparison;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::usecase::notification::{
    EmitOutcome,
    EmitRequest,
    NotificationTypeCache,
    Notifier,
    RenderPolicy,
    TemplateRenderer,
};

/// 正規化後のタイムスタンプ表記
pub const TIMESTAMP_PLACEHOLDER: &str = "<<TS>>";

static TUPLE_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\(\s*'\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?'\s*,\s*\)",
    )
    .unwrap()
});
static ISO_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?")
        .unwrap()
});
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// キャプチャの動作設定
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// 記録に加えて内側の notifier / sender にも処理を委譲する
    pub passthrough: bool,
    /// 通知が 1 件も発行されないことを期待する
    pub expect_none: bool,
}

/// 記録された emit
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEmit {
    pub notification_type: NotificationTypeName,
    pub user:              User,
    pub event_context:     Value,
    pub email_context:     Option<EmailContext>,
    pub save:              bool,
    /// 通知種別の既定頻度がダイジェストで、かつ保存ありの emit
    pub is_digest:         bool,
}

/// `finish` の結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedNotifications {
    pub emits: Vec<CapturedEmit>,
    pub sends: Vec<EmailMessage>,
}

impl CapturedNotifications {
    /// 指定した通知種別の emit だけを返す
    pub fn emits_of(&self, name: NotificationTypeName) -> Vec<&CapturedEmit> {
        self.emits
            .iter()
            .filter(|emit| emit.notification_type == name)
            .collect()
    }
}

/// キャプチャ検証エラー
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("通知は発行されない想定でしたが {count} 件発行されました: {notification_types:?}")]
    UnexpectedEmits {
        count:              usize,
        notification_types: Vec<NotificationTypeName>,
    },

    #[error(
        "通知種別 {notification_type} のテンプレートをレンダリングできません（不足変数: {missing_variables:?}）: {message}"
    )]
    TemplateFailed {
        notification_type: NotificationTypeName,
        missing_variables: Vec<String>,
        message:           String,
    },

    #[error("通知種別 {notification_type} のレンダリング結果が空です")]
    EmptyRender {
        notification_type: NotificationTypeName,
    },

    #[error("通知種別 {notification_type} のテンプレートがレンダリングされていません")]
    Unrendered {
        notification_type: NotificationTypeName,
    },

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

#[derive(Default)]
struct Recorder {
    emits: Mutex<Vec<CapturedEmit>>,
    sends: Mutex<Vec<EmailMessage>>,
}

impl Recorder {
    fn record_emit(&self, emit: CapturedEmit) {
        self.emits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(emit);
    }

    fn record_send(&self, email: EmailMessage) {
        self.sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(email);
    }

    fn snapshot(&self) -> CapturedNotifications {
        CapturedNotifications {
            emits: self
                .emits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            sends: self
                .sends
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// 実行中のキャプチャ
pub struct NotificationCapture {
    inner:    Arc<dyn Notifier>,
    renderer: Arc<TemplateRenderer>,
    cache:    Arc<NotificationTypeCache>,
    options:  CaptureOptions,
    recorder: Arc<Recorder>,
}

impl NotificationCapture {
    /// キャプチャを開始する
    ///
    /// - `inner`: `passthrough` 時に委譲する notifier
    /// - `renderer` / `cache`: `finish` での再レンダリングに使う
    pub fn start(
        inner: Arc<dyn Notifier>,
        renderer: Arc<TemplateRenderer>,
        cache: Arc<NotificationTypeCache>,
        options: CaptureOptions,
    ) -> Self {
        Self {
            inner,
            renderer,
            cache,
            options,
            recorder: Arc::new(Recorder::default()),
        }
    }

    /// テスト対象に渡す notifier
    pub fn notifier(&self) -> CapturingNotifier {
        CapturingNotifier {
            inner:       Arc::clone(&self.inner),
            cache:       Arc::clone(&self.cache),
            recorder:    Arc::clone(&self.recorder),
            passthrough: self.options.passthrough,
        }
    }

    /// 送信を記録するラッパーを作る
    pub fn sender(&self, inner: Arc<dyn NotificationSender>) -> CapturingSender {
        CapturingSender {
            inner,
            recorder: Arc::clone(&self.recorder),
            passthrough: self.options.passthrough,
        }
    }

    /// ここまでに記録された内容
    pub fn captured(&self) -> CapturedNotifications {
        self.recorder.snapshot()
    }

    /// キャプチャを終了し、記録した emit を検証する
    pub async fn finish(self) -> Result<CapturedNotifications, CaptureError> {
        let captured = self.recorder.snapshot();

        if self.options.expect_none {
            if !captured.emits.is_empty() {
                return Err(CaptureError::UnexpectedEmits {
                    count:              captured.emits.len(),
                    notification_types: captured
                        .emits
                        .iter()
                        .map(|emit| emit.notification_type)
                        .collect(),
                });
            }
            return Ok(captured);
        }

        for emit in &captured.emits {
            self.validate(emit).await?;
        }

        tracing::debug!(
            emits = captured.emits.len(),
            sends = captured.sends.len(),
            "通知キャプチャを検証しました"
        );
        Ok(captured)
    }

    /// 記録した emit から、送信されるはずのメールを厳格モードで組み立て直す
    ///
    /// ダイジェストに回った emit は即時送信されないため含めない。
    /// 戻り値はメールキャプチャツールから取得した実際のメールと [`assert_emails`] で比較する。
    pub async fn expected_emails(
        &self,
        captured: &CapturedNotifications,
    ) -> Result<Vec<ExpectedEmail>, CaptureError> {
        let mut expected = Vec::new();
        for emit in captured.emits.iter().filter(|emit| !emit.is_digest) {
            let email = self.compose_strict(emit).await?;
            expected.push(ExpectedEmail::from(&email));
        }
        Ok(expected)
    }

    async fn validate(&self, emit: &CapturedEmit) -> Result<(), CaptureError> {
        let notification_type = self.cache.get(emit.notification_type).await?;
        let email = self.compose_strict(emit).await?;
        let name = emit.notification_type;

        if email.html_body.trim().is_empty() {
            return Err(CaptureError::EmptyRender {
                notification_type: name,
            });
        }
        if email.html_body == notification_type.template() {
            return Err(CaptureError::Unrendered {
                notification_type: name,
            });
        }

        Ok(())
    }

    /// 件名と本文を厳格モードでレンダリングし、emit の受信者宛てのメールにする
    async fn compose_strict(&self, emit: &CapturedEmit) -> Result<EmailMessage, CaptureError> {
        let notification_type = self.cache.get(emit.notification_type).await?;

        self.renderer
            .compose(
                &notification_type,
                vec![emit.user.username().to_string()],
                &emit.event_context,
                emit.email_context.as_ref(),
                RenderPolicy::Strict,
            )
            .map_err(|error| match error {
                NotificationError::TemplateFailed {
                    message,
                    missing_variables,
                } => CaptureError::TemplateFailed {
                    notification_type: emit.notification_type,
                    missing_variables,
                    message,
                },
                other => CaptureError::Notification(other),
            })
    }
}

/// emit を記録する notifier
#[derive(Clone)]
pub struct CapturingNotifier {
    inner:       Arc<dyn Notifier>,
    cache:       Arc<NotificationTypeCache>,
    recorder:    Arc<Recorder>,
    passthrough: bool,
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn emit(&self, request: EmitRequest) -> Result<EmitOutcome, NotificationError> {
        let notification_type = self.cache.get(request.notification_type).await?;

        self.recorder.record_emit(CapturedEmit {
            notification_type: request.notification_type,
            user:              request.user.clone(),
            event_context:     request.event_context.clone(),
            email_context:     request.email_context.clone(),
            save:              request.save,
            is_digest:         request.save && notification_type.default_frequency().is_digest(),
        });

        if self.passthrough {
            self.inner.emit(request).await
        } else {
            Ok(EmitOutcome::Sent)
        }
    }
}

/// 送信を記録する sender
#[derive(Clone)]
pub struct CapturingSender {
    inner:       Arc<dyn NotificationSender>,
    recorder:    Arc<Recorder>,
    passthrough: bool,
}

#[async_trait]
impl NotificationSender for CapturingSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryOutcome, NotificationError> {
        self.recorder.record_send(email.clone());

        if self.passthrough {
            self.inner.send_email(email).await
        } else {
            Ok(DeliveryOutcome::Sent)
        }
    }
}

/// 比較用のメール（宛先と本文）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedEmail {
    pub to:   String,
    pub body: String,
}

impl ExpectedEmail {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to:   to.into(),
            body: body.into(),
        }
    }
}

impl From<&EmailMessage> for ExpectedEmail {
    fn from(email: &EmailMessage) -> Self {
        Self::new(email.to.join(", "), email.html_body.as_str())
    }
}

impl From<&CapturedMail> for ExpectedEmail {
    fn from(mail: &CapturedMail) -> Self {
        Self::new(mail.to.join(", "), mail.body.as_str())
    }
}

/// メール比較の不一致
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmailMismatch {
    #[error("メールの件数が一致しません（期待: {expected}, 実際: {actual}）")]
    Count { expected: usize, actual: usize },

    #[error("宛先が一致しません:\n{diff}")]
    Recipients { diff: String },

    #[error("{recipient} 宛ての本文が一致しません:\n{diff}")]
    Body { recipient: String, diff: String },
}

/// HTML 本文を比較用に正規化する
///
/// 実体参照を戻し、タイムスタンプを [`TIMESTAMP_PLACEHOLDER`] に置き換え、
/// 連続する空白を 1 つにまとめる。
pub fn canonicalize_html(html: &str) -> String {
    let decoded = html_escape::decode_html_entities(html);
    let without_tuples = TUPLE_TIMESTAMP.replace_all(&decoded, TIMESTAMP_PLACEHOLDER);
    let without_timestamps = ISO_TIMESTAMP.replace_all(&without_tuples, TIMESTAMP_PLACEHOLDER);
    WHITESPACE
        .replace_all(&without_timestamps, " ")
        .trim()
        .to_string()
}

/// 期待するメールと実際のメールを正規化して比較する
///
/// 両方を宛先で並べ替えてから、件数・宛先・本文の順に比較する。
pub fn assert_emails(
    expected: &[ExpectedEmail],
    actual: &[ExpectedEmail],
) -> Result<(), EmailMismatch> {
    if expected.len() != actual.len() {
        return Err(EmailMismatch::Count {
            expected: expected.len(),
            actual:   actual.len(),
        });
    }

    let expected = canonicalize_sorted(expected);
    let actual = canonicalize_sorted(actual);

    let expected_recipients: Vec<&str> = expected.iter().map(|e| e.to.as_str()).collect();
    let actual_recipients: Vec<&str> = actual.iter().map(|e| e.to.as_str()).collect();
    if expected_recipients != actual_recipients {
        return Err(EmailMismatch::Recipients {
            diff: Comparison::new(&expected_recipients, &actual_recipients).to_string(),
        });
    }

    for (expected, actual) in expected.iter().zip(&actual) {
        if expected.body != actual.body {
            return Err(EmailMismatch::Body {
                recipient: expected.to.clone(),
                diff:      Comparison::new(&expected.body, &actual.body).to_string(),
            });
        }
    }

    Ok(())
}

fn canonicalize_sorted(emails: &[ExpectedEmail]) -> Vec<ExpectedEmail> {
    let mut canonical: Vec<ExpectedEmail> = emails
        .iter()
        .map(|email| ExpectedEmail::new(email.to.trim(), canonicalize_html(&email.body)))
        .collect();
    canonical.sort_by(|a, b| a.to.cmp(&b.to));
    canonical
}
