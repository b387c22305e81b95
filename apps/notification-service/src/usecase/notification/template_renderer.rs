//! # テンプレートレンダラー
//!
//! 通知種別に保存された本文テンプレートを tera でレンダリングし、
//! 件名・HTML・プレーンテキストを揃えた `EmailMessage` を組み立てる。
//!
//! ## 設計方針
//!
//! - **基底レイアウトは `include_str!` で埋め込み**: `notify_base.html` と `digest_base.html` を
//!   起動時に登録し、DB 上のテンプレートは `{% extends "notify_base.html" %}` で継承する
//! - **仮想テンプレート名**: テンプレート本文の 64 bit ハッシュから `virtual/<hash>.html` という
//!   名前を作って登録する。名前は継承の解決のためだけにあり、同じ本文は 2 回目以降コンパイルしない
//! - **失敗の扱いは呼び出し側が選ぶ**: 本番の送信経路は [`RenderPolicy::Lenient`]、
//!   テストハーネスは [`RenderPolicy::Strict`] を使う

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    sync::{LazyLock, PoisonError, RwLock},
};

use notiflow_domain::{
    email::{EmailContext, EmailMessage},
    notification::{NotificationError, NotificationType},
};
use notiflow_shared::event_log;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};

use super::{interpolate_subject, to_plain_text};

/// 診断のために未定義変数を補って再レンダリングする最大回数
const MAX_DIAGNOSTIC_RENDERS: usize = 16;

static MISSING_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Variable `([^`]+)` not found").unwrap());

/// レンダリング失敗時の振る舞い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPolicy {
    /// 失敗をログに出し、レンダリング前のテンプレートをそのまま返す（本番の送信経路）
    #[default]
    Lenient,
    /// 失敗を `NotificationError::TemplateFailed` として返す（テストハーネス）
    Strict,
}

/// テンプレートレンダラー
///
/// 内部の tera インスタンスはコンパイル済みテンプレートのキャッシュを兼ねるため、
/// `RwLock` で保護して複数タスクから共有する。
pub struct TemplateRenderer {
    engine: RwLock<Tera>,
}

impl TemplateRenderer {
    /// 基底レイアウトを登録したレンダラーを作成する
    pub fn new() -> Result<Self, NotificationError> {
        let mut engine = Tera::default();

        engine
            .add_raw_templates(vec![
                (
                    "notify_base.html",
                    include_str!("../../../templates/notifications/notify_base.html"),
                ),
                (
                    "digest_base.html",
                    include_str!("../../../templates/notifications/digest_base.html"),
                ),
            ])
            .map_err(|e| template_failed(&e, Vec::new()))?;

        Ok(Self {
            engine: RwLock::new(engine),
        })
    }

    /// テンプレート本文をコンテキストでレンダリングする
    ///
    /// 同じ入力に対しては常にバイト単位で同じ出力を返す。
    pub fn render(
        &self,
        template_text: &str,
        context: &Value,
        policy: RenderPolicy,
    ) -> Result<String, NotificationError> {
        match self.try_render(template_text, context) {
            Ok(html) => Ok(html),
            Err(error) => match policy {
                RenderPolicy::Strict => Err(error),
                RenderPolicy::Lenient => {
                    tracing::error!(
                        error.category = event_log::error::category::APPLICATION,
                        error.kind = event_log::error::kind::TEMPLATE,
                        error = %error,
                        "テンプレートのレンダリングに失敗したため、テンプレートをそのまま使用します"
                    );
                    Ok(template_text.to_string())
                }
            },
        }
    }

    /// 通知種別とコンテキストから送信可能なメールを組み立てる
    ///
    /// 件名テンプレートがない通知種別は `"Notification: {通知種別名}"` を件名にする。
    /// 件名と本文の両方が失敗した場合は、不足変数を 1 つのエラーにまとめて返す。
    pub fn compose(
        &self,
        notification_type: &NotificationType,
        recipients: Vec<String>,
        context: &Value,
        email_context: Option<&EmailContext>,
        policy: RenderPolicy,
    ) -> Result<EmailMessage, NotificationError> {
        let subject = match notification_type.subject() {
            Some(subject_template) => interpolate_subject(subject_template, context, policy),
            None => Ok(format!("Notification: {}", notification_type.name())),
        };
        let html_body = self.render(notification_type.template(), context, policy);
        let (subject, html_body) = match (subject, html_body) {
            (Ok(subject), Ok(html_body)) => (subject, html_body),
            (Err(subject_error), Err(body_error)) => {
                return Err(merge_template_failures(subject_error, body_error));
            }
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => return Err(e),
        };
        let text_body = to_plain_text(&html_body);
        let email_context = email_context.cloned().unwrap_or_default();

        Ok(EmailMessage {
            notification_type: notification_type.name(),
            to: recipients,
            attachment: email_context.attachment(),
            cc: email_context.cc,
            bcc: email_context.bcc,
            reply_to: email_context.reply_to,
            subject,
            html_body,
            text_body,
            categories: email_context.categories,
        })
    }

    fn try_render(&self, template_text: &str, context: &Value) -> Result<String, NotificationError> {
        let name = self.register(template_text)?;
        let tera_context = to_tera_context(context)?;

        let engine = self.engine.read().unwrap_or_else(PoisonError::into_inner);
        engine.render(&name, &tera_context).map_err(|e| {
            let missing_variables = diagnose_missing_variables(&engine, &name, context, &e);
            template_failed(&e, missing_variables)
        })
    }

    /// テンプレート本文を仮想名で登録し、その名前を返す（登録済みならコンパイルしない）
    fn register(&self, template_text: &str) -> Result<String, NotificationError> {
        let name = virtual_name(template_text);

        let registered = self
            .engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_template_names()
            .any(|registered| registered == name);
        if registered {
            return Ok(name);
        }

        let mut engine = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        engine
            .add_raw_template(&name, template_text)
            .map_err(|e| template_failed(&e, Vec::new()))?;
        tracing::debug!(template = %name, "テンプレートをコンパイル");

        Ok(name)
    }
}

fn virtual_name(template_text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    template_text.hash(&mut hasher);
    format!("virtual/{:016x}.html", hasher.finish())
}

fn to_tera_context(context: &Value) -> Result<Context, NotificationError> {
    match context {
        Value::Null => Ok(Context::new()),
        _ => Context::from_value(context.clone()).map_err(|e| template_failed(&e, Vec::new())),
    }
}

/// 未定義の変数を空文字で補いながら再レンダリングし、足りない変数をすべて集める
///
/// tera は最初に見つかった未定義変数で停止するため、1 回のエラーからは 1 件しか分からない。
fn diagnose_missing_variables(
    engine: &Tera,
    name: &str,
    context: &Value,
    first_error: &tera::Error,
) -> Vec<String> {
    let Some(first) = missing_variable(first_error) else {
        return Vec::new();
    };

    let mut missing = vec![first];
    let mut patched = context.as_object().cloned().unwrap_or_default();

    for _ in 0..MAX_DIAGNOSTIC_RENDERS {
        let Some(last) = missing.last() else { break };
        let root = last.split(['.', '[']).next().unwrap_or_default();
        if root.is_empty() || patched.contains_key(root) {
            break;
        }
        patched.insert(root.to_string(), Value::String(String::new()));

        let Ok(tera_context) = Context::from_value(Value::Object(patched.clone())) else {
            break;
        };
        match engine.render(name, &tera_context) {
            Ok(_) => break,
            Err(e) => match missing_variable(&e) {
                Some(variable) if !missing.contains(&variable) => missing.push(variable),
                _ => break,
            },
        }
    }

    missing
}

fn missing_variable(error: &tera::Error) -> Option<String> {
    MISSING_VARIABLE
        .captures(&error_chain(error))
        .map(|captures| captures[1].to_string())
}

/// tera のエラーは原因が source チェーンに入るため、すべて連結して 1 行にする
fn error_chain(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn template_failed(error: &tera::Error, missing_variables: Vec<String>) -> NotificationError {
    NotificationError::TemplateFailed {
        message: error_chain(error),
        missing_variables,
    }
}

/// 件名と本文のテンプレート失敗を 1 つにまとめる（テンプレート以外の失敗は件名側を優先）
fn merge_template_failures(first: NotificationError, second: NotificationError) -> NotificationError {
    match (first, second) {
        (
            NotificationError::TemplateFailed {
                message: first_message,
                missing_variables: mut missing,
            },
            NotificationError::TemplateFailed {
                message: second_message,
                missing_variables: second_missing,
            },
        ) => {
            for variable in second_missing {
                if !missing.contains(&variable) {
                    missing.push(variable);
                }
            }
            NotificationError::TemplateFailed {
                message:           format!("{first_message}; {second_message}"),
                missing_variables: missing,
            }
        }
        (NotificationError::TemplateFailed { .. }, other) => other,
        (first, _) => first,
    }
}

#[cfg(test)]
mod tests {
    use notiflow_domain::notification::NotificationTypeName;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    const WELCOME: &str = r#"{% extends "notify_base.html" %}
{% block content %}<p>Hello {{ fullname }}, welcome to {{ site }}.</p>{% endblock content %}"#;

    fn make_renderer() -> TemplateRenderer {
        TemplateRenderer::new().unwrap()
    }

    #[test]
    fn newが正常に初期化される() {
        assert!(TemplateRenderer::new().is_ok());
    }

    #[test]
    fn 基底レイアウトを継承してレンダリングできる() {
        let html = make_renderer()
            .render(
                WELCOME,
                &json!({"fullname": "Ada", "site": "Notiflow"}),
                RenderPolicy::Strict,
            )
            .unwrap();

        assert!(html.contains("<!DOCTYPE html>"));
        assert!(html.contains("<p>Hello Ada, welcome to Notiflow.</p>"));
        assert!(!html.contains("Unsubscribe"));
    }

    #[test]
    fn 任意の変数は定義されている場合だけ表示される() {
        let html = make_renderer()
            .render(
                WELCOME,
                &json!({
                    "fullname": "Ada",
                    "site": "Notiflow",
                    "unsubscribe_url": "https://notiflow.example.com/unsubscribe",
                }),
                RenderPolicy::Strict,
            )
            .unwrap();

        assert!(html.contains(r#"<a href="https:&#x2F;&#x2F;notiflow.example.com&#x2F;unsubscribe">"#));
    }

    #[test]
    fn 変数の値はエスケープされる() {
        let html = make_renderer()
            .render(
                "<p>{{ title }}</p>",
                &json!({"title": "<b>Tom & Jerry</b>"}),
                RenderPolicy::Strict,
            )
            .unwrap();

        assert_eq!(html, "<p>&lt;b&gt;Tom &amp; Jerry&lt;&#x2F;b&gt;</p>");
    }

    #[test]
    fn 同じ入力は同じ出力になる() {
        let renderer = make_renderer();
        let context = json!({"fullname": "Ada", "site": "Notiflow"});

        let first = renderer.render(WELCOME, &context, RenderPolicy::Strict).unwrap();
        let second = renderer.render(WELCOME, &context, RenderPolicy::Strict).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn 同じテンプレートは一度だけ登録される() {
        let renderer = make_renderer();
        let context = json!({"fullname": "Ada", "site": "Notiflow"});

        renderer.render(WELCOME, &context, RenderPolicy::Strict).unwrap();
        renderer.render(WELCOME, &context, RenderPolicy::Strict).unwrap();

        let count = renderer
            .engine
            .read()
            .unwrap()
            .get_template_names()
            .filter(|name| name.starts_with("virtual/"))
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn strictでは未定義の変数をすべて報告する() {
        let result = make_renderer().render(WELCOME, &json!({}), RenderPolicy::Strict);

        match result {
            Err(NotificationError::TemplateFailed {
                missing_variables, ..
            }) => assert_eq!(missing_variables, vec!["fullname", "site"]),
            other => panic!("TemplateFailed を期待したが {other:?} だった"),
        }
    }

    #[test]
    fn lenientでは失敗時にテンプレートをそのまま返す() {
        let html = make_renderer()
            .render(WELCOME, &json!({}), RenderPolicy::Lenient)
            .unwrap();

        assert_eq!(html, WELCOME);
    }

    #[test]
    fn 構文エラーはstrictでエラーになる() {
        let result = make_renderer().render("{% if %}", &json!({}), RenderPolicy::Strict);

        assert!(matches!(
            result,
            Err(NotificationError::TemplateFailed { .. })
        ));
    }

    #[test]
    fn composeは件名と本文とテキストを揃える() {
        let notification_type = NotificationType::new(
            NotificationTypeName::UserContributorAdded,
            Some("{referrer} added you as a contributor".to_string()),
            "<p>{{ referrer }} added you to <b>{{ project }}</b>.</p>",
        );
        let email_context = EmailContext {
            cc: vec!["cc@example.com".to_string()],
            categories: vec!["contributor".to_string()],
            ..Default::default()
        };

        let email = make_renderer()
            .compose(
                &notification_type,
                vec!["user@example.com".to_string()],
                &json!({"referrer": "Ada", "project": "Analytical Engine"}),
                Some(&email_context),
                RenderPolicy::Strict,
            )
            .unwrap();

        assert_eq!(email.subject, "Ada added you as a contributor");
        assert_eq!(
            email.html_body,
            "<p>Ada added you to <b>Analytical Engine</b>.</p>"
        );
        assert_eq!(email.text_body, "Ada added you to Analytical Engine.");
        assert_eq!(email.to, vec!["user@example.com"]);
        assert_eq!(email.cc, vec!["cc@example.com"]);
        assert_eq!(email.categories, vec!["contributor"]);
        assert_eq!(email.notification_type, NotificationTypeName::UserContributorAdded);
    }

    #[test]
    fn 件名テンプレートがなければ汎用の件名になる() {
        let notification_type =
            NotificationType::new(NotificationTypeName::PreprintWithdrawn, None, "<p>done</p>");

        let email = make_renderer()
            .compose(
                &notification_type,
                vec!["user@example.com".to_string()],
                &json!({}),
                None,
                RenderPolicy::Strict,
            )
            .unwrap();

        assert_eq!(email.subject, "Notification: preprint_withdrawn");
        assert!(email.attachment.is_none());
    }

    #[test]
    fn composeは件名と本文の不足変数をまとめて報告する() {
        let notification_type = NotificationType::new(
            NotificationTypeName::UserFileUpdated,
            Some("New {topic}".to_string()),
            "<p>{{ body_var }} was updated.</p>",
        );

        let result = make_renderer().compose(
            &notification_type,
            vec!["user@example.com".to_string()],
            &json!({}),
            None,
            RenderPolicy::Strict,
        );

        match result {
            Err(NotificationError::TemplateFailed {
                missing_variables, ..
            }) => assert_eq!(missing_variables, vec!["topic", "body_var"]),
            other => panic!("TemplateFailed を期待したが {other:?} だった"),
        }
    }
}
