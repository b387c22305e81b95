//! # 件名の埋め込み
//!
//! 通知種別の件名テンプレート（`"Hello {name}"` 形式）にコンテキストの値を埋め込む。
//!
//! - `{name}` はコンテキストのキー、`{user.name}` はネストしたオブジェクトを辿る
//! - `{{` / `}}` はリテラルの波括弧
//! - 文字列値はそのまま、それ以外の JSON 値は JSON 表記で埋め込む
//! - `{name:>10}` のような書式指定は読み飛ばす

use notiflow_domain::notification::NotificationError;
use notiflow_shared::event_log;
use serde_json::Value;

use super::RenderPolicy;

/// 件名テンプレートにコンテキストを埋め込む
///
/// `Strict` では未定義のキーや閉じていない波括弧をエラーにする。
/// `Lenient` ではエラーをログに出し、件名テンプレートをそのまま返す。
pub fn interpolate_subject(
    subject_template: &str,
    context: &Value,
    policy: RenderPolicy,
) -> Result<String, NotificationError> {
    match interpolate(subject_template, context) {
        Ok(subject) => Ok(subject),
        Err(error) => match policy {
            RenderPolicy::Strict => Err(error),
            RenderPolicy::Lenient => {
                tracing::error!(
                    error.category = event_log::error::category::APPLICATION,
                    error.kind = event_log::error::kind::TEMPLATE,
                    error = %error,
                    subject_template,
                    "件名の埋め込みに失敗したため、テンプレートをそのまま使用します"
                );
                Ok(subject_template.to_string())
            }
        },
    }
}

fn interpolate(template: &str, context: &Value) -> Result<String, NotificationError> {
    let mut output = String::with_capacity(template.len());
    let mut missing_variables = Vec::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                output.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                output.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(malformed(template, "'{' が閉じられていません"));
                }

                let name = field
                    .split([':', '!'])
                    .next()
                    .unwrap_or_default()
                    .trim();
                if name.is_empty() {
                    return Err(malformed(template, "'{}' にキー名がありません"));
                }

                match lookup(context, name) {
                    Some(Value::String(s)) => output.push_str(s),
                    Some(value) => output.push_str(&value.to_string()),
                    None => missing_variables.push(name.to_string()),
                }
            }
            '}' => return Err(malformed(template, "対応する '{' のない '}' があります")),
            c => output.push(c),
        }
    }

    if !missing_variables.is_empty() {
        return Err(NotificationError::TemplateFailed {
            message: format!("件名 {template:?} のキーがコンテキストにありません"),
            missing_variables,
        });
    }

    Ok(output)
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(context, |value, key| value.as_object()?.get(key))
}

fn malformed(template: &str, reason: &str) -> NotificationError {
    NotificationError::TemplateFailed {
        message:           format!("件名 {template:?} の書式が不正: {reason}"),
        missing_variables: Vec::new(),
    }
}
