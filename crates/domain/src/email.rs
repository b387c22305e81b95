//! # メール
//!
//! テンプレートレンダリングの出力（[`EmailMessage`]）と、
//! 送信バックエンドが返す配信結果（[`DeliveryOutcome`]）を定義する。

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::notification::NotificationTypeName;

/// 添付ファイル
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAttachment {
    /// ファイル名（拡張子から Content-Type を推定する）
    pub name:    String,
    /// ファイル内容
    pub content: Vec<u8>,
}

/// 呼び出し側が 1 回の emit ごとに指定する配信オプション
///
/// 添付ファイルは `attachment_name` と `attachment_content` の両方が
/// 指定された場合にのみ使用される。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailContext {
    #[serde(default)]
    pub cc:                 Vec<String>,
    #[serde(default)]
    pub bcc:                Vec<String>,
    pub reply_to:           Option<String>,
    #[serde(default)]
    pub categories:         Vec<String>,
    pub attachment_name:    Option<String>,
    pub attachment_content: Option<Vec<u8>>,
}

impl EmailContext {
    /// 名前と内容の両方が揃っている場合のみ添付ファイルを返す
    pub fn attachment(&self) -> Option<EmailAttachment> {
        match (&self.attachment_name, &self.attachment_content) {
            (Some(name), Some(content)) => Some(EmailAttachment {
                name:    name.clone(),
                content: content.clone(),
            }),
            _ => None,
        }
    }
}

/// メールメッセージ
///
/// テンプレートレンダリングの出力。`NotificationSender` に渡される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// 送信元の通知種別
    pub notification_type: NotificationTypeName,
    /// 送信先メールアドレス
    pub to:                Vec<String>,
    pub cc:                Vec<String>,
    pub bcc:               Vec<String>,
    pub reply_to:          Option<String>,
    /// 件名
    pub subject:           String,
    /// HTML 本文
    pub html_body:         String,
    /// プレーンテキスト本文
    pub text_body:         String,
    /// 配信 API に渡す分類タグ
    pub categories:        Vec<String>,
    pub attachment:        Option<EmailAttachment>,
}

/// 送信前チェックで送信を見送った理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    /// 正規化後の宛先が空
    NoRecipients,
    /// API キーが未設定
    MissingApiKey,
    /// 送信元アドレスが未設定
    MissingFromAddress,
    /// ホワイトリストモードで許可されていない宛先が含まれる
    NotWhitelisted,
}

/// 配信結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 送信した
    Sent,
    /// メッセージは構築したが、環境設定により送信を抑止した（CI など）
    Suppressed,
    /// 送信前チェックで見送った（エラーではない）
    Rejected(RejectReason),
}

impl DeliveryOutcome {
    pub fn is_sent(self) -> bool {
        matches!(self, Self::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn 添付ファイルは名前と内容が揃った場合のみ返る() {
        let only_name = EmailContext {
            attachment_name: Some("report.pdf".to_string()),
            ..Default::default()
        };
        assert_eq!(only_name.attachment(), None);

        let both = EmailContext {
            attachment_name: Some("report.pdf".to_string()),
            attachment_content: Some(b"%PDF".to_vec()),
            ..Default::default()
        };
        assert_eq!(
            both.attachment(),
            Some(EmailAttachment {
                name:    "report.pdf".to_string(),
                content: b"%PDF".to_vec(),
            })
        );
    }

    #[test]
    fn reject_reasonはsnake_caseで表示される() {
        assert_eq!(RejectReason::NotWhitelisted.to_string(), "not_whitelisted");
        assert!(!DeliveryOutcome::Rejected(RejectReason::NoRecipients).is_sent());
        assert!(DeliveryOutcome::Sent.is_sent());
    }
}
