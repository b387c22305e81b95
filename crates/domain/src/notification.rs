//! # 通知
//!
//! 通知種別・購読・通知キューのドメインモデルを定義する。
//!
//! ## ドメイン用語
//!
//! | 型 | ドメイン用語 | 説明 |
//! |---|------------|------|
//! | [`NotificationTypeName`] | 通知種別名 | 「プレプリント投稿」などの通知の分類 |
//! | [`NotificationType`] | 通知種別 | 件名テンプレートと本文テンプレートを持つ |
//! | [`Frequency`] | 配信頻度 | 即時 / ダイジェスト（日次・週次・月次）/ なし |
//! | [`NotificationSubscription`] | 購読 | (ユーザー, 通知種別) ごとの配信頻度 |
//! | [`Notification`] | ダイジェスト通知 | `sent` が `None` の間は未送信キューに残る |
//!
//! ## 設計方針
//!
//! - **通知種別は読み取り専用**: マイグレーションで作成され、実行時には変更しない
//! - **購読の一意性**: (ユーザー, 通知種別) の組につき購読は 1 件のみ
//! - **ダイジェストは溜めるだけ**: 未送信キューの消化は定期バッチの責務

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use thiserror::Error;

use crate::user::UserId;

define_uuid_id! {
    /// 通知種別 ID
    pub struct NotificationTypeId;
}

define_uuid_id! {
    /// 購読 ID
    pub struct NotificationSubscriptionId;
}

define_uuid_id! {
    /// ダイジェスト通知 ID
    pub struct NotificationId;
}

/// 通知パイプラインのエラー
#[derive(Debug, Error)]
pub enum NotificationError {
    /// メール送信に失敗（SMTP 接続失敗、メッセージ構築失敗など）
    #[error("メール送信に失敗: {0}")]
    SendFailed(String),

    /// 送信バックエンドが未設定
    #[error("送信バックエンドが設定されていません: {0}")]
    NotConfigured(String),

    /// メール送信 API がエラーレスポンスを返した
    #[error("メール送信 API がエラーを返しました（status={status}）: {body}")]
    Api {
        /// HTTP ステータスコード
        status: u16,
        /// レスポンスボディ
        body:   String,
    },

    /// テンプレートレンダリングに失敗
    #[error(
        "テンプレートレンダリングに失敗: {message}（未定義の変数: [{}]）",
        .missing_variables.join(", ")
    )]
    TemplateFailed {
        message:           String,
        /// コンテキストに存在しなかった変数名
        missing_variables: Vec<String>,
    },

    /// 通知種別が登録されていない
    #[error("通知種別が登録されていません: {0}")]
    UnknownNotificationType(String),

    /// 購読・通知・送信タスクの永続化に失敗
    #[error("通知データの永続化に失敗: {0}")]
    Repository(String),
}

/// 通知種別名
///
/// `notification_types.name` カラムに格納される値。snake_case でシリアライズされる。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationTypeName {
    /// パスワードリセット完了
    UserPasswordReset,
    /// メールアドレス確認
    UserConfirmEmail,
    /// パスワード再設定の依頼
    UserForgotPassword,
    /// 未登録ユーザーの招待
    UserInviteDefault,
    /// プロジェクトへのコントリビューター追加
    UserContributorAdded,
    /// 購読中ファイルの更新
    UserFileUpdated,
    /// プレプリントの投稿
    PreprintSubmitted,
    /// プレプリントへのコントリビューター追加
    PreprintContributorAdded,
    /// プレプリントの取り下げ
    PreprintWithdrawn,
    /// レジストレーションの提出
    RegistrationSubmitted,
    /// レジストレーションの承認
    RegistrationApproved,
    /// プロバイダーへの新規審査待ち投稿
    ProviderNewPendingSubmissions,
    /// コレクションへの投稿
    CollectionSubmissionSubmitted,
    /// ノードへのアクセス要求
    NodeRequestAccessSubmitted,
}

impl NotificationTypeName {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// 配信頻度
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Frequency {
    /// 購読しているが配信しない
    None,
    /// 即時送信
    Instantly,
    /// 日次ダイジェスト
    Daily,
    /// 週次ダイジェスト
    Weekly,
    /// 月次ダイジェスト
    Monthly,
}

impl Frequency {
    /// ダイジェスト（キューに溜めて後でまとめて送る）かどうか
    pub fn is_digest(self) -> bool {
        matches!(self, Self::Daily | Self::Weekly | Self::Monthly)
    }
}

/// 通知種別
///
/// 件名テンプレート（`{placeholder}` 形式）と本文テンプレート
/// （`{% extends "notify_base.html" %}` で共通レイアウトを継承できる）を持つ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationType {
    id:                NotificationTypeId,
    name:              NotificationTypeName,
    subject:           Option<String>,
    template:          String,
    default_frequency: Frequency,
    is_digestable:     bool,
}

impl NotificationType {
    /// 即時送信をデフォルトとする通知種別を作成する
    pub fn new(
        name: NotificationTypeName,
        subject: Option<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationTypeId::new(),
            name,
            subject,
            template: template.into(),
            default_frequency: Frequency::Instantly,
            is_digestable: false,
        }
    }

    /// 購読作成時のデフォルト頻度を差し替える
    pub fn with_default_frequency(self, frequency: Frequency) -> Self {
        Self {
            default_frequency: frequency,
            is_digestable: frequency.is_digest() || self.is_digestable,
            ..self
        }
    }

    /// データベースから復元する
    pub fn from_db(
        id: NotificationTypeId,
        name: NotificationTypeName,
        subject: Option<String>,
        template: String,
        default_frequency: Frequency,
        is_digestable: bool,
    ) -> Self {
        Self {
            id,
            name,
            subject,
            template,
            default_frequency,
            is_digestable,
        }
    }

    pub fn id(&self) -> &NotificationTypeId {
        &self.id
    }

    pub fn name(&self) -> NotificationTypeName {
        self.name
    }

    /// 件名テンプレート（未設定なら `None`）
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// 本文テンプレート
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn default_frequency(&self) -> Frequency {
        self.default_frequency
    }

    pub fn is_digestable(&self) -> bool {
        self.is_digestable
    }
}

/// 購読
///
/// # 不変条件
///
/// - (user_id, notification_type_id) の組につき 1 件のみ存在する
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSubscription {
    id:                   NotificationSubscriptionId,
    user_id:              UserId,
    notification_type_id: NotificationTypeId,
    frequency:            Frequency,
    created:              DateTime<Utc>,
}

impl NotificationSubscription {
    pub fn new(
        user_id: UserId,
        notification_type_id: NotificationTypeId,
        frequency: Frequency,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationSubscriptionId::new(),
            user_id,
            notification_type_id,
            frequency,
            created: now,
        }
    }

    /// データベースから復元する
    pub fn from_db(
        id: NotificationSubscriptionId,
        user_id: UserId,
        notification_type_id: NotificationTypeId,
        frequency: Frequency,
        created: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            notification_type_id,
            frequency,
            created,
        }
    }

    pub fn id(&self) -> &NotificationSubscriptionId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn notification_type_id(&self) -> &NotificationTypeId {
        &self.notification_type_id
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

/// ダイジェスト通知
///
/// `sent` が `None` の行が未送信キューを構成する。
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    id:              NotificationId,
    subscription_id: NotificationSubscriptionId,
    event_context:   serde_json::Value,
    created:         DateTime<Utc>,
    sent:            Option<DateTime<Utc>>,
    seen:            Option<DateTime<Utc>>,
}

impl Notification {
    /// 未送信の通知を作成する
    pub fn new_pending(
        subscription_id: NotificationSubscriptionId,
        event_context: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            subscription_id,
            event_context,
            created: now,
            sent: None,
            seen: None,
        }
    }

    /// データベースから復元する
    pub fn from_db(
        id: NotificationId,
        subscription_id: NotificationSubscriptionId,
        event_context: serde_json::Value,
        created: DateTime<Utc>,
        sent: Option<DateTime<Utc>>,
        seen: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            subscription_id,
            event_context,
            created,
            sent,
            seen,
        }
    }

    /// 送信済みにした新しいインスタンスを返す
    pub fn mark_sent(self, now: DateTime<Utc>) -> Self {
        Self {
            sent: Some(now),
            ..self
        }
    }

    pub fn is_pending(&self) -> bool {
        self.sent.is_none()
    }

    pub fn id(&self) -> &NotificationId {
        &self.id
    }

    pub fn subscription_id(&self) -> &NotificationSubscriptionId {
        &self.subscription_id
    }

    pub fn event_context(&self) -> &serde_json::Value {
        &self.event_context
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn sent(&self) -> Option<DateTime<Utc>> {
        self.sent
    }

    pub fn seen(&self) -> Option<DateTime<Utc>> {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn notification_type_nameの文字列変換が正しい() {
        assert_eq!(
            NotificationTypeName::PreprintSubmitted.to_string(),
            "preprint_submitted"
        );
        assert_eq!(
            NotificationTypeName::from_str("provider_new_pending_submissions").unwrap(),
            NotificationTypeName::ProviderNewPendingSubmissions
        );
        assert!(NotificationTypeName::from_str("no_such_type").is_err());
    }

    #[test]
    fn notification_type_nameは全メンバーが往復変換できる() {
        for name in NotificationTypeName::iter() {
            assert_eq!(NotificationTypeName::from_str(name.as_str()).unwrap(), name);
        }
    }

    #[rstest]
    #[case(Frequency::None, false)]
    #[case(Frequency::Instantly, false)]
    #[case(Frequency::Daily, true)]
    #[case(Frequency::Weekly, true)]
    #[case(Frequency::Monthly, true)]
    fn frequencyのダイジェスト判定(#[case] frequency: Frequency, #[case] expected: bool) {
        assert_eq!(frequency.is_digest(), expected);
    }

    #[test]
    fn ダイジェスト頻度を指定するとダイジェスト可能になる() {
        let notification_type =
            NotificationType::new(NotificationTypeName::UserFileUpdated, None, "<p>x</p>")
                .with_default_frequency(Frequency::Daily);

        assert_eq!(notification_type.default_frequency(), Frequency::Daily);
        assert!(notification_type.is_digestable());
    }

    #[test]
    fn 新規通知は未送信でmark_sentで送信済みになる() {
        let now = Utc::now();
        let notification = Notification::new_pending(
            NotificationSubscriptionId::new(),
            json!({"name": "World"}),
            now,
        );
        assert!(notification.is_pending());

        let sent = notification.mark_sent(now);
        assert!(!sent.is_pending());
        assert_eq!(sent.sent(), Some(now));
    }

    #[test]
    fn テンプレートエラーのメッセージに未定義の変数名が含まれる() {
        let error = NotificationError::TemplateFailed {
            message:           "render failed".to_string(),
            missing_variables: vec!["missing_var".to_string(), "other".to_string()],
        };

        assert!(error.to_string().contains("missing_var, other"));
    }
}
