//! # 送信タスク
//!
//! 即時送信 1 回分の試行を記録するエンティティ。
//!
//! ## 状態遷移
//!
//! ```text
//! Pending ──start()──→ Started ──succeed()──→ Success
//!                         └─────fail()──────→ Failure
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{DomainError, notification::NotificationTypeName, user::UserId};

define_uuid_id! {
    /// 送信タスク ID
    pub struct EmailTaskId;
}

/// 送信タスクの状態
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
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailTaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl EmailTaskStatus {
    /// 完了状態（これ以上遷移しない）かどうか
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// 送信タスク
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTask {
    id:                EmailTaskId,
    user_id:           Option<UserId>,
    notification_type: NotificationTypeName,
    status:            EmailTaskStatus,
    error_message:     Option<String>,
    created:           DateTime<Utc>,
    updated:           DateTime<Utc>,
}

impl EmailTask {
    /// `Pending` 状態の送信タスクを作成する
    pub fn new(
        user_id: Option<UserId>,
        notification_type: NotificationTypeName,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EmailTaskId::new(),
            user_id,
            notification_type,
            status: EmailTaskStatus::Pending,
            error_message: None,
            created: now,
            updated: now,
        }
    }

    /// データベースから復元する
    pub fn from_db(
        id: EmailTaskId,
        user_id: Option<UserId>,
        notification_type: NotificationTypeName,
        status: EmailTaskStatus,
        error_message: Option<String>,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            notification_type,
            status,
            error_message,
            created,
            updated,
        }
    }

    /// ワーカーが処理を開始した
    pub fn start(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != EmailTaskStatus::Pending {
            return Err(self.invalid_transition(EmailTaskStatus::Started));
        }
        Ok(Self {
            status: EmailTaskStatus::Started,
            updated: now,
            ..self
        })
    }

    /// 送信に成功した
    pub fn succeed(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status != EmailTaskStatus::Started {
            return Err(self.invalid_transition(EmailTaskStatus::Success));
        }
        Ok(Self {
            status: EmailTaskStatus::Success,
            updated: now,
            ..self
        })
    }

    /// 送信に失敗した
    pub fn fail(self, error_message: impl Into<String>, now: DateTime<Utc>) -> Result<Self, DomainError> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(EmailTaskStatus::Failure));
        }
        Ok(Self {
            status: EmailTaskStatus::Failure,
            error_message: Some(error_message.into()),
            updated: now,
            ..self
        })
    }

    fn invalid_transition(&self, to: EmailTaskStatus) -> DomainError {
        DomainError::InvalidTransition {
            entity: "送信タスク",
            from:   self.status.to_string(),
            to:     to.to_string(),
        }
    }

    pub fn id(&self) -> &EmailTaskId {
        &self.id
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn notification_type(&self) -> NotificationTypeName {
        self.notification_type
    }

    pub fn status(&self) -> EmailTaskStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn pending_task() -> EmailTask {
        EmailTask::new(
            Some(UserId::new()),
            NotificationTypeName::UserPasswordReset,
            Utc::now(),
        )
    }

    #[test]
    fn 状態はscreaming_snake_caseで保存される() {
        assert_eq!(EmailTaskStatus::Pending.to_string(), "PENDING");
        assert_eq!(
            EmailTaskStatus::from_str("SUCCESS").unwrap(),
            EmailTaskStatus::Success
        );
    }

    #[test]
    fn pendingからstartedを経てsuccessに遷移する() {
        let now = Utc::now();
        let task = pending_task().start(now).unwrap().succeed(now).unwrap();

        assert_eq!(task.status(), EmailTaskStatus::Success);
        assert!(task.error_message().is_none());
    }

    #[test]
    fn 失敗時はエラーメッセージを保持する() {
        let now = Utc::now();
        let task = pending_task()
            .start(now)
            .unwrap()
            .fail("SMTP connection refused", now)
            .unwrap();

        assert_eq!(task.status(), EmailTaskStatus::Failure);
        assert_eq!(task.error_message(), Some("SMTP connection refused"));
    }

    #[test]
    fn pendingから直接successには遷移できない() {
        assert!(pending_task().succeed(Utc::now()).is_err());
    }

    #[test]
    fn 完了したタスクは失敗に遷移できない() {
        let now = Utc::now();
        let task = pending_task().start(now).unwrap().succeed(now).unwrap();

        assert!(task.fail("late failure", now).is_err());
    }
}
