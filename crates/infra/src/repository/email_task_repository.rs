//! # EmailTaskRepository
//!
//! 即時送信の試行記録（送信タスク）を永続化するリポジトリ。

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    email_task::{EmailTask, EmailTaskId, EmailTaskStatus},
    notification::NotificationTypeName,
    user::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 送信タスクリポジトリトレイト
#[async_trait]
pub trait EmailTaskRepository: Send + Sync {
    /// 送信タスクを挿入する
    async fn insert(&self, task: &EmailTask) -> Result<(), InfraError>;

    /// 状態・エラーメッセージ・更新日時を保存する
    async fn update(&self, task: &EmailTask) -> Result<(), InfraError>;

    /// ID で送信タスクを取得する
    async fn find_by_id(&self, id: &EmailTaskId) -> Result<Option<EmailTask>, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct EmailTaskRow {
    id:                Uuid,
    user_id:           Option<Uuid>,
    notification_type: String,
    status:            String,
    error_message:     Option<String>,
    created:           DateTime<Utc>,
    updated:           DateTime<Utc>,
}

impl TryFrom<EmailTaskRow> for EmailTask {
    type Error = InfraError;

    fn try_from(row: EmailTaskRow) -> Result<Self, Self::Error> {
        let notification_type = NotificationTypeName::from_str(&row.notification_type)
            .map_err(|_| {
                InfraError::invalid_data(format!("notification_type={}", row.notification_type))
            })?;
        let status = EmailTaskStatus::from_str(&row.status)
            .map_err(|_| InfraError::invalid_data(format!("status={}", row.status)))?;

        Ok(EmailTask::from_db(
            EmailTaskId::from_uuid(row.id),
            row.user_id.map(UserId::from_uuid),
            notification_type,
            status,
            row.error_message,
            row.created,
            row.updated,
        ))
    }
}

/// PostgreSQL 実装の EmailTaskRepository
#[derive(Debug, Clone)]
pub struct PostgresEmailTaskRepository {
    pool: PgPool,
}

impl PostgresEmailTaskRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailTaskRepository for PostgresEmailTaskRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(task_id = %task.id()))]
    async fn insert(&self, task: &EmailTask) -> Result<(), InfraError> {
        let notification_type: &str = task.notification_type().into();
        let status: &str = task.status().into();

        sqlx::query(
            r#"
            INSERT INTO email_tasks (
                id, user_id, notification_type, status, error_message, created, updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id().as_uuid())
        .bind(task.user_id().map(|id| *id.as_uuid()))
        .bind(notification_type)
        .bind(status)
        .bind(task.error_message())
        .bind(task.created())
        .bind(task.updated())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(task_id = %task.id()))]
    async fn update(&self, task: &EmailTask) -> Result<(), InfraError> {
        let status: &str = task.status().into();

        sqlx::query(
            r#"
            UPDATE email_tasks
            SET status = $2, error_message = $3, updated = $4
            WHERE id = $1
            "#,
        )
        .bind(task.id().as_uuid())
        .bind(status)
        .bind(task.error_message())
        .bind(task.updated())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(task_id = %id))]
    async fn find_by_id(&self, id: &EmailTaskId) -> Result<Option<EmailTask>, InfraError> {
        let row = sqlx::query_as::<_, EmailTaskRow>(
            r#"
            SELECT id, user_id, notification_type, status, error_message, created, updated
            FROM email_tasks
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EmailTask::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresEmailTaskRepository>();
    }

    #[test]
    fn 行から送信タスクに変換できる() {
        let now = Utc::now();
        let row = EmailTaskRow {
            id:                Uuid::now_v7(),
            user_id:           None,
            notification_type: "user_password_reset".to_string(),
            status:            "FAILURE".to_string(),
            error_message:     Some("timeout".to_string()),
            created:           now,
            updated:           now,
        };

        let task = EmailTask::try_from(row).unwrap();
        assert_eq!(task.status(), EmailTaskStatus::Failure);
        assert!(task.user_id().is_none());
    }
}
