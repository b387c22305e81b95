//! # NotificationRepository
//!
//! ダイジェスト通知（未送信キュー）の永続化を担当するリポジトリ。
//!
//! `sent IS NULL` の行が未送信キューを構成する。キューの消化（まとめて送信し
//! `mark_sent` する）は定期バッチの責務で、このクレートは提供しない。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    notification::{Notification, NotificationId, NotificationSubscriptionId},
    user::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// ダイジェスト通知リポジトリトレイト
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 通知を挿入する
    async fn insert(&self, notification: &Notification) -> Result<(), InfraError>;

    /// ユーザーの未送信通知を古い順に取得する
    async fn find_pending_by_user(&self, user_id: &UserId)
    -> Result<Vec<Notification>, InfraError>;

    /// 通知を送信済みにし、更新件数を返す
    async fn mark_sent(
        &self,
        ids: &[NotificationId],
        sent: DateTime<Utc>,
    ) -> Result<u64, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id:              Uuid,
    subscription_id: Uuid,
    event_context:   serde_json::Value,
    created:         DateTime<Utc>,
    sent:            Option<DateTime<Utc>>,
    seen:            Option<DateTime<Utc>>,
}

impl From<NotificationRow> for Notification {
    fn from(row: NotificationRow) -> Self {
        Notification::from_db(
            NotificationId::from_uuid(row.id),
            NotificationSubscriptionId::from_uuid(row.subscription_id),
            row.event_context,
            row.created,
            row.sent,
            row.seen,
        )
    }
}

/// PostgreSQL 実装の NotificationRepository
#[derive(Debug, Clone)]
pub struct PostgresNotificationRepository {
    pool: PgPool,
}

impl PostgresNotificationRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    #[tracing::instrument(skip_all, level = "debug")]
    async fn insert(&self, notification: &Notification) -> Result<(), InfraError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, subscription_id, event_context, created, sent, seen)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.id().as_uuid())
        .bind(notification.subscription_id().as_uuid())
        .bind(notification.event_context())
        .bind(notification.created())
        .bind(notification.sent())
        .bind(notification.seen())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%user_id))]
    async fn find_pending_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Notification>, InfraError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT n.id, n.subscription_id, n.event_context, n.created, n.sent, n.seen
            FROM notifications n
            JOIN notification_subscriptions s ON s.id = n.subscription_id
            WHERE s.user_id = $1 AND n.sent IS NULL
            ORDER BY n.created ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Notification::from).collect())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(count = ids.len()))]
    async fn mark_sent(
        &self,
        ids: &[NotificationId],
        sent: DateTime<Utc>,
    ) -> Result<u64, InfraError> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET sent = $2
            WHERE id = ANY($1) AND sent IS NULL
            "#,
        )
        .bind(&uuids)
        .bind(sent)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresNotificationRepository>();
    }

    #[test]
    fn 未送信の行は未送信の通知になる() {
        let row = NotificationRow {
            id:              Uuid::now_v7(),
            subscription_id: Uuid::now_v7(),
            event_context:   json!({"file": "data.csv"}),
            created:         Utc::now(),
            sent:            None,
            seen:            None,
        };

        let notification = Notification::from(row);
        assert!(notification.is_pending());
        assert_eq!(notification.event_context()["file"], "data.csv");
    }
}
