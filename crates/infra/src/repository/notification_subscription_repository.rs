//! # NotificationSubscriptionRepository
//!
//! (ユーザー, 通知種別) ごとの購読を永続化するリポジトリ。
//!
//! ## 設計方針
//!
//! - **一意性は DB で保証**: `UNIQUE (user_id, notification_type_id)` 制約と
//!   `ON CONFLICT DO NOTHING` により、同時に作成されても購読は 1 件に収束する
//! - **削除はユーザー単位**: 購読解除または退会時に呼ばれる

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    notification::{
        Frequency,
        NotificationSubscription,
        NotificationSubscriptionId,
        NotificationTypeId,
    },
    user::UserId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 購読リポジトリトレイト
#[async_trait]
pub trait NotificationSubscriptionRepository: Send + Sync {
    /// (ユーザー, 通知種別) の購読を取得する
    async fn find(
        &self,
        user_id: &UserId,
        notification_type_id: &NotificationTypeId,
    ) -> Result<Option<NotificationSubscription>, InfraError>;

    /// 購読を取得し、存在しなければ `subscription` を挿入して返す
    ///
    /// 既存の購読がある場合は `subscription` の値は使われない。
    async fn get_or_create(
        &self,
        subscription: &NotificationSubscription,
    ) -> Result<NotificationSubscription, InfraError>;

    /// 購読を解除する。削除した場合は `true`
    async fn delete(
        &self,
        user_id: &UserId,
        notification_type_id: &NotificationTypeId,
    ) -> Result<bool, InfraError>;

    /// ユーザーのすべての購読を削除し、削除件数を返す
    async fn delete_by_user(&self, user_id: &UserId) -> Result<u64, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id:                   Uuid,
    user_id:              Uuid,
    notification_type_id: Uuid,
    frequency:            String,
    created:              DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for NotificationSubscription {
    type Error = InfraError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let frequency = Frequency::from_str(&row.frequency)
            .map_err(|_| InfraError::invalid_data(format!("frequency={}", row.frequency)))?;

        Ok(NotificationSubscription::from_db(
            NotificationSubscriptionId::from_uuid(row.id),
            UserId::from_uuid(row.user_id),
            NotificationTypeId::from_uuid(row.notification_type_id),
            frequency,
            row.created,
        ))
    }
}

/// PostgreSQL 実装の NotificationSubscriptionRepository
#[derive(Debug, Clone)]
pub struct PostgresNotificationSubscriptionRepository {
    pool: PgPool,
}

impl PostgresNotificationSubscriptionRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSubscriptionRepository for PostgresNotificationSubscriptionRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(%user_id))]
    async fn find(
        &self,
        user_id: &UserId,
        notification_type_id: &NotificationTypeId,
    ) -> Result<Option<NotificationSubscription>, InfraError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT id, user_id, notification_type_id, frequency, created
            FROM notification_subscriptions
            WHERE user_id = $1 AND notification_type_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(notification_type_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(NotificationSubscription::try_from).transpose()
    }

    #[tracing::instrument(skip_all, level = "debug", fields(user_id = %subscription.user_id()))]
    async fn get_or_create(
        &self,
        subscription: &NotificationSubscription,
    ) -> Result<NotificationSubscription, InfraError> {
        let frequency: &str = subscription.frequency().into();

        sqlx::query(
            r#"
            INSERT INTO notification_subscriptions (
                id, user_id, notification_type_id, frequency, created
            )
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, notification_type_id) DO NOTHING
            "#,
        )
        .bind(subscription.id().as_uuid())
        .bind(subscription.user_id().as_uuid())
        .bind(subscription.notification_type_id().as_uuid())
        .bind(frequency)
        .bind(subscription.created())
        .execute(&self.pool)
        .await?;

        self.find(subscription.user_id(), subscription.notification_type_id())
            .await?
            .ok_or_else(|| InfraError::unexpected("挿入直後の購読が見つかりません"))
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%user_id))]
    async fn delete(
        &self,
        user_id: &UserId,
        notification_type_id: &NotificationTypeId,
    ) -> Result<bool, InfraError> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification_subscriptions
            WHERE user_id = $1 AND notification_type_id = $2
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(notification_type_id.as_uuid())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%user_id))]
    async fn delete_by_user(&self, user_id: &UserId) -> Result<u64, InfraError> {
        let result = sqlx::query("DELETE FROM notification_subscriptions WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresNotificationSubscriptionRepository>();
    }

    #[test]
    fn 行から購読に変換できる() {
        let row = SubscriptionRow {
            id:                   Uuid::now_v7(),
            user_id:              Uuid::now_v7(),
            notification_type_id: Uuid::now_v7(),
            frequency:            "weekly".to_string(),
            created:              Utc::now(),
        };

        let subscription = NotificationSubscription::try_from(row).unwrap();
        assert_eq!(subscription.frequency(), Frequency::Weekly);
    }
}
