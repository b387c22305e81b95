//! # NotificationTypeRepository
//!
//! 通知種別マスタの読み取りを担当するリポジトリ。
//!
//! 通知種別は実行時に変更されないため、呼び出し側（通知種別キャッシュ）が
//! 種別ごとに 1 回だけ `find_by_name` を呼ぶ前提で設計している。

use std::str::FromStr;

use async_trait::async_trait;
use notiflow_domain::notification::{
    Frequency,
    NotificationType,
    NotificationTypeId,
    NotificationTypeName,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 通知種別リポジトリトレイト
#[async_trait]
pub trait NotificationTypeRepository: Send + Sync {
    /// 名前で通知種別を検索する
    async fn find_by_name(
        &self,
        name: NotificationTypeName,
    ) -> Result<Option<NotificationType>, InfraError>;
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationTypeRow {
    id:                Uuid,
    name:              String,
    subject:           Option<String>,
    template:          String,
    default_frequency: String,
    is_digestable:     bool,
}

impl TryFrom<NotificationTypeRow> for NotificationType {
    type Error = InfraError;

    fn try_from(row: NotificationTypeRow) -> Result<Self, Self::Error> {
        let name = NotificationTypeName::from_str(&row.name)
            .map_err(|_| InfraError::invalid_data(format!("name={}", row.name)))?;
        let default_frequency = Frequency::from_str(&row.default_frequency).map_err(|_| {
            InfraError::invalid_data(format!("default_frequency={}", row.default_frequency))
        })?;

        Ok(NotificationType::from_db(
            NotificationTypeId::from_uuid(row.id),
            name,
            row.subject,
            row.template,
            default_frequency,
            row.is_digestable,
        ))
    }
}

/// PostgreSQL 実装の NotificationTypeRepository
#[derive(Debug, Clone)]
pub struct PostgresNotificationTypeRepository {
    pool: PgPool,
}

impl PostgresNotificationTypeRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationTypeRepository for PostgresNotificationTypeRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(notification_type = %name))]
    async fn find_by_name(
        &self,
        name: NotificationTypeName,
    ) -> Result<Option<NotificationType>, InfraError> {
        let row = sqlx::query_as::<_, NotificationTypeRow>(
            r#"
            SELECT id, name, subject, template, default_frequency, is_digestable
            FROM notification_types
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(NotificationType::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn トレイトはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PostgresNotificationTypeRepository>();
    }

    #[test]
    fn 行から通知種別に変換できる() {
        let row = NotificationTypeRow {
            id:                Uuid::now_v7(),
            name:              "user_file_updated".to_string(),
            subject:           Some("{file} was updated".to_string()),
            template:          "<p>{{ file }}</p>".to_string(),
            default_frequency: "daily".to_string(),
            is_digestable:     true,
        };

        let notification_type = NotificationType::try_from(row).unwrap();

        assert_eq!(notification_type.name(), NotificationTypeName::UserFileUpdated);
        assert_eq!(notification_type.default_frequency(), Frequency::Daily);
        assert_eq!(notification_type.subject(), Some("{file} was updated"));
    }

    #[test]
    fn 未知の頻度はinvalid_dataになる() {
        let row = NotificationTypeRow {
            id:                Uuid::now_v7(),
            name:              "user_file_updated".to_string(),
            subject:           None,
            template:          String::new(),
            default_frequency: "hourly".to_string(),
            is_digestable:     false,
        };

        let err = NotificationType::try_from(row).unwrap_err();
        assert!(err.to_string().contains("hourly"));
    }
}
