//! # 通知種別キャッシュ
//!
//! 通知種別はマイグレーションで作られ、実行中に変わらない。
//! そのため種別ごとに最初の 1 回だけリポジトリを引き、以降はプロセス内で使い回す。
//!
//! ## 設計方針
//!
//! - **種別ごとの `OnceCell`**: `NotificationTypeName` の全メンバー分のセルを生成時に作る。
//!   同じ種別への最初の呼び出しが並行しても、問い合わせは 1 回に収束する
//! - **削除しない**: キャッシュは破棄されず、`warm_up` で起動時に埋めておける
//! - **見つからない種別はキャッシュしない**: 後からシードされた場合に拾えるようにする

use std::{collections::HashMap, sync::Arc};

use notiflow_domain::notification::{NotificationError, NotificationType, NotificationTypeName};
use notiflow_infra::repository::NotificationTypeRepository;
use strum::IntoEnumIterator;
use tokio::sync::OnceCell;

/// 通知種別のメモ化アクセサ
pub struct NotificationTypeCache {
    repository: Arc<dyn NotificationTypeRepository>,
    cells:      HashMap<NotificationTypeName, OnceCell<Arc<NotificationType>>>,
}

impl NotificationTypeCache {
    pub fn new(repository: Arc<dyn NotificationTypeRepository>) -> Self {
        let cells = NotificationTypeName::iter()
            .map(|name| (name, OnceCell::new()))
            .collect();

        Self { repository, cells }
    }

    /// 通知種別を取得する
    ///
    /// 種別ごとに最初の呼び出しでのみリポジトリを問い合わせる。
    pub async fn get(
        &self,
        name: NotificationTypeName,
    ) -> Result<Arc<NotificationType>, NotificationError> {
        let cell = self
            .cells
            .get(&name)
            .ok_or_else(|| NotificationError::UnknownNotificationType(name.to_string()))?;

        let notification_type = cell
            .get_or_try_init(|| async {
                let found = self.repository.find_by_name(name).await?;
                tracing::debug!(notification_type = %name, found = found.is_some(), "通知種別を読み込み");
                found
                    .map(Arc::new)
                    .ok_or_else(|| NotificationError::UnknownNotificationType(name.to_string()))
            })
            .await?;

        Ok(Arc::clone(notification_type))
    }

    /// すべての通知種別を読み込み、読み込めた件数を返す
    ///
    /// 未登録の種別は警告を出して読み飛ばす。
    pub async fn warm_up(&self) -> Result<usize, NotificationError> {
        let mut loaded = 0;

        for name in NotificationTypeName::iter() {
            match self.get(name).await {
                Ok(_) => loaded += 1,
                Err(NotificationError::UnknownNotificationType(_)) => {
                    tracing::warn!(notification_type = %name, "通知種別が登録されていません");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(loaded, "通知種別キャッシュを初期化しました");
        Ok(loaded)
    }
}
