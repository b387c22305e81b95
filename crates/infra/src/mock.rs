//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリモックリポジトリと送信モック。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! notiflow-infra = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! すべてのモックは `Clone` で、クローン同士が同じ状態を共有する。
//! テストではクローンをサービスに渡し、元のインスタンスで状態を検証する。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notiflow_domain::{
    email::{DeliveryOutcome, EmailMessage},
    email_task::{EmailTask, EmailTaskId},
    notification::{
        Notification,
        NotificationError,
        NotificationId,
        NotificationSubscription,
        NotificationType,
        NotificationTypeId,
        NotificationTypeName,
    },
    user::UserId,
};

use crate::{
    error::InfraError,
    notification::NotificationSender,
    repository::{
        EmailTaskRepository,
        NotificationRepository,
        NotificationSubscriptionRepository,
        NotificationTypeRepository,
    },
};

// ===== MockNotificationTypeRepository =====

#[derive(Clone, Default)]
pub struct MockNotificationTypeRepository {
    types:       Arc<Mutex<Vec<NotificationType>>>,
    query_count: Arc<Mutex<usize>>,
}

impl MockNotificationTypeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(types: impl IntoIterator<Item = NotificationType>) -> Self {
        let repo = Self::new();
        for notification_type in types {
            repo.add_type(notification_type);
        }
        repo
    }

    pub fn add_type(&self, notification_type: NotificationType) {
        self.types.lock().unwrap().push(notification_type);
    }

    /// `find_by_name` が呼ばれた回数
    pub fn query_count(&self) -> usize {
        *self.query_count.lock().unwrap()
    }
}

#[async_trait]
impl NotificationTypeRepository for MockNotificationTypeRepository {
    async fn find_by_name(
        &self,
        name: NotificationTypeName,
    ) -> Result<Option<NotificationType>, InfraError> {
        *self.query_count.lock().unwrap() += 1;
        Ok(self
            .types
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.name() == name)
            .cloned())
    }
}

// ===== MockNotificationSubscriptionRepository =====

#[derive(Clone, Default)]
pub struct MockNotificationSubscriptionRepository {
    subscriptions: Arc<Mutex<Vec<NotificationSubscription>>>,
}

impl MockNotificationSubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscription(&self, subscription: NotificationSubscription) {
        self.subscriptions.lock().unwrap().push(subscription);
    }

    pub fn subscriptions(&self) -> Vec<NotificationSubscription> {
        self.subscriptions.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSubscriptionRepository for MockNotificationSubscriptionRepository {
    async fn find(
        &self,
        user_id: &UserId,
        notification_type_id: &NotificationTypeId,
    ) -> Result<Option<NotificationSubscription>, InfraError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.user_id() == user_id && s.notification_type_id() == notification_type_id)
            .cloned())
    }

    async fn get_or_create(
        &self,
        subscription: &NotificationSubscription,
    ) -> Result<NotificationSubscription, InfraError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        if let Some(existing) = subscriptions.iter().find(|s| {
            s.user_id() == subscription.user_id()
                && s.notification_type_id() == subscription.notification_type_id()
        }) {
            return Ok(existing.clone());
        }
        subscriptions.push(subscription.clone());
        Ok(subscription.clone())
    }

    async fn delete(
        &self,
        user_id: &UserId,
        notification_type_id: &NotificationTypeId,
    ) -> Result<bool, InfraError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| {
            !(s.user_id() == user_id && s.notification_type_id() == notification_type_id)
        });
        Ok(subscriptions.len() < before)
    }

    async fn delete_by_user(&self, user_id: &UserId) -> Result<u64, InfraError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.user_id() != user_id);
        Ok((before - subscriptions.len()) as u64)
    }
}

// ===== MockNotificationRepository =====

/// ダイジェスト通知のモック
///
/// `find_pending_by_user` で購読を辿るため、購読モックと状態を共有する。
#[derive(Clone, Default)]
pub struct MockNotificationRepository {
    notifications: Arc<Mutex<Vec<Notification>>>,
    subscriptions: MockNotificationSubscriptionRepository,
}

impl MockNotificationRepository {
    pub fn new(subscriptions: MockNotificationSubscriptionRepository) -> Self {
        Self {
            notifications: Arc::default(),
            subscriptions,
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationRepository for MockNotificationRepository {
    async fn insert(&self, notification: &Notification) -> Result<(), InfraError> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }

    async fn find_pending_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Notification>, InfraError> {
        let subscription_ids: Vec<_> = self
            .subscriptions
            .subscriptions()
            .into_iter()
            .filter(|s| s.user_id() == user_id)
            .map(|s| s.id().clone())
            .collect();

        let mut pending: Vec<_> = self
            .notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.is_pending() && subscription_ids.contains(n.subscription_id()))
            .cloned()
            .collect();
        pending.sort_by_key(Notification::created);
        Ok(pending)
    }

    async fn mark_sent(
        &self,
        ids: &[NotificationId],
        sent: DateTime<Utc>,
    ) -> Result<u64, InfraError> {
        let mut notifications = self.notifications.lock().unwrap();
        let mut updated = 0;
        for notification in notifications.iter_mut() {
            if notification.is_pending() && ids.contains(notification.id()) {
                *notification = notification.clone().mark_sent(sent);
                updated += 1;
            }
        }
        Ok(updated)
    }
}

// ===== MockEmailTaskRepository =====

#[derive(Clone, Default)]
pub struct MockEmailTaskRepository {
    tasks: Arc<Mutex<Vec<EmailTask>>>,
}

impl MockEmailTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<EmailTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTaskRepository for MockEmailTaskRepository {
    async fn insert(&self, task: &EmailTask) -> Result<(), InfraError> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn update(&self, task: &EmailTask) -> Result<(), InfraError> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.iter_mut().find(|t| t.id() == task.id()) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(InfraError::unexpected(format!(
                "送信タスクが存在しません: {}",
                task.id()
            ))),
        }
    }

    async fn find_by_id(&self, id: &EmailTaskId) -> Result<Option<EmailTask>, InfraError> {
        Ok(self.tasks.lock().unwrap().iter().find(|t| t.id() == id).cloned())
    }
}

// ===== MockNotificationSender =====

/// 送信したメールを記録する送信モック
///
/// デフォルトでは常に `Sent` を返す。
#[derive(Clone)]
pub struct MockNotificationSender {
    sent_emails: Arc<Mutex<Vec<EmailMessage>>>,
    response:    Arc<Mutex<Result<DeliveryOutcome, String>>>,
}

impl Default for MockNotificationSender {
    fn default() -> Self {
        Self {
            sent_emails: Arc::default(),
            response:    Arc::new(Mutex::new(Ok(DeliveryOutcome::Sent))),
        }
    }
}

impl MockNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以降の送信で返す配信結果を設定する
    pub fn respond_with(&self, outcome: DeliveryOutcome) {
        *self.response.lock().unwrap() = Ok(outcome);
    }

    /// 以降の送信を `SendFailed` で失敗させる
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.response.lock().unwrap() = Err(message.into());
    }

    pub fn sent_emails(&self) -> Vec<EmailMessage> {
        self.sent_emails.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
    async fn send_email(&self, email: &EmailMessage) -> Result<DeliveryOutcome, NotificationError> {
        self.sent_emails.lock().unwrap().push(email.clone());
        self.response
            .lock()
            .unwrap()
            .clone()
            .map_err(NotificationError::SendFailed)
    }
}
