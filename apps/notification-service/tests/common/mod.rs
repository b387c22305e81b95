//! 統合テスト共通のセットアップ
//!
//! リポジトリはすべてインメモリのモックを使う。

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use notiflow_domain::{
    clock::FixedClock,
    notification::NotificationType,
    user::{Email, User, UserId},
};
use notiflow_infra::{
    NotificationSender,
    mock::{
        MockEmailTaskRepository,
        MockNotificationRepository,
        MockNotificationSubscriptionRepository,
        MockNotificationTypeRepository,
    },
};
use notiflow_notification_service::usecase::notification::{
    NotificationRepositories,
    NotificationService,
    NotificationTypeCache,
    TemplateRenderer,
};

pub struct TestSetup {
    pub types:         MockNotificationTypeRepository,
    pub subscriptions: MockNotificationSubscriptionRepository,
    pub notifications: MockNotificationRepository,
    pub email_tasks:   MockEmailTaskRepository,
    pub cache:         Arc<NotificationTypeCache>,
    pub renderer:      Arc<TemplateRenderer>,
}

impl TestSetup {
    pub fn new(types: impl IntoIterator<Item = NotificationType>) -> Self {
        let types = MockNotificationTypeRepository::with_types(types);
        let subscriptions = MockNotificationSubscriptionRepository::new();

        Self {
            cache: Arc::new(NotificationTypeCache::new(Arc::new(types.clone()))),
            renderer: Arc::new(TemplateRenderer::new().unwrap()),
            notifications: MockNotificationRepository::new(subscriptions.clone()),
            email_tasks: MockEmailTaskRepository::new(),
            subscriptions,
            types,
        }
    }

    pub fn service(&self, sender: Arc<dyn NotificationSender>) -> NotificationService {
        NotificationService::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.renderer),
            sender,
            NotificationRepositories {
                subscriptions: Arc::new(self.subscriptions.clone()),
                notifications: Arc::new(self.notifications.clone()),
                email_tasks:   Arc::new(self.email_tasks.clone()),
            },
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap(),
            )),
        )
    }
}

pub fn test_user(address: &str) -> User {
    User::new(UserId::new(), Email::new(address).unwrap(), "Test User")
}
