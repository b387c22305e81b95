//! # 通知サービス
//!
//! 通知の発行（emit）の入口。購読の配信頻度に応じて、即時送信するか、
//! ダイジェスト用の通知キューに積むかを振り分ける。
//!
//! ## 処理の流れ
//!
//! ```text
//! emit(request)
//!  ├─ save = false ──────────────→ レンダリング → 送信（永続化なし）
//!  └─ save = true → 購読を取得/作成
//!        ├─ Instantly ───────────→ 送信タスク作成 → レンダリング → 送信 → タスク更新
//!        ├─ Daily/Weekly/Monthly → 通知キューに 1 件追加（送信しない）
//!        └─ None ────────────────→ 何もしない
//! ```
//!
//! ## 設計方針
//!
//! - **レンダリングは寛容モード**: 本番の送信経路ではテンプレートの不備で送信を止めない
//! - **送信タイミングは注入**: [`DeliveryMode::Inline`] は emit 内で送信し、
//!   [`DeliveryMode::Background`] は `JoinSet` に積んで即座に返す
//! - **見送りはエラーではない**: 送信前チェック不合格は [`EmitOutcome::Rejected`] で返す
//! - **エラーは呼び出し側へ**: Inline では送信失敗もリポジトリ失敗も `Err` で返す。
//!   Background では送信タスクに記録してログに出す

use std::sync::Arc;

use async_trait::async_trait;
use notiflow_domain::{
    DomainError,
    clock::Clock,
    email::{DeliveryOutcome, EmailContext, EmailMessage, RejectReason},
    email_task::EmailTask,
    notification::{
        Frequency,
        Notification,
        NotificationError,
        NotificationSubscription,
        NotificationType,
        NotificationTypeName,
    },
    user::User,
};
use notiflow_infra::{
    notification::NotificationSender,
    repository::{EmailTaskRepository, NotificationRepository, NotificationSubscriptionRepository},
};
use notiflow_shared::{
    event_log::{error, event},
    log_business_event,
};
use serde_json::Value;
use tokio::{sync::Mutex, task::JoinSet};

use super::{NotificationTypeCache, RenderPolicy, TemplateRenderer};

/// emit の入力
#[derive(Debug, Clone, PartialEq)]
pub struct EmitRequest {
    /// 受信者（`username` が宛先アドレス）
    pub user:              User,
    pub notification_type: NotificationTypeName,
    /// テンプレートに渡すコンテキスト（JSON オブジェクト）
    pub event_context:     Value,
    pub email_context:     Option<EmailContext>,
    /// `false` の場合、購読・通知・送信タスクを一切保存せずに送信する
    pub save:              bool,
}

impl EmitRequest {
    /// 保存ありの emit リクエストを作成する
    pub fn new(user: User, notification_type: NotificationTypeName, event_context: Value) -> Self {
        Self {
            user,
            notification_type,
            event_context,
            email_context: None,
            save: true,
        }
    }

    /// 購読に紐づかない単発のシステムメールとして送る
    pub fn without_save(self) -> Self {
        Self {
            save: false,
            ..self
        }
    }

    pub fn with_email_context(self, email_context: EmailContext) -> Self {
        Self {
            email_context: Some(email_context),
            ..self
        }
    }
}

/// emit の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// 送信した
    Sent,
    /// メッセージは構築したが、環境設定により送信を抑止した
    Suppressed,
    /// 送信前チェックで見送った
    Rejected(RejectReason),
    /// バックグラウンド送信に積んだ
    Queued,
    /// ダイジェスト用の通知キューに積んだ
    Digested,
    /// 購読の配信頻度が `None` のため何もしなかった
    Skipped,
}

impl From<DeliveryOutcome> for EmitOutcome {
    fn from(outcome: DeliveryOutcome) -> Self {
        match outcome {
            DeliveryOutcome::Sent => Self::Sent,
            DeliveryOutcome::Suppressed => Self::Suppressed,
            DeliveryOutcome::Rejected(reason) => Self::Rejected(reason),
        }
    }
}

/// 送信のタイミング
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// emit の中で送信を完了させる
    #[default]
    Inline,
    /// 送信を `JoinSet` に積み、emit はすぐに返る
    Background,
}

/// 通知を発行するトレイト
///
/// 業務コードとテストハーネスはこのトレイトに依存する。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn emit(&self, request: EmitRequest) -> Result<EmitOutcome, NotificationError>;
}

/// 通知サービスが使うリポジトリ一式
#[derive(Clone)]
pub struct NotificationRepositories {
    pub subscriptions: Arc<dyn NotificationSubscriptionRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub email_tasks:   Arc<dyn EmailTaskRepository>,
}

/// 通知サービス
pub struct NotificationService {
    types:         Arc<NotificationTypeCache>,
    renderer:      Arc<TemplateRenderer>,
    subscriptions: Arc<dyn NotificationSubscriptionRepository>,
    notifications: Arc<dyn NotificationRepository>,
    dispatcher:    Dispatcher,
    mode:          DeliveryMode,
    background:    Mutex<JoinSet<()>>,
}

impl NotificationService {
    pub fn new(
        types: Arc<NotificationTypeCache>,
        renderer: Arc<TemplateRenderer>,
        sender: Arc<dyn NotificationSender>,
        repositories: NotificationRepositories,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            types,
            renderer,
            subscriptions: repositories.subscriptions,
            notifications: repositories.notifications,
            dispatcher: Dispatcher {
                sender,
                email_tasks: repositories.email_tasks,
                clock,
            },
            mode: DeliveryMode::default(),
            background: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_delivery_mode(self, mode: DeliveryMode) -> Self {
        Self { mode, ..self }
    }

    /// 呼び出し時点でバックグラウンドに積まれている送信がすべて終わるまで待つ
    ///
    /// 待機中はロックを持たないため、並行する emit は新しい送信を積める。
    pub async fn drain(&self) {
        let mut background = std::mem::take(&mut *self.background.lock().await);
        while let Some(result) = background.join_next().await {
            log_join_failure(result);
        }
    }

    /// 完了していないバックグラウンド送信の数（完了済みのものは回収してから数える）
    pub async fn pending_background_sends(&self) -> usize {
        let mut background = self.background.lock().await;
        reap_finished(&mut background);
        background.len()
    }

    /// 宛先 1 人分のメールを組み立てて送信する
    async fn send_now(
        &self,
        notification_type: &NotificationType,
        request: &EmitRequest,
        task: Option<EmailTask>,
    ) -> Result<EmitOutcome, NotificationError> {
        let email = self.renderer.compose(
            notification_type,
            vec![request.user.username().to_string()],
            &request.event_context,
            request.email_context.as_ref(),
            RenderPolicy::Lenient,
        )?;

        match self.mode {
            DeliveryMode::Inline => self.dispatcher.deliver(email, task).await.map(EmitOutcome::from),
            DeliveryMode::Background => {
                let dispatcher = self.dispatcher.clone();
                let mut background = self.background.lock().await;
                reap_finished(&mut background);
                background.spawn(async move {
                    // 失敗は deliver 内でログと送信タスクに記録済み
                    let _ = dispatcher.deliver(email, task).await;
                });
                Ok(EmitOutcome::Queued)
            }
        }
    }

    async fn queue_digest(
        &self,
        request: &EmitRequest,
        subscription: &NotificationSubscription,
    ) -> Result<EmitOutcome, NotificationError> {
        let notification = Notification::new_pending(
            subscription.id().clone(),
            request.event_context.clone(),
            self.dispatcher.clock.now(),
        );
        self.notifications.insert(&notification).await?;

        log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::NOTIFICATION_QUEUED,
            event.entity_type = event::entity_type::NOTIFICATION,
            event.entity_id = %notification.id(),
            event.actor_id = %request.user.id(),
            event.result = event::result::SUCCESS,
            notification.type_name = %request.notification_type,
            notification.frequency = %subscription.frequency(),
            "ダイジェスト通知をキューに追加"
        );

        Ok(EmitOutcome::Digested)
    }
}

#[async_trait]
impl Notifier for NotificationService {
    #[tracing::instrument(
        skip_all,
        fields(notification_type = %request.notification_type, user_id = %request.user.id(), save = request.save)
    )]
    async fn emit(&self, request: EmitRequest) -> Result<EmitOutcome, NotificationError> {
        let notification_type = self.types.get(request.notification_type).await?;

        log_business_event!(
            event.category = event::category::NOTIFICATION,
            event.action = event::action::NOTIFICATION_EMITTED,
            event.actor_id = %request.user.id(),
            event.result = event::result::SUCCESS,
            notification.type_name = %request.notification_type,
            notification.save = request.save,
            "通知を発行"
        );

        if !request.save {
            return self.send_now(&notification_type, &request, None).await;
        }

        let now = self.dispatcher.clock.now();
        let subscription = self
            .subscriptions
            .get_or_create(&NotificationSubscription::new(
                request.user.id().clone(),
                notification_type.id().clone(),
                notification_type.default_frequency(),
                now,
            ))
            .await?;

        match subscription.frequency() {
            Frequency::Instantly => {
                let task = EmailTask::new(
                    Some(request.user.id().clone()),
                    request.notification_type,
                    now,
                );
                self.dispatcher.email_tasks.insert(&task).await?;
                self.send_now(&notification_type, &request, Some(task)).await
            }
            Frequency::Daily | Frequency::Weekly | Frequency::Monthly => {
                self.queue_digest(&request, &subscription).await
            }
            Frequency::None => {
                log_business_event!(
                    event.category = event::category::NOTIFICATION,
                    event.action = event::action::NOTIFICATION_EMITTED,
                    event.entity_type = event::entity_type::NOTIFICATION_SUBSCRIPTION,
                    event.entity_id = %subscription.id(),
                    event.actor_id = %request.user.id(),
                    event.result = event::result::SKIPPED,
                    notification.type_name = %request.notification_type,
                    "配信頻度が none のため送信しません"
                );
                Ok(EmitOutcome::Skipped)
            }
        }
    }
}

/// 送信と送信タスクの記録
///
/// バックグラウンド送信で `'static` なタスクに渡せるよう、依存をすべて `Arc` で持つ。
#[derive(Clone)]
struct Dispatcher {
    sender:      Arc<dyn NotificationSender>,
    email_tasks: Arc<dyn EmailTaskRepository>,
    clock:       Arc<dyn Clock>,
}

impl Dispatcher {
    async fn deliver(
        &self,
        email: EmailMessage,
        task: Option<EmailTask>,
    ) -> Result<DeliveryOutcome, NotificationError> {
        let task = match task {
            Some(task) => {
                let started = task.start(self.clock.now()).map_err(invalid_task)?;
                self.record(&started).await?;
                Some(started)
            }
            None => None,
        };

        let result = self.sender.send_email(&email).await;
        log_delivery(&email, task.as_ref(), &result);

        if let Some(task) = task {
            let now = self.clock.now();
            let finished = match &result {
                Ok(DeliveryOutcome::Sent | DeliveryOutcome::Suppressed) => task.succeed(now),
                Ok(DeliveryOutcome::Rejected(reason)) => task.fail(format!("rejected: {reason}"), now),
                Err(e) => task.fail(e.to_string(), now),
            }
            .map_err(invalid_task)?;
            self.record(&finished).await?;
        }

        result
    }

    async fn record(&self, task: &EmailTask) -> Result<(), NotificationError> {
        self.email_tasks.update(task).await.map_err(|e| {
            tracing::error!(
                error.category = error::category::INFRASTRUCTURE,
                error.kind = error::kind::DATABASE,
                error = %e,
                task_id = %task.id(),
                status = %task.status(),
                "送信タスクの更新に失敗しました"
            );
            NotificationError::from(e)
        })
    }
}

fn log_delivery(
    email: &EmailMessage,
    task: Option<&EmailTask>,
    result: &Result<DeliveryOutcome, NotificationError>,
) {
    let task_id = task.map(|t| t.id().to_string()).unwrap_or_default();

    match result {
        Ok(DeliveryOutcome::Sent | DeliveryOutcome::Suppressed) => {
            log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_SENT,
                event.entity_type = event::entity_type::EMAIL_TASK,
                event.entity_id = %task_id,
                event.result = event::result::SUCCESS,
                notification.type_name = %email.notification_type,
                notification.recipient = ?email.to,
                notification.subject = %email.subject,
                "通知メール送信成功"
            );
        }
        Ok(DeliveryOutcome::Rejected(reason)) => {
            log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_REJECTED,
                event.entity_type = event::entity_type::EMAIL_TASK,
                event.entity_id = %task_id,
                event.result = event::result::SKIPPED,
                notification.type_name = %email.notification_type,
                notification.recipient = ?email.to,
                notification.reject_reason = %reason,
                "通知メールの送信を見送り"
            );
        }
        Err(e) => {
            log_business_event!(
                event.category = event::category::NOTIFICATION,
                event.action = event::action::NOTIFICATION_FAILED,
                event.entity_type = event::entity_type::EMAIL_TASK,
                event.entity_id = %task_id,
                event.result = event::result::FAILURE,
                notification.type_name = %email.notification_type,
                notification.recipient = ?email.to,
                error = %e,
                "通知メール送信失敗"
            );
        }
    }
}

/// 完了済みの送信タスクを `JoinSet` から取り除く
fn reap_finished(background: &mut JoinSet<()>) {
    while let Some(result) = background.try_join_next() {
        log_join_failure(result);
    }
}

fn log_join_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "バックグラウンド送信タスクが異常終了しました");
    }
}

fn invalid_task(e: DomainError) -> NotificationError {
    NotificationError::Repository(e.to_string())
}
