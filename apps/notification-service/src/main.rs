//! # notiflow CLI
//!
//! 通知サービスを単体で動かすためのコマンドラインツール。
//!
//! ## コマンド
//!
//! | コマンド | 説明 |
//! |----------|------|
//! | `send` | 通知を 1 件発行する |
//! | `warm-up` | 通知種別キャッシュを読み込み、登録状況を確認する |
//! | `captured` | メールキャプチャツールが受信したメールを表示する（`--clear` で削除） |
//!
//! ## 起動方法
//!
//! ```bash
//! # 開発環境（メールキャプチャツールへ送信）
//! NOTIFICATION_BACKEND=smtp ENABLED_SWITCHES=enable_mail_capture \
//!   cargo run -p notiflow-notification-service -- \
//!   send --type user_file_updated --to user@example.com --context '{"file": "report.pdf"}'
//!
//! # 種別の登録状況を確認
//! cargo run -p notiflow-notification-service -- warm-up
//!
//! # メールキャプチャツールに届いたメールを確認して削除
//! cargo run -p notiflow-notification-service -- captured --clear
//! ```
//!
//! 環境変数は `notiflow_notification_service::config` を参照。

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use notiflow_domain::{
    clock::SystemClock,
    notification::NotificationTypeName,
    user::{Email, User, UserId},
};
use notiflow_infra::{
    db,
    repository::{
        PostgresEmailTaskRepository,
        PostgresNotificationRepository,
        PostgresNotificationSubscriptionRepository,
        PostgresNotificationTypeRepository,
    },
};
use notiflow_notification_service::{
    config::{NotificationConfig, ServiceConfig},
    feature_switch::EnvFeatureSwitches,
    usecase::notification::{
        EmitRequest,
        NotificationRepositories,
        NotificationService,
        NotificationTypeCache,
        Notifier,
        TemplateRenderer,
    },
};
use notiflow_shared::observability::{TracingConfig, init_tracing};
use serde_json::Value;
use sqlx::PgPool;

/// 通知の発行と通知種別の確認を行う
#[derive(Debug, Parser)]
#[command(name = "notiflow", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 通知を 1 件発行する
    Send(SendArgs),
    /// 通知種別キャッシュを読み込む
    WarmUp,
    /// メールキャプチャツールが受信したメールを表示する
    Captured {
        /// 表示した後に受信済みメールを削除する
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Args)]
struct SendArgs {
    /// 通知種別（例: user_file_updated）
    #[arg(long = "type")]
    notification_type: NotificationTypeName,

    /// 受信者のメールアドレス
    #[arg(long)]
    to: String,

    /// 受信者のユーザー ID（省略時は新規採番）
    #[arg(long)]
    user_id: Option<UserId>,

    /// 受信者の表示名
    #[arg(long, default_value = "")]
    fullname: String,

    /// テンプレートに渡すコンテキスト（JSON オブジェクト）
    #[arg(long, default_value = "{}")]
    context: Value,

    /// 購読・通知・送信タスクを保存せずに送信する
    #[arg(long)]
    no_save: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_tracing(TracingConfig::from_env("notiflow"));

    match cli.command {
        Command::Captured { clear } => show_captured(clear).await,
        command => run_with_database(command).await,
    }
}

/// データベースと通知種別キャッシュを使うコマンドを実行する
async fn run_with_database(command: Command) -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("設定の読み込みに失敗しました")?;

    let pool = db::create_pool(&config.database_url)
        .await
        .context("データベースへの接続に失敗しました")?;
    db::run_migrations(&pool)
        .await
        .context("マイグレーションの実行に失敗しました")?;

    let cache = Arc::new(NotificationTypeCache::new(Arc::new(
        PostgresNotificationTypeRepository::new(pool.clone()),
    )));

    match command {
        Command::WarmUp => {
            let loaded = cache.warm_up().await?;
            tracing::info!(loaded, "通知種別を読み込みました");
        }
        Command::Send(args) => {
            let service = build_service(&config, pool, cache)?;
            let request = build_request(args)?;

            let outcome = service.emit(request).await?;
            service.drain().await;
            tracing::info!(?outcome, "通知を発行しました");
        }
        Command::Captured { clear } => show_captured(clear).await?,
    }

    Ok(())
}

/// メールキャプチャツールの受信済みメールをログに出す（データベースは使わない）
async fn show_captured(clear: bool) -> anyhow::Result<()> {
    let config = NotificationConfig::from_env().context("設定の読み込みに失敗しました")?;
    let client = config.mail_capture_client();

    let messages = client
        .messages()
        .await
        .context("メールキャプチャツールからの取得に失敗しました")?;
    for mail in &messages {
        tracing::info!(to = ?mail.to, subject = %mail.subject, body = %mail.body, "受信済みメール");
    }
    tracing::info!(count = messages.len(), "受信済みメールを取得しました");

    if clear {
        client
            .clear()
            .await
            .context("受信済みメールの削除に失敗しました")?;
        tracing::info!("受信済みメールを削除しました");
    }
    Ok(())
}

fn build_service(
    config: &ServiceConfig,
    pool: PgPool,
    cache: Arc<NotificationTypeCache>,
) -> anyhow::Result<NotificationService> {
    let switches = EnvFeatureSwitches::from_env();
    let sender = config.notification.build_sender(&switches);
    let renderer = Arc::new(TemplateRenderer::new()?);

    let repositories = NotificationRepositories {
        subscriptions: Arc::new(PostgresNotificationSubscriptionRepository::new(pool.clone())),
        notifications: Arc::new(PostgresNotificationRepository::new(pool.clone())),
        email_tasks:   Arc::new(PostgresEmailTaskRepository::new(pool)),
    };

    Ok(NotificationService::new(
        cache,
        renderer,
        sender,
        repositories,
        Arc::new(SystemClock),
    ))
}

fn build_request(args: SendArgs) -> anyhow::Result<EmitRequest> {
    anyhow::ensure!(
        args.context.is_object(),
        "--context には JSON オブジェクトを指定してください"
    );

    let user = User::new(args.user_id.unwrap_or_default(), Email::new(args.to)?, args.fullname);

    let request = EmitRequest::new(user, args.notification_type, args.context);
    Ok(if args.no_save {
        request.without_save()
    } else {
        request
    })
}
