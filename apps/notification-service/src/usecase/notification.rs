//! # 通知ユースケース
//!
//! 通知の発行から、テンプレートのレンダリング、メール送信までを統合する。
//!
//! ## モジュール構成
//!
//! - [`template_renderer`] - tera による本文のレンダリングとメールの組み立て
//! - [`subject`] - 件名テンプレートへの値の埋め込み
//! - [`plain_text`] - HTML からプレーンテキストパートを導出
//! - [`type_cache`] - 通知種別のプロセス内キャッシュ
//! - [`service`] - emit の入口（即時送信 / ダイジェスト / 保存なし送信の振り分け）

pub mod plain_text;
pub mod service;
pub mod subject;
pub mod template_renderer;
pub mod type_cache;

pub use plain_text::to_plain_text;
pub use service::{
    DeliveryMode,
    EmitOutcome,
    EmitRequest,
    NotificationRepositories,
    NotificationService,
    Notifier,
};
pub use subject::interpolate_subject;
pub use template_renderer::{RenderPolicy, TemplateRenderer};
pub use type_cache::NotificationTypeCache;
