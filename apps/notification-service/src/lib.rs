//! # 通知サービス
//!
//! 業務イベントを受け取り、通知メールを組み立てて配信する。
//!
//! ## 役割
//!
//! - **テンプレート**: 通知種別ごとの HTML テンプレートを tera でレンダリングし、
//!   件名の補間とプレーンテキスト版の生成を行う
//! - **振り分け**: 購読の配信頻度に応じて即時送信かダイジェストキューかを決める
//! - **送信**: 起動時に選んだ `NotificationSender`（SMTP / API / Noop）で配信する
//! - **テスト支援**: `test-utils` feature でキャプチャハーネスを公開する
//!
//! ```text
//! 業務コード ──emit──→ NotificationService ──→ TemplateRenderer
//!                           │                        │
//!                           ├─ 購読・通知キュー（PostgreSQL）
//!                           └─────────────→ NotificationSender ──→ SMTP / API
//! ```
//!
//! 環境変数は [`config`] を参照。

pub mod config;
pub mod feature_switch;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod usecase;
