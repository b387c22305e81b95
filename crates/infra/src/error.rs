//! # インフラ層エラー定義
//!
//! リポジトリ（PostgreSQL）とメール関連の HTTP 通信で発生するエラー。
//!
//! [`InfraError`] は種別（[`InfraErrorKind`]）に加えて、生成時点の [`SpanTrace`] を持つ。
//! `emit` のスパン（通知種別・ユーザー ID）の中で失敗した場合、どの通知の処理中だったかが
//! エラー自体から辿れる。生成は必ず [`InfraError::new`] を経由するため、捕捉漏れはない。
//!
//! ユースケース層には `NotificationError::Repository` として渡す。

use std::fmt;

use derive_more::Display;
use notiflow_domain::notification::NotificationError;
use thiserror::Error;
use tracing_error::SpanTrace;

/// インフラ層で発生するエラー
///
/// エラー種別（[`InfraErrorKind`]）と [`SpanTrace`]（呼び出し経路）を保持する。
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// インフラ層エラーの種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// データベースエラー
    ///
    /// SQL クエリの実行失敗、接続エラー、制約違反など。
    #[error("データベースエラー: {0}")]
    Database(#[source] sqlx::Error),

    /// HTTP 通信エラー（メール送信 API、メールキャプチャツール）
    #[error("HTTP 通信エラー: {0}")]
    Http(#[source] reqwest::Error),

    /// シリアライズ/デシリアライズエラー
    #[error("シリアライズエラー: {0}")]
    Serialization(#[source] serde_json::Error),

    /// DB に保存された値がドメインの型に変換できない
    #[error("不正な保存値: {0}")]
    InvalidData(String),

    /// 予期しないエラー
    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

impl InfraError {
    fn new(kind: InfraErrorKind) -> Self {
        Self {
            kind,
            span_trace: SpanTrace::capture(),
        }
    }

    /// エラー種別を取得する
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    /// SpanTrace を取得する
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// 不正な保存値エラーを生成する
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::new(InfraErrorKind::InvalidData(msg.into()))
    }

    /// 予期しないエラーを生成する
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::new(InfraErrorKind::Unexpected(msg.into()))
    }
}

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<sqlx::Error> for InfraError {
    fn from(source: sqlx::Error) -> Self {
        Self::new(InfraErrorKind::Database(source))
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(source: reqwest::Error) -> Self {
        Self::new(InfraErrorKind::Http(source))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self::new(InfraErrorKind::Serialization(source))
    }
}

/// ユースケース層ではリポジトリ失敗を通知エラーとして扱う
impl From<InfraError> for NotificationError {
    fn from(error: InfraError) -> Self {
        NotificationError::Repository(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::layer::SubscriberExt as _;

    use super::*;

    /// テスト用に ErrorLayer 付き subscriber を設定する
    fn with_error_layer(f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(tracing_error::ErrorLayer::default());
        let _guard = tracing::subscriber::set_default(subscriber);
        f();
    }

    #[test]
    fn test_from_sqlx_errorでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("test_repo", notification_type = "preprint_submitted");
            let _enter = span.enter();

            let err: InfraError = sqlx::Error::RowNotFound.into();

            assert!(matches!(err.kind(), InfraErrorKind::Database(_)));
            let trace_str = format!("{}", err.span_trace());
            assert!(
                trace_str.contains("test_repo"),
                "SpanTrace がスパン名を含むこと: {trace_str}",
            );
        });
    }

    #[test]
    fn test_from_serde_json_errorでspan_traceがキャプチャされる() {
        with_error_layer(|| {
            let span = tracing::info_span!("test_serialization");
            let _enter = span.enter();

            let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
            let err: InfraError = json_err.into();

            assert!(matches!(err.kind(), InfraErrorKind::Serialization(_)));
            assert!(format!("{}", err.span_trace()).contains("test_serialization"));
        });
    }

    #[test]
    fn test_invalid_dataのメッセージ() {
        let err = InfraError::invalid_data("frequency=hourly");
        assert_eq!(format!("{err}"), "不正な保存値: frequency=hourly");
    }

    #[test]
    fn test_sourceがinfra_error_kindに委譲する() {
        use std::error::Error;

        let err: InfraError = sqlx::Error::RowNotFound.into();
        assert!(err.source().is_some());
        assert!(InfraError::unexpected("x").source().is_none());
    }

    #[test]
    fn test_notification_errorへの変換でメッセージを保持する() {
        let err: NotificationError = InfraError::unexpected("接続失敗").into();
        assert!(matches!(
            err,
            NotificationError::Repository(msg) if msg.contains("接続失敗")
        ));
    }
}
