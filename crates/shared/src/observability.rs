//! # Observability 基盤
//!
//! `notiflow` CLI のトレーシング初期化。
//!
//! ## 設計方針
//!
//! - **出力形式は `LOG_FORMAT`**: 本番は JSON（`jq` でビジネスイベントを抽出する前提）、
//!   開発は人間向けの形式
//! - **フィルタは `RUST_LOG`**: 未設定なら [`TracingConfig::default_directives`] を使う
//! - **`ErrorLayer` を常に登録**: `InfraError` が生成時点の `SpanTrace` を持てるようにする
//! - **二重初期化は無視**: 既にサブスクライバがあれば何もしない

/// 未設定時のフィルタ
const DEFAULT_DIRECTIVES: &str = "info,notiflow=debug";

/// ログ出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 1 行 1 イベントの JSON（フィールドはトップレベルに展開）
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    /// 大文字小文字と前後の空白を無視してパースする
    ///
    /// 不正な値は [`Pretty`](LogFormat::Pretty) にフォールバックする。
    /// この時点ではまだトレーシングが使えないため、警告は stderr に出す。
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" | "" => Self::Pretty,
            _ => {
                eprintln!("WARNING: unknown LOG_FORMAT={s:?}, falling back to pretty");
                Self::Pretty
            }
        }
    }
}

/// トレーシング初期化設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// 初期化ログの `service` フィールド
    pub service_name:       String,
    pub log_format:         LogFormat,
    /// `RUST_LOG` が未設定のときのフィルタ
    pub default_directives: String,
}

impl TracingConfig {
    pub fn new(service_name: impl Into<String>, log_format: LogFormat) -> Self {
        Self {
            service_name: service_name.into(),
            log_format,
            default_directives: DEFAULT_DIRECTIVES.to_string(),
        }
    }

    /// 環境変数 `LOG_FORMAT` から出力形式を決める
    pub fn from_env(service_name: impl Into<String>) -> Self {
        let log_format = std::env::var("LOG_FORMAT")
            .map(|value| LogFormat::parse(&value))
            .unwrap_or_default();
        Self::new(service_name, log_format)
    }

    pub fn with_default_directives(self, directives: impl Into<String>) -> Self {
        Self {
            default_directives: directives.into(),
            ..self
        }
    }
}

/// トレーシングを初期化する
///
/// サブスクライバを登録できた場合は `true`、既に登録済みだった場合は `false` を返す。
#[cfg(feature = "observability")]
pub fn init_tracing(config: TracingConfig) -> bool {
    use tracing_subscriber::{EnvFilter, Layer as _, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_directives));

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(false).boxed(),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            log_format = ?config.log_format,
            "トレーシングを初期化しました"
        );
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_大文字小文字と空白を無視する() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    }

    #[test]
    fn test_parse_不正な値と空文字はprettyになる() {
        assert_eq!(LogFormat::parse("yaml"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
    }

    #[test]
    fn test_newは既定のフィルタを使う() {
        let config = TracingConfig::new("notiflow", LogFormat::Json);

        assert_eq!(config.service_name, "notiflow");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.default_directives, "info,notiflow=debug");
    }

    #[test]
    fn test_フィルタを差し替えられる() {
        let config = TracingConfig::new("notiflow", LogFormat::Pretty)
            .with_default_directives("warn,notiflow_infra=trace");

        assert_eq!(config.default_directives, "warn,notiflow_infra=trace");
    }
}
