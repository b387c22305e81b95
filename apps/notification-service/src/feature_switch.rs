//! # フィーチャースイッチ
//!
//! 実行時に切り替えるスイッチ（オン/オフのみ）の判定を抽象化する。
//! スイッチの管理機構そのものは持たず、環境変数 `ENABLED_SWITCHES`
//! （カンマ区切り）に列挙されたスイッチを有効とみなす実装だけを提供する。

use std::collections::HashSet;

/// SMTP の送信先をメールキャプチャツールに切り替えるスイッチ
pub const ENABLE_MAIL_CAPTURE: &str = "enable_mail_capture";

/// スイッチの判定トレイト
pub trait FeatureSwitches: Send + Sync {
    fn is_active(&self, name: &str) -> bool;
}

/// `ENABLED_SWITCHES` で有効化されたスイッチ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFeatureSwitches {
    enabled: HashSet<String>,
}

impl EnvFeatureSwitches {
    /// カンマ区切りのスイッチ名一覧からパースする
    pub fn parse(value: &str) -> Self {
        Self {
            enabled: value
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// 環境変数 `ENABLED_SWITCHES` から読み取る
    pub fn from_env() -> Self {
        std::env::var("ENABLED_SWITCHES")
            .map(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

impl FeatureSwitches for EnvFeatureSwitches {
    fn is_active(&self, name: &str) -> bool {
        self.enabled.contains(name)
    }
}
