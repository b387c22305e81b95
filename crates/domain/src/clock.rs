//! # Clock（時刻プロバイダ）
//!
//! 通知キューの `created` や送信タスクの `updated` に刻む時刻を
//! 注入可能にするための抽象化。テストでは [`FixedClock`] を渡す。

use chrono::{DateTime, Utc};

/// 現在時刻を提供するトレイト
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// システム時刻を返す実装
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 固定時刻を返すテスト用実装
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn システム時刻は呼び出しのたびに進む() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let first = clock.now();
        let second = clock.now();

        assert!(second >= first);
    }

    #[test]
    fn 固定時刻はトレイトオブジェクト越しでも変わらない() {
        let fixed = Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(fixed));

        assert_eq!(clock.now(), fixed);
        assert_eq!(clock.now(), fixed);
    }
}
