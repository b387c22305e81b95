//! # テストユーティリティ
//!
//! 通知を発行するコードのテストで使う支援機能。`test-utils` feature で有効になる。

pub mod capture;

pub use capture::{
    CaptureError,
    CaptureOptions,
    CapturedEmit,
    CapturedNotifications,
    CapturingNotifier,
    CapturingSender,
    EmailMismatch,
    ExpectedEmail,
    NotificationCapture,
    assert_emails,
    canonicalize_html,
};
