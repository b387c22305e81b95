//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! 通知送信そのものの失敗は [`NotificationError`](crate::notification::NotificationError)
//! で表現し、ここでは値オブジェクトの検証失敗と送信タスクの不正な状態遷移を扱う。
//!
//! ## 使用例
//!
//! ```rust
//! use notiflow_domain::DomainError;
//!
//! fn validate_name(name: &str) -> Result<(), DomainError> {
//!     if name.is_empty() {
//!         return Err(DomainError::Validation("名前は必須です".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
#[derive(Debug, Error)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値がビジネスルールに違反している場合に使用する。
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// 状態遷移の規則に反する操作
    ///
    /// 送信タスクのように終端状態を持つエンティティで使用する。
    #[error("{entity} の状態を {from} から {to} に変更できません")]
    InvalidTransition {
        entity: &'static str,
        from:   String,
        to:     String,
    },
}
