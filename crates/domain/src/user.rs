//! # ユーザー
//!
//! 通知の受信者としてのユーザーを定義する。
//!
//! 通知パイプラインが必要とするのは ID・メールアドレス（ユーザー名）・氏名・
//! 有効状態のみで、認証情報やプロフィールは扱わない。
//!
//! ## 使用例
//!
//! ```rust
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use notiflow_domain::user::{Email, User, UserId};
//!
//! let user = User::new(UserId::new(), Email::new("a@b.com")?, "Ada Lovelace");
//! assert_eq!(user.username().as_str(), "a@b.com");
//! assert!(user.is_active());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

use crate::DomainError;

define_uuid_id! {
    /// ユーザー ID（一意識別子）
    pub struct UserId;
}

/// メールアドレス（値オブジェクト）
///
/// 生成時にバリデーションを実行し、不正な値の作成を防ぐ。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    /// メールアドレスを作成する
    ///
    /// # バリデーション
    ///
    /// - 空文字列ではない
    /// - `local@domain` の形式
    /// - 最大 255 文字
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        let Some((local, domain)) = value.split_once('@') else {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスの形式が不正です".to_string(),
            ));
        }

        if value.len() > 255 {
            return Err(DomainError::Validation(
                "メールアドレスは255文字以内である必要があります".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 通知の受信者
///
/// `username` は受信者のメールアドレスを兼ねる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    id:        UserId,
    username:  Email,
    fullname:  String,
    is_active: bool,
}

impl User {
    /// 有効なユーザーを作成する
    pub fn new(id: UserId, username: Email, fullname: impl Into<String>) -> Self {
        Self {
            id,
            username,
            fullname: fullname.into(),
            is_active: true,
        }
    }

    /// 無効化されたユーザーとして返す
    pub fn deactivated(self) -> Self {
        Self {
            is_active: false,
            ..self
        }
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn username(&self) -> &Email {
        &self.username
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}
