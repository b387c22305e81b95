//! # ユースケース層
//!
//! - [`notification`] - 通知の発行・レンダリング・送信

pub mod notification;
