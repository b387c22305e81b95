//! # メールキャプチャクライアント
//!
//! 開発環境・E2E テストで SMTP の送信先にしているメールキャプチャツール
//! （MailHog 互換 API を持つもの）からメールを読み出す。
//!
//! ## エンドポイント
//!
//! - `GET /api/v2/messages` - 受信済みメールの一覧
//! - `DELETE /api/v1/messages` - 受信済みメールをすべて削除
//!
//! ## 本文のデコード
//!
//! MailHog の `Content.Body` は転送エンコーディングが掛かったままの生の本文。
//! lettre は非 ASCII の HTML を base64 か quoted-printable で送るため、
//! `Content-Transfer-Encoding` に従ってデコードする。マルチパート（添付ありなど）は
//! `MIME.Parts` を再帰的にたどり、最初の `text/html` パートを本文とする。

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::Deserialize;

use crate::error::InfraError;

/// キャプチャされたメール
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMail {
    /// SMTP エンベロープ上の宛先
    pub to:      Vec<String>,
    pub subject: String,
    pub body:    String,
}

/// メールキャプチャツールの HTTP API クライアント
#[derive(Debug, Clone)]
pub struct MailCaptureClient {
    base_url: String,
    client:   reqwest::Client,
}

impl MailCaptureClient {
    /// 新しいクライアントを作成する
    ///
    /// - `base_url`: API のベース URL（例: `http://localhost:8025`）
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client:   reqwest::Client::new(),
        }
    }

    /// 受信済みメールを新しい順に取得する
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn messages(&self) -> Result<Vec<CapturedMail>, InfraError> {
        let url = format!("{}/api/v2/messages", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<MessagesResponse>()
            .await?;

        Ok(response.items.into_iter().map(CapturedMail::from).collect())
    }

    /// 受信済みメールをすべて削除する
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn clear(&self) -> Result<(), InfraError> {
        let url = format!("{}/api/v1/messages", self.base_url);

        self.client.delete(&url).send().await?.error_for_status()?;

        Ok(())
    }
}

// --- レスポンス型（MailHog v2 形式） ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    items: Vec<MessageItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MessageItem {
    raw:     RawMessage,
    content: MimePart,
    #[serde(rename = "MIME", default)]
    mime:    Option<MimeBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawMessage {
    #[serde(default)]
    to: Vec<String>,
}

/// ヘッダと本文の組（メッセージ全体、またはマルチパートの 1 パート）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MimePart {
    #[serde(default)]
    headers: HashMap<String, Vec<String>>,
    #[serde(default)]
    body:    String,
    #[serde(rename = "MIME", default)]
    mime:    Option<MimeBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MimeBody {
    #[serde(default)]
    parts: Vec<MimePart>,
}

impl MimePart {
    /// ヘッダ名は大文字小文字を区別せずに探す
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    fn is_html(&self) -> bool {
        self.header("Content-Type")
            .is_some_and(|content_type| content_type.trim().to_ascii_lowercase().starts_with("text/html"))
    }

    fn decoded_body(&self) -> String {
        decode_transfer_encoding(self.header("Content-Transfer-Encoding"), &self.body)
    }
}

impl MimeBody {
    fn find_html(&self) -> Option<&MimePart> {
        self.parts.iter().find_map(|part| {
            if part.is_html() {
                Some(part)
            } else {
                part.mime.as_ref().and_then(MimeBody::find_html)
            }
        })
    }
}

/// `Content-Transfer-Encoding` に従って本文をデコードする
///
/// 7bit / 8bit / 未指定はそのまま返す。デコードできない本文は警告を出して生のまま返す。
fn decode_transfer_encoding(encoding: Option<&str>, body: &str) -> String {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());

    let decoded = match encoding.as_deref() {
        Some("base64") => {
            let compact: String = body.split_whitespace().collect();
            STANDARD.decode(compact).map_err(|e| e.to_string())
        }
        Some("quoted-printable") => {
            quoted_printable::decode(body, quoted_printable::ParseMode::Robust)
                .map_err(|e| e.to_string())
        }
        _ => return body.to_string(),
    };

    match decoded {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(error) => {
            tracing::warn!(
                encoding = encoding.as_deref().unwrap_or_default(),
                %error,
                "メール本文をデコードできないため、そのまま返します"
            );
            body.to_string()
        }
    }
}

impl From<MessageItem> for CapturedMail {
    fn from(item: MessageItem) -> Self {
        let subject = item.content.header("Subject").unwrap_or_default().to_string();
        let body = item
            .mime
            .as_ref()
            .and_then(MimeBody::find_html)
            .unwrap_or(&item.content)
            .decoded_body();

        Self {
            to: item.raw.to,
            subject,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        Mock,
        MockServer,
        ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    #[tokio::test]
    async fn 受信済みメールを取得できる() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "count": 1,
                "start": 0,
                "items": [{
                    "ID": "abc@mailhog.example",
                    "Raw": {
                        "From": "noreply@notiflow.example.com",
                        "To": ["user@example.com"],
                        "Data": "..."
                    },
                    "Content": {
                        "Headers": {
                            "Subject": ["Your password has been reset"],
                            "Content-Type": ["text/html; charset=utf-8"]
                        },
                        "Body": "<p>Hello</p>"
                    }
                }]
            })))
            .mount(&server)
            .await;
        let client = MailCaptureClient::new(&format!("{}/", server.uri()));

        let messages = client.messages().await.unwrap();

        assert_eq!(
            messages,
            vec![CapturedMail {
                to:      vec!["user@example.com".to_string()],
                subject: "Your password has been reset".to_string(),
                body:    "<p>Hello</p>".to_string(),
            }]
        );
    }

    async fn mount_messages(server: &MockServer, item: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/api/v2/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total": 1,
                "count": 1,
                "start": 0,
                "items": [item]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn base64の本文をデコードする() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!({
                "Raw": {"To": ["zoe@example.com"]},
                "Content": {
                    "Headers": {
                        "Subject": ["Welcome"],
                        "Content-Type": ["text/html; charset=utf-8"],
                        "Content-Transfer-Encoding": ["base64"]
                    },
                    "Body": "PHA+V2VsY29tZSwgQ2Fmw6kgWm/DqyDnoJTnqbbo\r\ngIXjgZXjgpMhPC9wPg=="
                },
                "MIME": null
            }),
        )
        .await;
        let client = MailCaptureClient::new(&server.uri());

        let messages = client.messages().await.unwrap();

        assert_eq!(messages[0].body, "<p>Welcome, Café Zoë 研究者さん!</p>");
    }

    #[tokio::test]
    async fn quoted_printableの本文をデコードする() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!({
                "Raw": {"To": ["zoe@example.com"]},
                "Content": {
                    "Headers": {
                        "Subject": ["Hello"],
                        "Content-Type": ["text/html; charset=utf-8"],
                        "content-transfer-encoding": ["Quoted-Printable"]
                    },
                    "Body": "<p>Hello Zo=C3=AB</p>"
                }
            }),
        )
        .await;
        let client = MailCaptureClient::new(&server.uri());

        let messages = client.messages().await.unwrap();

        assert_eq!(messages[0].body, "<p>Hello Zoë</p>");
    }

    #[tokio::test]
    async fn マルチパートではhtmlパートを本文にする() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!({
                "Raw": {"To": ["zoe@example.com"]},
                "Content": {
                    "Headers": {
                        "Subject": ["Report"],
                        "Content-Type": ["multipart/mixed; boundary=\"b1\""]
                    },
                    "Body": "--b1\r\n...raw multipart...\r\n--b1--"
                },
                "MIME": {
                    "Parts": [
                        {
                            "Headers": {"Content-Type": ["multipart/alternative; boundary=\"b2\""]},
                            "Body": "",
                            "MIME": {
                                "Parts": [{
                                    "Headers": {
                                        "Content-Type": ["text/html; charset=utf-8"],
                                        "Content-Transfer-Encoding": ["base64"]
                                    },
                                    "Body": "PHA+QXR0YWNoZWQgZm9yIFpvw6s8L3A+"
                                }]
                            }
                        },
                        {
                            "Headers": {
                                "Content-Type": ["application/pdf"],
                                "Content-Transfer-Encoding": ["base64"]
                            },
                            "Body": "JVBERi0xLjQ="
                        }
                    ]
                }
            }),
        )
        .await;
        let client = MailCaptureClient::new(&server.uri());

        let messages = client.messages().await.unwrap();

        assert_eq!(
            messages,
            vec![CapturedMail {
                to:      vec!["zoe@example.com".to_string()],
                subject: "Report".to_string(),
                body:    "<p>Attached for Zoë</p>".to_string(),
            }]
        );
    }

    #[test]
    fn 不正なbase64は生の本文のまま返す() {
        assert_eq!(decode_transfer_encoding(Some("base64"), "not base64!"), "not base64!");
        assert_eq!(decode_transfer_encoding(Some("7bit"), "<p>plain</p>"), "<p>plain</p>");
        assert_eq!(decode_transfer_encoding(None, "<p>plain</p>"), "<p>plain</p>");
    }

    #[tokio::test]
    async fn 受信済みメールを削除できる() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/messages"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        let client = MailCaptureClient::new(&server.uri());

        client.clear().await.unwrap();
    }

    #[tokio::test]
    async fn エラーステータスはhttpエラーになる() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let client = MailCaptureClient::new(&server.uri());

        let result = client.messages().await;

        assert!(matches!(
            result.unwrap_err().kind(),
            crate::error::InfraErrorKind::Http(_)
        ));
    }
}
