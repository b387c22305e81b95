//! キャプチャハーネスの統合テスト
//!
//! 通知サービスをキャプチャで包み、発行・送信の記録とテンプレート検証を確認する。

mod common;

use std::sync::Arc;

use common::{TestSetup, test_user};
use notiflow_domain::notification::{NotificationType, NotificationTypeName};
use notiflow_infra::mock::MockNotificationSender;
use notiflow_notification_service::{
    config::NotificationConfig,
    test_utils::{
        CaptureError,
        CaptureOptions,
        ExpectedEmail,
        NotificationCapture,
        assert_emails,
    },
    usecase::notification::{EmitOutcome, EmitRequest, Notifier},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    Mock,
    MockServer,
    ResponseTemplate,
    matchers::{method, path},
};

fn file_updated_type() -> NotificationType {
    NotificationType::new(
        NotificationTypeName::UserFileUpdated,
        Some("File updated: {file}".to_string()),
        r#"{% extends "notify_base.html" %}{% block content %}<p>{{ file }} was updated by {{ missing_var }}.</p>{% endblock content %}"#,
    )
}

fn welcome_type() -> NotificationType {
    NotificationType::new(
        NotificationTypeName::UserConfirmEmail,
        Some("Welcome {fullname}".to_string()),
        "<p>Welcome, {{ fullname }}!</p><p>Joined at {{ joined }}</p>",
    )
}

/// 通知サービスを包んだキャプチャを開始する
fn start_capture(setup: &TestSetup, options: CaptureOptions) -> NotificationCapture {
    NotificationCapture::start(
        Arc::new(setup.service(Arc::new(MockNotificationSender::new()))),
        Arc::clone(&setup.renderer),
        Arc::clone(&setup.cache),
        options,
    )
}

#[tokio::test]
async fn test_finish_不足している変数名を報告する() {
    // Arrange
    let setup = TestSetup::new([file_updated_type()]);
    let capture = start_capture(
        &setup,
        CaptureOptions {
            passthrough: true,
            ..CaptureOptions::default()
        },
    );

    // Act: 本番経路は寛容モードなので emit 自体は成功する
    let outcome = capture
        .notifier()
        .emit(EmitRequest::new(
            test_user("user@example.com"),
            NotificationTypeName::UserFileUpdated,
            json!({"file": "report.pdf"}),
        ))
        .await
        .unwrap();
    assert_eq!(outcome, EmitOutcome::Sent);

    // Assert
    let error = capture.finish().await.unwrap_err();
    assert!(matches!(
        &error,
        CaptureError::TemplateFailed { notification_type, missing_variables, .. }
            if *notification_type == NotificationTypeName::UserFileUpdated
                && missing_variables == &vec!["missing_var".to_string()]
    ));
    assert!(error.to_string().contains("missing_var"));
}

#[tokio::test]
async fn test_finish_通知が発行されないことを検証できる() {
    // Arrange
    let setup = TestSetup::new([welcome_type()]);
    let capture = start_capture(
        &setup,
        CaptureOptions {
            passthrough: true,
            expect_none: true,
        },
    );

    // Act: 何も発行しない

    // Assert
    let captured = capture.finish().await.unwrap();
    assert!(captured.emits.is_empty());
    assert!(setup.email_tasks.tasks().is_empty());
}

#[tokio::test]
async fn test_finish_保存なしの発行も記録される() {
    // Arrange
    let setup = TestSetup::new([welcome_type()]);
    let capture = start_capture(
        &setup,
        CaptureOptions {
            passthrough: true,
            ..CaptureOptions::default()
        },
    );
    let notifier = capture.notifier();

    // Act
    for (address, name, joined) in [
        ("bob@example.com", "Bob", "2026-01-15T09:00:00Z"),
        ("alice@example.com", "Alice & Co", "2026-01-14T08:30:00+09:00"),
    ] {
        notifier
            .emit(
                EmitRequest::new(
                    test_user(address),
                    NotificationTypeName::UserConfirmEmail,
                    json!({"fullname": name, "joined": joined}),
                )
                .without_save(),
            )
            .await
            .unwrap();
    }

    // Assert
    let captured = capture.finish().await.unwrap();
    assert_eq!(captured.emits.len(), 2);
    assert!(captured.emits.iter().all(|emit| !emit.save && !emit.is_digest));
    assert!(setup.email_tasks.tasks().is_empty());
}

#[tokio::test]
async fn test_assert_emails_送信内容を正規化して比較する() {
    // Arrange
    let setup = TestSetup::new([welcome_type()]);
    let capture = start_capture(&setup, CaptureOptions::default());
    let sut = setup.service(Arc::new(capture.sender(Arc::new(MockNotificationSender::new()))));

    // Act
    for (address, name, joined) in [
        ("bob@example.com", "Bob", "2026-01-15T09:00:00Z"),
        ("alice@example.com", "Alice & Co", "2026-01-14T08:30:00+09:00"),
    ] {
        sut.emit(
            EmitRequest::new(
                test_user(address),
                NotificationTypeName::UserConfirmEmail,
                json!({"fullname": name, "joined": joined}),
            )
            .without_save(),
        )
        .await
        .unwrap();
    }

    // Assert
    let sends = capture.finish().await.unwrap().sends;
    let actual: Vec<ExpectedEmail> = sends.iter().map(ExpectedEmail::from).collect();
    let expected = vec![
        ExpectedEmail::new(
            "alice@example.com",
            "<p>Welcome, Alice &amp; Co!</p><p>Joined at 2000-01-01T00:00:00Z</p>",
        ),
        ExpectedEmail::new("bob@example.com", "<p>Welcome, Bob!</p><p>Joined at <<TS>></p>\n"),
    ];
    assert_eq!(assert_emails(&expected, &actual), Ok(()));
}

#[tokio::test]
async fn test_expected_emails_メールキャプチャツールの受信内容と比較できる() {
    // Arrange: メールキャプチャツールは base64 と 7bit の本文を返す
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "count": 2,
            "start": 0,
            "items": [
                {
                    "Raw": {"To": ["zoe@example.com"]},
                    "Content": {
                        "Headers": {
                            "Subject": ["Welcome Zoë & Co"],
                            "Content-Type": ["text/html; charset=utf-8"],
                            "Content-Transfer-Encoding": ["base64"]
                        },
                        "Body": "PHA+V2VsY29tZSwgWm/DqyAmYW1wOyBDbyE8L3A+PHA+Sm9pbmVkIGF0IDIwMjYtMDEtMTRUMDg6MzE6MTIrMDk6MDA8L3A+DQo="
                    }
                },
                {
                    "Raw": {"To": ["bob@example.com"]},
                    "Content": {
                        "Headers": {
                            "Subject": ["Welcome Bob"],
                            "Content-Type": ["text/html; charset=utf-8"],
                            "Content-Transfer-Encoding": ["7bit"]
                        },
                        "Body": "<p>Welcome, Bob!</p><p>Joined at 2026-01-15T09:00:00Z</p>\r\n"
                    }
                }
            ]
        })))
        .mount(&server)
        .await;
    let config = NotificationConfig::from_lookup(|name| {
        (name == "MAIL_CAPTURE_API_URL").then(|| server.uri())
    })
    .unwrap();

    let setup = TestSetup::new([welcome_type()]);
    let capture = start_capture(
        &setup,
        CaptureOptions {
            passthrough: true,
            ..CaptureOptions::default()
        },
    );
    let notifier = capture.notifier();

    // Act
    for (address, name, joined) in [
        ("bob@example.com", "Bob", "2026-01-15T09:00:00Z"),
        ("zoe@example.com", "Zoë & Co", "2026-01-14T08:30:00+09:00"),
    ] {
        notifier
            .emit(
                EmitRequest::new(
                    test_user(address),
                    NotificationTypeName::UserConfirmEmail,
                    json!({"fullname": name, "joined": joined}),
                )
                .without_save(),
            )
            .await
            .unwrap();
    }

    // Assert
    let expected = capture.expected_emails(&capture.captured()).await.unwrap();
    capture.finish().await.unwrap();
    let actual: Vec<ExpectedEmail> = config
        .mail_capture_client()
        .messages()
        .await
        .unwrap()
        .iter()
        .map(ExpectedEmail::from)
        .collect();
    assert_eq!(assert_emails(&expected, &actual), Ok(()));
}
