use std::time::Duration;

use application::{MailError, Mailer};
use infrastructure::HttpMailer;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mailer(server: &MockServer) -> HttpMailer {
    HttpMailer::new(
        format!("{}/v1/send", server.uri()),
        "no-reply@zola.chat",
        Duration::from_secs(2),
    )
    .expect("build mailer")
}

#[tokio::test]
async fn posts_mail_as_json_to_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .and(body_json(json!({
            "from": "no-reply@zola.chat",
            "to": "alice@example.com",
            "subject": "Welcome to Zola",
            "html": "<p>Hi alice,</p>",
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    mailer(&server)
        .send("alice@example.com", "Welcome to Zola", "<p>Hi alice,</p>")
        .await
        .expect("mail accepted");
}

#[tokio::test]
async fn gateway_rejection_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/send"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
        .mount(&server)
        .await;

    let err = mailer(&server)
        .send("nobody", "Welcome to Zola", "<p>Hi</p>")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        MailError::Rejected {
            status: 422,
            message: "invalid recipient".into(),
        }
    );
}

#[tokio::test]
async fn unreachable_gateway_is_a_transport_error() {
    // 绑定后立即释放的端口上没有监听者
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .expect("free port")
        .port();
    let mailer = HttpMailer::new(
        format!("http://127.0.0.1:{}/v1/send", port),
        "no-reply@zola.chat",
        Duration::from_secs(2),
    )
    .expect("build mailer");

    let err = mailer
        .send("alice@example.com", "Welcome to Zola", "<p>Hi</p>")
        .await
        .unwrap_err();
    assert!(matches!(err, MailError::Transport(_)));
}
