use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::DeliveryOrchestrator;
use crate::tasks::{EmailPayload, HandlerError, TaskContext, TaskHandler, TaskKind, TaskPayload};

pub const WELCOME_SUBJECT: &str = "Welcome to Zola";

const WELCOME_TEMPLATE: &str = include_str!("../../templates/welcome.html");

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// 渲染欢迎邮件正文，用户提供的字段都会转义
pub fn render_welcome_email(payload: &EmailPayload) -> String {
    WELCOME_TEMPLATE
        .replace("{{username}}", &escape_html(&payload.username))
        .replace("{{email}}", &escape_html(&payload.email))
}

impl DeliveryOrchestrator {
    /// 发送欢迎邮件，传输错误返回给处理器重试
    pub async fn send_welcome_email(&self, payload: &EmailPayload) -> Result<(), HandlerError> {
        let body = render_welcome_email(payload);
        self.mailer
            .send(&payload.email, WELCOME_SUBJECT, &body)
            .await?;
        info!(email = %payload.email, "欢迎邮件已发送");
        Ok(())
    }
}

pub struct SendEmailHandler {
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl SendEmailHandler {
    pub fn new(orchestrator: Arc<DeliveryOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl TaskHandler for SendEmailHandler {
    async fn handle(&self, _ctx: &TaskContext, payload: TaskPayload) -> Result<(), HandlerError> {
        match payload {
            TaskPayload::SendEmail(payload) => self.orchestrator.send_welcome_email(&payload).await,
            other => Err(HandlerError::UnexpectedPayload {
                expected: TaskKind::SendEmail,
                actual: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_fields_are_escaped() {
        let body = render_welcome_email(&EmailPayload {
            email: "eve@example.com".into(),
            username: "<script>alert('x')</script>".into(),
        });

        assert!(body.contains("Hi &lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;,"));
        assert!(body.contains("<strong>eve@example.com</strong>"));
        assert!(!body.contains("{{"));
    }
}
