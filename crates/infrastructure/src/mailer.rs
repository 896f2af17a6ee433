//! 邮件发送适配器
//!
//! `HttpMailer` 把邮件以 JSON 提交给 HTTP 邮件网关；未配置网关时使用 `LogMailer`，
//! 只把邮件写进日志，便于本地开发。

use std::time::Duration;

use application::{MailError, Mailer};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

#[derive(Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    sender: String,
}

impl HttpMailer {
    pub fn new(
        endpoint: impl Into<String>,
        sender: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| MailError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            sender: sender.into(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&OutgoingMail {
                from: &self.sender,
                to,
                subject,
                html: body,
            })
            .send()
            .await
            .map_err(|err| MailError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(to, status = status.as_u16(), "邮件网关拒绝了请求");
            return Err(MailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        debug!(to, subject, "邮件已提交到网关");
        Ok(())
    }
}

/// 只记录日志的邮件实现
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        info!(to, subject, body_len = body.len(), "未配置邮件网关，邮件仅写入日志");
        Ok(())
    }
}
