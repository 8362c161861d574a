//! The message-queue channel: fire-and-forget with bounded retry.

use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use holograph_types::{Environment, MessagePayload, MessageType, QueueMessage};
use tokio::time::sleep;
use url::Url;

use crate::error::DispatchError;

/// Attempts per message before the failure is logged and the message
/// dropped.
pub const QUEUE_MAX_RETRIES: u32 = 3;

/// Fixed interval between queue send retries.
pub const QUEUE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Queue connection settings, taken from the conventional AWS environment.
#[derive(Clone, Debug, Parser)]
pub struct QueueOptions {
    #[clap(long, env = "SQS_ENDPOINT")]
    pub sqs_endpoint: Option<Url>,

    #[clap(long, env = "SQS_QUEUE_URL")]
    pub sqs_queue_url: Option<String>,

    #[clap(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    #[clap(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    #[clap(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,
}

/// Where queue messages go. The HTTP implementation posts to an
/// SQS-compatible endpoint; local environments use the logging one.
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    async fn send(&self, message: &QueueMessage) -> Result<(), DispatchError>;
}

/// Posts messages to an SQS-compatible HTTP endpoint.
#[derive(Debug)]
pub struct HttpMessageQueue {
    client: reqwest::Client,
    endpoint: Url,
    queue_url: String,
}

impl HttpMessageQueue {
    pub fn from_options(opt: &QueueOptions) -> anyhow::Result<Self> {
        let endpoint = opt
            .sqs_endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("SQS_ENDPOINT not configured"))?;
        let queue_url = opt
            .sqs_queue_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("SQS_QUEUE_URL not configured"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            queue_url,
        })
    }
}

#[async_trait]
impl MessageQueue for HttpMessageQueue {
    async fn send(&self, message: &QueueMessage) -> Result<(), DispatchError> {
        let body = serde_json::to_string(message)
            .map_err(|err| DispatchError::QueueUnreachable(err.to_string()))?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[
                ("Action", "SendMessage"),
                ("QueueUrl", self.queue_url.as_str()),
                ("MessageBody", body.as_str()),
            ])
            .send()
            .await
            .map_err(|err| DispatchError::QueueUnreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DispatchError::QueueUnreachable(format!(
                "queue responded with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Local/experimental: log the message instead of sending it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingMessageQueue;

#[async_trait]
impl MessageQueue for LoggingMessageQueue {
    async fn send(&self, message: &QueueMessage) -> Result<(), DispatchError> {
        tracing::info!(
            message = %serde_json::to_string(message).unwrap_or_default(),
            "queue send skipped in local environment"
        );
        Ok(())
    }
}

/// Send with the channel's bounded-retry policy. After exhaustion the caller
/// logs and drops; message delivery is best-effort.
pub async fn send_with_retry(
    queue: &dyn MessageQueue,
    message: &QueueMessage,
) -> Result<(), DispatchError> {
    let mut last = String::new();
    for attempt in 1..=QUEUE_MAX_RETRIES {
        match queue.send(message).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(attempt, "queue send failed: {err:#}");
                last = err.to_string();
            },
        }
        if attempt < QUEUE_MAX_RETRIES {
            sleep(QUEUE_RETRY_INTERVAL).await;
        }
    }
    Err(DispatchError::QueueExhausted {
        attempts: QUEUE_MAX_RETRIES,
        message: last,
    })
}

/// Startup probe: a single synthetic message. In non-local environments an
/// unreachable queue fails startup fast.
pub async fn startup_probe(
    queue: &dyn MessageQueue,
    environment: Environment,
) -> Result<(), DispatchError> {
    let probe = QueueMessage {
        message_type: MessageType::HolographProtocol,
        event_name: "HealthCheck".into(),
        event_signature: None,
        tag_id: vec!["startup".into()],
        chain_id: 0,
        holograph_address: String::new(),
        environment,
        payload: MessagePayload::default(),
    };
    queue.send(&probe).await
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct FlakyQueue {
        failures: AtomicU32,
    }

    #[async_trait]
    impl MessageQueue for FlakyQueue {
        async fn send(&self, _message: &QueueMessage) -> Result<(), DispatchError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n - 1)
            }).is_ok() {
                Err(DispatchError::QueueUnreachable("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn probe_message() -> QueueMessage {
        QueueMessage {
            message_type: MessageType::HolographProtocol,
            event_name: "HealthCheck".into(),
            event_signature: None,
            tag_id: vec![],
            chain_id: 0,
            holograph_address: String::new(),
            environment: Environment::Localhost,
            payload: MessagePayload::default(),
        }
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let queue = FlakyQueue {
            failures: AtomicU32::new(2),
        };
        send_with_retry(&queue, &probe_message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let queue = FlakyQueue {
            failures: AtomicU32::new(10),
        };
        let err = send_with_retry(&queue, &probe_message()).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::QueueExhausted { attempts: 3, .. }
        ));
    }
}
