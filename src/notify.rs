//! Stream start/stop notifications
//!
//! Announces `publish` and `publish_done` for a restream to an external
//! HTTP endpoint. Delivery is fire-and-forget: failures are logged and never
//! reach the ingest path.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Lifecycle call announced to the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishEvent {
    /// An origin started publishing
    Publish,
    /// The origin stopped publishing
    PublishDone,
}

impl PublishEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishEvent::Publish => "publish",
            PublishEvent::PublishDone => "publish_done",
        }
    }
}

/// Receives restream lifecycle announcements
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, restream_id: &str, event: PublishEvent) -> Result<()>;
}

/// Posts `app=<id>&call=<event>` as a form to a configured URL
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, restream_id: &str, event: PublishEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("app", restream_id), ("call", event.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Notify(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Notifier that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _restream_id: &str, _event: PublishEvent) -> Result<()> {
        Ok(())
    }
}

/// Deliver a notification in the background
pub(crate) fn spawn_notify(notifier: Arc<dyn Notifier>, restream_id: String, event: PublishEvent) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&restream_id, event).await {
            tracing::warn!(
                restream = %restream_id,
                call = event.as_str(),
                error = %e,
                "Webhook notification failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(PublishEvent::Publish.as_str(), "publish");
        assert_eq!(PublishEvent::PublishDone.as_str(), "publish_done");
    }

    #[tokio::test]
    async fn test_webhook_posts_form() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_string_contains("app=r1"))
            .and(body_string_contains("call=publish_done"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", mock_server.uri()));
        notifier
            .notify("r1", PublishEvent::PublishDone)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_rejected_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_string_contains("call=publish"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let notifier = WebhookNotifier::new(format!("{}/hook", mock_server.uri()));
        let result = notifier.notify("r1", PublishEvent::Publish).await;

        match result {
            Err(Error::Notify(msg)) => assert!(msg.contains("503"), "unexpected message: {}", msg),
            other => panic!("expected notify error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_webhook_unreachable() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:1/hook");
        assert!(notifier.notify("r1", PublishEvent::Publish).await.is_err());
    }
}
