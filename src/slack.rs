//! Slack webhook notifications for alert and recovery events.

use crate::config::SlackConfig;
use crate::model::{CheckResult, TargetConfig};
use crate::monitor::MonitorEngine;

use std::sync::Arc;

/// Posts alert/recovery messages to a Slack incoming webhook.
///
/// Sends run in spawned tasks so a slow webhook never delays result
/// processing; a failed send is logged and dropped.
#[derive(Clone)]
pub struct SlackNotifier {
    webhook_url: String,
    channel: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            channel: config.channel.clone(),
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn send_alert(&self, target: &TargetConfig, result: &CheckResult) {
        let timestamp = result.checked_at.format("%Y-%m-%d %H:%M:%S");
        let error = result.error.as_deref().unwrap_or("Unknown error");
        let message = format!(
            "🚨 [ALERT] {url} (id: {id}) failed {threshold} consecutive checks.\n\
             Time: {timestamp}\n\
             URL: {url}\n\
             Latest error: {error} ({latency}ms)",
            url = target.url,
            id = target.id,
            threshold = target.alert_threshold,
            latency = result.latency_ms,
        );
        self.send_message(message);
    }

    pub fn send_recovery(&self, target: &TargetConfig, result: &CheckResult) {
        let timestamp = result.checked_at.format("%Y-%m-%d %H:%M:%S");
        let message = format!(
            "✅ [RECOVERY] {url} (id: {id}) is healthy again.\nTime: {timestamp}",
            url = target.url,
            id = target.id,
        );
        self.send_message(message);
    }

    fn send_message(&self, message: String) {
        let notifier = self.clone();
        tokio::spawn(async move {
            let payload = serde_json::json!({
                "channel": notifier.channel,
                "text": message,
            });

            match notifier
                .client
                .post(&notifier.webhook_url)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if !response.status().is_success() => {
                    tracing::error!(
                        "Failed to send Slack notification: HTTP {}",
                        response.status()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Error sending Slack notification: {e}");
                }
            }
        });
    }
}

/// Register the notifier as a result listener.
///
/// Escalation eligibility is read from the engine's query surface at
/// the moment each result is delivered: a failure that just reached the
/// threshold sends one alert, a success that ended a latch cycle sends
/// one recovery.
pub fn register_notifier(engine: &MonitorEngine, notifier: SlackNotifier) {
    let query = engine.clone();
    engine.add_listener(Arc::new(move |result: &CheckResult| {
        let id = result.target_id.as_str();
        let Some(target) = query.target(id) else {
            return;
        };

        if !result.is_success() && query.consecutive_failures(id) == target.alert_threshold {
            notifier.send_alert(&target, result);
        }

        if result.is_success() && query.was_alert_latched(id) {
            notifier.send_recovery(&target, result);
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use std::sync::Mutex;
    use std::time::Duration;

    async fn spawn_webhook_sink() -> (String, Arc<Mutex<Vec<String>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let router = Router::new().route(
            "/webhook",
            post(move |body: String| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(body);
                    "ok"
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{addr}/webhook"), received)
    }

    async fn wait_for_messages(received: &Arc<Mutex<Vec<String>>>, count: usize) {
        for _ in 0..100 {
            if received.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("webhook sink never received {count} message(s)");
    }

    fn target() -> TargetConfig {
        TargetConfig {
            id: "web-1".to_string(),
            url: "https://example.com/health".to_string(),
            interval_ms: 500,
            timeout_ms: 1000,
            expected_status: 200,
            expected_content: "OK".to_string(),
            alert_threshold: 3,
            ignore_tls_error: false,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_alert_message_posted_to_webhook() {
        let (webhook_url, received) = spawn_webhook_sink().await;
        let notifier = SlackNotifier::new(&SlackConfig {
            webhook_url,
            channel: "#ops".to_string(),
        })
        .unwrap();

        let result = CheckResult::failure("web-1", 1000, None, "Timeout");
        notifier.send_alert(&target(), &result);
        wait_for_messages(&received, 1).await;

        let body = received.lock().unwrap()[0].clone();
        let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(payload["channel"], "#ops");
        let text = payload["text"].as_str().unwrap();
        assert!(text.contains("[ALERT]"));
        assert!(text.contains("web-1"));
        assert!(text.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_recovery_message_posted_to_webhook() {
        let (webhook_url, received) = spawn_webhook_sink().await;
        let notifier = SlackNotifier::new(&SlackConfig {
            webhook_url,
            channel: "#ops".to_string(),
        })
        .unwrap();

        let result = CheckResult::success("web-1", 42, 200);
        notifier.send_recovery(&target(), &result);
        wait_for_messages(&received, 1).await;

        let body = received.lock().unwrap()[0].clone();
        assert!(body.contains("[RECOVERY]"));
        assert!(body.contains("healthy again"));
    }
}
