use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ChannelError, EmailMessage, MailChannel, SendReceipt};
use crate::audit::Auditor;
use crate::errors::DeliveryError;

/// Retry schedule for outbound mail.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Wait after failed attempt `n` is `backoff_base^n` seconds.
    pub backoff_base: f64,
    /// Upper bound on any single wait, including server-supplied Retry-After.
    pub max_wait: Duration,
    /// Random extra wait in `0..=jitter` added to backoff waits.
    pub jitter: Duration,
    /// Hard limit on one send attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            max_wait: Duration::from_secs(60),
            jitter: Duration::ZERO,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let raw = self.backoff_base.powi(attempt as i32);
        let capped = if raw.is_finite() {
            raw.min(self.max_wait.as_secs_f64()).max(0.0)
        } else {
            self.max_wait.as_secs_f64()
        };

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };

        Duration::from_secs_f64(capped) + Duration::from_millis(jitter)
    }

    /// How long to wait after `err` on attempt `attempt` (1-based).
    pub fn wait_for(&self, err: &ChannelError, attempt: u32) -> Duration {
        match err {
            ChannelError::RateLimited { retry_after: Some(hint) } => (*hint).min(self.max_wait),
            _ => self.backoff(attempt),
        }
    }
}

/// Sends messages through one [`MailChannel`] with bounded retries.
///
/// Exactly one audit record is written per terminal outcome. Delivery is
/// at-least-once: an attempt that timed out locally may still have been
/// accepted by the provider.
#[derive(Clone)]
pub struct NotificationDispatcher {
    channel: Arc<dyn MailChannel>,
    policy: RetryPolicy,
    auditor: Auditor,
}

impl NotificationDispatcher {
    pub fn new(channel: Arc<dyn MailChannel>, policy: RetryPolicy, auditor: Auditor) -> Self {
        Self {
            channel,
            policy,
            auditor,
        }
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    pub async fn send(
        &self,
        to: &str,
        message: &EmailMessage,
        correlation_id: Option<Uuid>,
    ) -> Result<SendReceipt, DeliveryError> {
        let channel = self.channel.name();
        let max_attempts = self.policy.max_attempts.max(1);
        let correlation = correlation_id.map(|id| id.to_string());
        let mut attempt = 0;

        let last_error = loop {
            attempt += 1;

            let outcome = match timeout(
                self.policy.attempt_timeout,
                self.channel.send(to, message, correlation.as_deref()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Transport(format!(
                    "attempt timed out after {:?}",
                    self.policy.attempt_timeout
                ))),
            };

            match outcome {
                Ok(receipt) => {
                    crate::metrics::delivery_attempt(channel, "ok");
                    crate::metrics::delivery_outcome(channel, "sent");
                    info!(
                        channel,
                        to,
                        attempt,
                        correlation_id = ?correlation,
                        external_id = ?receipt.external_id,
                        "email delivered"
                    );
                    self.auditor
                        .record(
                            correlation_id,
                            channel,
                            "email_sent",
                            serde_json::json!({
                                "to": to,
                                "subject": message.subject,
                                "attempts": attempt,
                                "external_id": receipt.external_id,
                            }),
                        )
                        .await;
                    return Ok(receipt);
                }
                Err(e) if !e.is_retryable() => {
                    crate::metrics::delivery_attempt(channel, e.kind());
                    crate::metrics::delivery_outcome(channel, "permanent");
                    warn!(channel, to, attempt, error = %e, "email delivery failed permanently");
                    self.record_failure(correlation_id, to, message, attempt, &e, "permanent")
                        .await;
                    return Err(DeliveryError::Permanent(e.to_string()));
                }
                Err(e) => {
                    crate::metrics::delivery_attempt(channel, e.kind());
                    if attempt >= max_attempts {
                        break e;
                    }
                    let wait = self.policy.wait_for(&e, attempt);
                    warn!(
                        channel,
                        to,
                        attempt,
                        max_attempts,
                        error = %e,
                        wait_ms = wait.as_millis() as u64,
                        "email attempt failed, will retry"
                    );
                    sleep(wait).await;
                    debug!(channel, to, attempt = attempt + 1, "retrying email delivery");
                }
            }
        };

        crate::metrics::delivery_outcome(channel, "exhausted");
        warn!(channel, to, attempts = attempt, error = %last_error, "email delivery failed after all retries");
        self.record_failure(correlation_id, to, message, attempt, &last_error, "transient_exhausted")
            .await;
        Err(DeliveryError::TransientExhausted {
            attempts: attempt,
            last_error: last_error.to_string(),
        })
    }

    async fn record_failure(
        &self,
        correlation_id: Option<Uuid>,
        to: &str,
        message: &EmailMessage,
        attempts: u32,
        error: &ChannelError,
        reason: &str,
    ) {
        self.auditor
            .record(
                correlation_id,
                self.channel.name(),
                "email_failed",
                serde_json::json!({
                    "to": to,
                    "subject": message.subject,
                    "attempts": attempts,
                    "reason": reason,
                    "error": error.to_string(),
                }),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Channel that replays a fixed script of outcomes and records call times.
    struct ScriptedChannel {
        script: Mutex<Vec<Result<SendReceipt, ChannelError>>>,
        calls: Mutex<Vec<Instant>>,
        stall: Option<Duration>,
    }

    impl ScriptedChannel {
        fn new(mut script: Vec<Result<SendReceipt, ChannelError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
                stall: None,
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailChannel for ScriptedChannel {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(
            &self,
            _to: &str,
            _message: &EmailMessage,
            _correlation_id: Option<&str>,
        ) -> Result<SendReceipt, ChannelError> {
            self.calls.lock().unwrap().push(Instant::now());
            if let Some(stall) = self.stall {
                sleep(stall).await;
            }
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(SendReceipt::default()))
        }
    }

    fn server(status: u16) -> Result<SendReceipt, ChannelError> {
        Err(ChannelError::Server { status, body: String::new() })
    }

    fn ok() -> Result<SendReceipt, ChannelError> {
        Ok(SendReceipt { external_id: Some("m-1".into()) })
    }

    fn message() -> EmailMessage {
        EmailMessage {
            subject: "subject".into(),
            html: "<p>x</p>".into(),
            text: "x".into(),
        }
    }

    fn dispatcher(
        channel: Arc<ScriptedChannel>,
        policy: RetryPolicy,
    ) -> (NotificationDispatcher, MemoryStore) {
        let store = MemoryStore::new();
        let auditor = Auditor::new(Arc::new(store.clone()), Arc::new(SystemClock));
        (NotificationDispatcher::new(channel, policy, auditor), store)
    }

    async fn audit_actions(store: &MemoryStore) -> Vec<String> {
        store
            .audit_records()
            .await
            .into_iter()
            .map(|r| r.action)
            .collect()
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            backoff_base: 2.0,
            max_wait: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_hint_preferred_and_capped() {
        let policy = RetryPolicy {
            backoff_base: 10.0,
            max_wait: Duration::from_secs(30),
            ..RetryPolicy::default()
        };
        let hinted = ChannelError::RateLimited { retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(policy.wait_for(&hinted, 1), Duration::from_secs(2));

        let unhinted = ChannelError::RateLimited { retry_after: None };
        assert_eq!(policy.wait_for(&unhinted, 1), Duration::from_secs(10));

        let huge = ChannelError::RateLimited { retry_after: Some(Duration::from_secs(3600)) };
        assert_eq!(policy.wait_for(&huge, 1), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_waits_for_retry_after_not_backoff() {
        let channel = Arc::new(ScriptedChannel::new(vec![
            Err(ChannelError::RateLimited { retry_after: Some(Duration::from_secs(2)) }),
            ok(),
        ]));
        let policy = RetryPolicy {
            backoff_base: 10.0,
            ..RetryPolicy::default()
        };
        let (d, _store) = dispatcher(channel.clone(), policy);

        d.send("approver@example.com", &message(), None).await.unwrap();

        let calls = channel.calls();
        assert_eq!(calls.len(), 2);
        let waited = calls[1] - calls[0];
        assert!(
            waited >= Duration::from_secs(2) && waited < Duration::from_millis(2100),
            "waited {:?}, expected ≈2s",
            waited
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_5xx_then_success_writes_one_sent_record() {
        let channel = Arc::new(ScriptedChannel::new(vec![server(500), server(500), ok()]));
        let (d, store) = dispatcher(channel.clone(), RetryPolicy::default());

        let receipt = d
            .send("approver@example.com", &message(), Some(Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(receipt.external_id.as_deref(), Some("m-1"));
        assert_eq!(channel.calls().len(), 3);
        assert_eq!(audit_actions(&store).await, vec!["email_sent".to_string()]);
        let record = &store.audit_records().await[0];
        assert_eq!(record.metadata["attempts"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_4xx_fails_immediately() {
        let channel = Arc::new(ScriptedChannel::new(vec![Err(ChannelError::Rejected {
            status: 400,
            body: "bad request".into(),
        })]));
        let (d, store) = dispatcher(channel.clone(), RetryPolicy::default());

        let err = d.send("approver@example.com", &message(), None).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Permanent(_)));
        assert_eq!(channel.calls().len(), 1, "no retries for client errors");
        assert_eq!(audit_actions(&store).await, vec!["email_failed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_transient_exhausted() {
        let channel = Arc::new(ScriptedChannel::new(vec![server(503), server(502), server(500)]));
        let (d, store) = dispatcher(channel.clone(), RetryPolicy::default());

        let err = d.send("approver@example.com", &message(), None).await.unwrap_err();

        match err {
            DeliveryError::TransientExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected TransientExhausted, got {:?}", other),
        }
        assert_eq!(channel.calls().len(), 3);
        assert_eq!(audit_actions(&store).await, vec!["email_failed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_transient() {
        let mut channel = ScriptedChannel::new(vec![ok(), ok()]);
        channel.stall = Some(Duration::from_secs(60));
        let channel = Arc::new(channel);
        let policy = RetryPolicy {
            max_attempts: 2,
            attempt_timeout: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let (d, _store) = dispatcher(channel.clone(), policy);

        let err = d.send("approver@example.com", &message(), None).await.unwrap_err();
        assert!(matches!(err, DeliveryError::TransientExhausted { attempts: 2, .. }));
        assert_eq!(channel.calls().len(), 2);
    }
}
