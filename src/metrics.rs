//! Prometheus metrics for the approval workflow.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Counters live in the global default registry and are registered once.

use once_cell::sync::Lazy;
use prometheus::{opts, register_counter_vec, CounterVec, Encoder, TextEncoder};

pub struct WorkflowMetrics {
    tokens_total: CounterVec,
    transitions_total: CounterVec,
    delivery_attempts_total: CounterVec,
    deliveries_total: CounterVec,
    reminders_total: CounterVec,
}

static METRICS: Lazy<Option<WorkflowMetrics>> = Lazy::new(WorkflowMetrics::register);

impl WorkflowMetrics {
    fn register() -> Option<Self> {
        let registered = (|| -> prometheus::Result<Self> {
            Ok(Self {
                tokens_total: register_counter_vec!(
                    opts!("accessgate_tokens_total", "Approval token events"),
                    &["event"]
                )?,
                transitions_total: register_counter_vec!(
                    opts!("accessgate_transitions_total", "Committed request transitions"),
                    &["to"]
                )?,
                delivery_attempts_total: register_counter_vec!(
                    opts!("accessgate_delivery_attempts_total", "Outbound mail attempts"),
                    &["channel", "result"]
                )?,
                deliveries_total: register_counter_vec!(
                    opts!("accessgate_deliveries_total", "Terminal mail delivery outcomes"),
                    &["channel", "outcome"]
                )?,
                reminders_total: register_counter_vec!(
                    opts!("accessgate_reminders_total", "Reminder notifications sent"),
                    &["result"]
                )?,
            })
        })();

        match registered {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!("failed to register prometheus metrics: {}", e);
                None
            }
        }
    }
}

fn with_metrics(f: impl FnOnce(&WorkflowMetrics)) {
    if let Some(m) = METRICS.as_ref() {
        f(m);
    }
}

/// `event` is one of minted, redeemed, rejected.
pub fn token_event(event: &str) {
    with_metrics(|m| m.tokens_total.with_label_values(&[event]).inc());
}

pub fn transition(to: &str) {
    with_metrics(|m| m.transitions_total.with_label_values(&[to]).inc());
}

pub fn delivery_attempt(channel: &str, result: &str) {
    with_metrics(|m| {
        m.delivery_attempts_total
            .with_label_values(&[channel, result])
            .inc()
    });
}

pub fn delivery_outcome(channel: &str, outcome: &str) {
    with_metrics(|m| m.deliveries_total.with_label_values(&[channel, outcome]).inc());
}

pub fn reminder(result: &str) {
    with_metrics(|m| m.reminders_total.with_label_values(&[result]).inc());
}

/// Render the default registry in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!("failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters_after_use() {
        token_event("minted");
        transition("approved");
        let text = render();
        assert!(text.contains("accessgate_tokens_total"));
        assert!(text.contains("accessgate_transitions_total"));
    }
}
