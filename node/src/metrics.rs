//! # Prometheus Metrics
//!
//! Operational metrics for the server, scraped at `/metrics` on the
//! metrics port. Registered in a dedicated [`prometheus::Registry`] with the
//! `keyseal` prefix.
//!
//! Nothing here is labelled with a secret path or a share index.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use keyseal_protocol::seal::SealState;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Shares accepted by `add_share`, whether or not they unlocked.
    pub shares_submitted_total: IntCounter,
    /// Successful, verified unseals.
    pub unlocks_total: IntCounter,
    /// Reconstructions rejected by the checksum check.
    pub rejected_unlocks_total: IntCounter,
    /// 0 = uninitialized, 1 = locked, 2 = unlocked.
    pub seal_state: IntGauge,
    pub secrets_created_total: IntCounter,
    pub secret_reads_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("keyseal".into()), None)
            .expect("failed to create prometheus registry");

        let shares_submitted_total = counter(
            &registry,
            "shares_submitted_total",
            "Total number of key shares accepted",
        );
        let unlocks_total = counter(
            &registry,
            "unlocks_total",
            "Total number of verified unseals",
        );
        let rejected_unlocks_total = counter(
            &registry,
            "rejected_unlocks_total",
            "Reconstructed keys rejected by checksum verification",
        );
        let secrets_created_total = counter(
            &registry,
            "secrets_created_total",
            "Total number of secrets created",
        );
        let secret_reads_total = counter(
            &registry,
            "secret_reads_total",
            "Total number of secrets decrypted and returned",
        );

        let seal_state = IntGauge::new(
            "seal_state",
            "Seal state: 0 = uninitialized, 1 = locked, 2 = unlocked",
        )
        .expect("metric creation");
        registry
            .register(Box::new(seal_state.clone()))
            .expect("metric registration");

        Self {
            registry,
            shares_submitted_total,
            unlocks_total,
            rejected_unlocks_total,
            seal_state,
            secrets_created_total,
            secret_reads_total,
        }
    }

    pub fn record_seal_state(&self, state: SealState) {
        self.seal_state.set(match state {
            SealState::Uninitialized => 0,
            SealState::Locked => 1,
            SealState::Unlocked => 2,
        });
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
