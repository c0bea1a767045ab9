//! Embedded read-only HTTP status surface.
//!
//! `GET /prices` serves the latest published snapshot as canonical decimal
//! strings, `GET /healthz` reports liveness and snapshot age, `GET /metrics`
//! exposes the Prometheus counters.

use crate::config::ServerConfig;
use crate::oracle::PricePublisher;
use crate::telemetry;
use anyhow::{Context, Result};
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{BoxError, Json, Router};
use serde_json::json;
use std::collections::BTreeMap;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower::timeout::TimeoutLayer;
use tracing::info;

pub async fn run_server(
    config: ServerConfig,
    publisher: PricePublisher,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let app = Router::new()
        .route("/prices", get(prices))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .layer(TimeoutLayer::new(config.read_timeout)),
        )
        .with_state(publisher);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind status server on {}", config.listen_addr))?;
    info!("status server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("status server failed")?;
    Ok(())
}

async fn prices(State(publisher): State<PricePublisher>) -> Json<BTreeMap<String, String>> {
    Json(publisher.canonical_rates())
}

async fn healthz(State(publisher): State<PricePublisher>) -> impl IntoResponse {
    let snapshot = publisher.snapshot();
    Json(json!({
        "status": "ok",
        "last_update": snapshot.updated_at.map(|at| at.to_rfc3339()),
        "rates": snapshot.rates.len(),
    }))
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::encode(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap as Rates;

    #[tokio::test]
    async fn test_prices_handler_serves_canonical_strings() {
        let publisher = PricePublisher::new();
        let mut rates = Rates::new();
        rates.insert("ATOM".to_string(), dec!(9.99));
        publisher.publish(rates, Utc::now());

        let Json(body) = prices(State(publisher)).await;
        assert_eq!(body["ATOM"], "9.990000000000000000");
    }
}
