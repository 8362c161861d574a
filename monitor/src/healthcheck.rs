//! Optional HTTP health endpoint for the indexer and propagator.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::provider::ProviderPool;

/// Serve `GET /healthcheck` until cancellation. Any other path gets a 200
/// placeholder, mirroring what load balancers probe.
pub async fn serve(
    port: u16,
    pool: Arc<ProviderPool>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .fallback(placeholder)
        .with_state(pool);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding healthcheck endpoint on {addr}"))?;
    tracing::info!(%addr, "healthcheck endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .context("healthcheck server failed")
}

async fn healthcheck(State(pool): State<Arc<ProviderPool>>) -> Json<Value> {
    Json(json!({
        "status": "alive",
        "providerStatus": pool.status(),
    }))
}

async fn placeholder() -> &'static str {
    "holograph"
}

#[cfg(test)]
mod test {
    use holograph_utils::test_utils::setup_test;

    use super::*;
    use crate::provider::ProviderOptions;

    #[tokio::test]
    async fn test_healthcheck_endpoint() {
        setup_test();
        let port = portpicker::pick_unused_port().unwrap();
        let pool = Arc::new(ProviderPool::new(vec![], ProviderOptions::default()));
        let cancel = CancellationToken::new();

        let server = tokio::spawn(serve(port, pool, cancel.clone()));
        // Give the listener a moment to come up.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let body: Value = reqwest::get(format!("http://127.0.0.1:{port}/healthcheck"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "alive");
        assert!(body["providerStatus"].is_object());

        // Any other path answers 200 with a placeholder body.
        let response = reqwest::get(format!("http://127.0.0.1:{port}/anything"))
            .await
            .unwrap();
        assert!(response.status().is_success());

        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
