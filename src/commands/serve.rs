use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use kube::Client;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tracing::info;

use labondemand::{Config, db, reconciler};

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILE_CYCLES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "labondemand_reconcile_cycles_total",
        "Total reconciler cycles run",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

struct ServeState {
    ready: bool,
}

pub async fn run(addr: String) -> Result<()> {
    let config = Config::from_env();

    println!("Starting labondemand...\n");

    let pool = db::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    print!("  Cluster connection .......... ");
    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {e}. Is the cluster running?");
        }
    }

    LazyLock::force(&RECONCILE_CYCLES_TOTAL);

    let addr: SocketAddr = addr.parse().context("Invalid --addr")?;
    println!("  Reconcile interval ........... {:?}", config.cleanup_interval);
    println!("  Health server ................ http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!("    GET /readyz ............... Readiness probe (503 until first cycle, then 200)");
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("labondemand running. Press Ctrl+C to stop.\n");

    info!("labondemand_started");

    let state = Arc::new(Mutex::new(ServeState { ready: false }));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move { start_health_server(http_state, http_shutdown, addr).await });

    let reconciler_state = state.clone();
    let reconciler_pool = pool.clone();
    let reconciler_client = client.clone();
    let reconciler_config = config.clone();
    let reconciler_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(reconciler_config.cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            reconciler::run_cycle(&reconciler_pool, &reconciler_client, &reconciler_config).await;
            RECONCILE_CYCLES_TOTAL.inc();
            let mut s = reconciler_state.lock().await;
            s.ready = true;
        }
    });

    tokio::select! {
        _ = reconciler_handle => {
            println!("\nReconciler task ended unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            println!("\nShutdown signal received. Stopping labondemand...");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("labondemand_stopped");
    println!("labondemand stopped.");
    Ok(())
}

fn build_health_router(state: Arc<Mutex<ServeState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn start_health_server(
    state: Arc<Mutex<ServeState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_health_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server on {addr}"))?;

    info!(%addr, "health_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<ServeState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
        },
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state(ready: bool) -> Arc<Mutex<ServeState>> {
        Arc::new(Mutex::new(ServeState { ready }))
    }

    #[tokio::test]
    async fn healthz_always_ok() {
        let app = build_health_router(state(false));
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reflects_state() {
        let app = build_health_router(state(false));
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"NOT READY");
    }

    #[tokio::test]
    async fn metrics_returns_ok() {
        let app = build_health_router(state(false));
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
