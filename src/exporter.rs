use crate::{
    metrics::{REGISTRY, encode_metrics, probe_registry},
    report,
    tls::ModuleConfig,
};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use std::{net::IpAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;

/// Settings every `/probe` request runs with
#[derive(Debug, Clone)]
pub struct Exporter {
    pub module: ModuleConfig,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ProbeQuery {
    target: Option<String>,
}

/// Build the exporter routes
#[must_use]
pub fn router(exporter: Exporter) -> Router {
    Router::new()
        .route("/probe", get(probe_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(exporter))
}

/// Start the exporter
///
/// # Errors
///
/// Returns an error if the service fails to start or bind to the port
pub async fn start(listen: Option<IpAddr>, port: u16, exporter: Exporter) -> anyhow::Result<()> {
    // Bind to socket with smart fallback
    let (listener, bind_addr) = match listen {
        Some(addr) => {
            // Explicit address specified - bind to it
            let socket_addr = (addr, port);
            let listener = TcpListener::bind(socket_addr).await?;
            (listener, listener_addr(addr, port))
        }
        None => {
            // Auto mode: try IPv6 first, fallback to IPv4
            if let Ok(l) = TcpListener::bind(format!("[::]:{port}")).await {
                (l, format!("[::]:{port}"))
            } else {
                let socket_addr = format!("0.0.0.0:{port}");
                (TcpListener::bind(&socket_addr).await?, socket_addr)
            }
        }
    };

    println!(
        "{} - Listening on {}, probe timeout: {}s",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        bind_addr,
        exporter.timeout.as_secs()
    );

    axum::serve(listener, router(exporter).into_make_service()).await?;

    Ok(())
}

fn listener_addr(addr: IpAddr, port: u16) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

async fn probe_handler(
    State(exporter): State<Arc<Exporter>>,
    Query(query): Query<ProbeQuery>,
) -> impl IntoResponse {
    let Some(target) = query.target.filter(|target| !target.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            b"Target parameter is missing".to_vec(),
        );
    };

    let (outcome, seconds) = report::run(&target, &exporter.module, exporter.timeout).await;

    match probe_registry(&outcome, seconds).map(|registry| encode_metrics(&registry)) {
        Ok(Ok(buffer)) => (StatusCode::OK, buffer),
        Ok(Err(e)) => {
            eprintln!("{e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
        Err(e) => {
            eprintln!("could not build probe metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics(&REGISTRY) {
        Ok(buffer) => (StatusCode::OK, buffer),
        Err(e) => {
            eprintln!("{e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}
