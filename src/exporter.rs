//! Prometheus scrape endpoint.

use crate::metrics::PrometheusSink;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub fn router(sink: Arc<PrometheusSink>) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(sink)
}

async fn render(State(sink): State<Arc<PrometheusSink>>) -> Response {
    match sink.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("failed to encode metrics: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind the metrics endpoint. Binding happens before serving so that an
/// unavailable address fails startup.
pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving metrics on /metrics");
    Ok(listener)
}

/// Serve `/metrics` until the listener fails.
pub async fn serve(listener: TcpListener, sink: Arc<PrometheusSink>) -> io::Result<()> {
    axum::serve(listener, router(sink)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Gauge, MeasurementSink};
    use axum::body::to_bytes;

    #[tokio::test]
    async fn renders_current_metrics() {
        let sink = Arc::new(PrometheusSink::new().unwrap());
        sink.set_gauge(Gauge::Temperature, &["bedroom"], 66.5);

        let response = render(State(sink)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_FORMAT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("temperature{name=\"bedroom\"} 66.5"));
    }

    #[tokio::test]
    async fn bind_reports_local_address() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
