use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref ACTIVE_CONNECTIONS: IntGauge =
        IntGauge::new("confr_active_connections", "Open client connections")
            .expect("metric can not be created");

    pub static ref ACTIVE_SESSIONS: IntGauge =
        IntGauge::new("confr_active_sessions", "Server sessions with at least one watch request")
            .expect("metric can not be created");

    pub static ref ACTIVE_WATCHERS: IntGauge =
        IntGauge::new("confr_active_watchers", "Keys holding a live store subscription")
            .expect("metric can not be created");

    pub static ref REQUESTS_HANDLED: IntCounterVec = IntCounterVec::new(
        Opts::new("confr_requests_handled", "Requests processed by the handler pool"),
        &["kind"]
    )
    .expect("Should succeed to create metric");

    pub static ref NOTIFICATIONS_FANNED_OUT: IntCounter = IntCounter::new(
        "confr_notifications_fanned_out",
        "Change events delivered to session listeners"
    )
    .expect("metric can not be created");

    pub static ref FRAMING_ERRORS: IntCounter =
        IntCounter::new("confr_framing_errors", "Connections closed on undecodable frames")
            .expect("metric can not be created");

    pub static ref IDLE_CLOSES: IntCounter =
        IntCounter::new("confr_idle_closes", "Connections closed by the idle timeout")
            .expect("metric can not be created");

    pub static ref CLIENT_SESSION_MISMATCHES: IntCounter = IntCounter::new(
        "confr_client_session_mismatches",
        "Responses dropped by clients because of a foreign session id"
    )
    .expect("metric can not be created");

    pub static ref CLIENT_PROTOCOL_VIOLATIONS: IntCounter = IntCounter::new(
        "confr_client_protocol_violations",
        "Values for unwatched keys dropped by clients"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers every collector into [`REGISTRY`]. Safe to call repeatedly.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(ACTIVE_CONNECTIONS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_SESSIONS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_WATCHERS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(REQUESTS_HANDLED.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(NOTIFICATIONS_FANNED_OUT.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(FRAMING_ERRORS.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(IDLE_CLOSES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CLIENT_SESSION_MISMATCHES.clone()))
            .expect("collector can be registered");
        REGISTRY
            .register(Box::new(CLIENT_PROTOCOL_VIOLATIONS.clone()))
            .expect("collector can be registered");
    });
}

/// Serves `/metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics();

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(render_metrics())
}

/// Text exposition of the custom registry
pub fn render_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
