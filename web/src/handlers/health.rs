//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to decide whether to route
//! traffic to this instance.

use axum::{extract::State, http::StatusCode, Json};
use futures::future::join_all;
use serde::Serialize;

use crate::state::AppState;

/// Liveness: the process is up. Checks nothing else.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// One dependency's readiness.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentHealth {
    /// Dependency name.
    pub component: &'static str,
    /// Whether it answered.
    pub healthy: bool,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness report.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// `"ready"` or `"unavailable"`.
    pub status: &'static str,
    /// Per-dependency results.
    pub components: Vec<ComponentHealth>,
}

/// Readiness: every store answers a ping.
///
/// ```text
/// GET /ready
/// ```
///
/// 200 when all probes pass, 503 otherwise.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessReport>) {
    let results = join_all(state.probes.iter().map(|probe| async move {
        match probe.ping().await {
            Ok(()) => ComponentHealth {
                component: probe.component(),
                healthy: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(component = probe.component(), error = %e, "Readiness probe failed");
                ComponentHealth {
                    component: probe.component(),
                    healthy: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }))
    .await;

    let ready = results.iter().all(|c| c.healthy);
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status,
        Json(ReadinessReport {
            status: label,
            components: results,
        }),
    )
}
