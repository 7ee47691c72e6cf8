//! Health Routes
//!
//! - GET /alive - plain-text liveness answer for Graphite tooling
//! - GET /health/live - Liveness check (process is alive)
//! - GET /health/ready - Readiness with cache statistics

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{CachesDto, HealthResponse};
use crate::api::state::AppState;

pub async fn alive() -> &'static str {
    "carbonhouse is alive.\n"
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.engine.stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        cluster: state.engine.cluster().identity(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        caches: CachesDto {
            find: stats.find.into(),
            render: stats.render.into(),
            autocomplete: stats.autocomplete.into(),
        },
        compiled_patterns: stats.compiled_patterns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        assert_eq!(liveness().await, StatusCode::OK);
        assert!(alive().await.contains("alive"));
    }
}
