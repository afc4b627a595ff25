//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the catalog and every backend

use crate::services::gateway::Gateway;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness check; always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness check that:
/// 1. Runs a lightweight query against the SQLite catalog (`SELECT 1`).
/// 2. Asks every configured backend for a health round trip; disk backends
///    write, read back and delete a scratch file under their root.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(gateway): State<Gateway>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    let sqlite_check = match gateway.catalog.ping().await {
        Ok(1) => CheckStatus {
            ok: true,
            error: None,
        },
        Ok(v) => CheckStatus {
            ok: false,
            error: Some(format!("unexpected result: {}", v)),
        },
        Err(e) => CheckStatus {
            ok: false,
            error: Some(format!("error: {}", e)),
        },
    };
    checks.insert("sqlite".to_string(), sqlite_check);

    for adapter in gateway.backends.adapters() {
        let check = match adapter.health_check().await {
            Ok(()) => CheckStatus {
                ok: true,
                error: None,
            },
            Err(e) => CheckStatus {
                ok: false,
                error: Some(e.to_string()),
            },
        };
        checks.insert(format!("backend:{}", adapter.name()), check);
    }

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
        backends: gateway.backends.names(),
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<String, CheckStatus>,
    backends: Vec<String>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
