//! HTTP surface: a liveness route and the contract submission endpoint.
//!
//! The handler does no pipeline work of its own. It decodes, validates, and
//! hands the contract to the shared [`Orchestrator`], then maps the outcome
//! onto the JSON responses the contract UI expects.

use crate::contract::ContractRequest;
use crate::error::error_chain;
use crate::orchestrator::Orchestrator;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, ORIGIN};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Origins allowed to call the API when none are configured.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "https://rds-contracts-ui.vercel.app",
];

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

/// Build the router with CORS for `allowed_origins` and request tracing.
///
/// Fails if an origin is not a valid header value.
pub fn router(
    state: AppState,
    allowed_origins: &[String],
) -> Result<Router, axum::http::header::InvalidHeaderValue> {
    Ok(Router::new()
        .route("/", get(hello))
        .route("/newcontract", post(new_contract))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origins)?)
        .with_state(state))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let origins = allowed_origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ORIGIN, CONTENT_TYPE, ACCEPT])
        .expose_headers([CONTENT_LENGTH])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600)))
}

async fn hello() -> &'static str {
    "Hello, world!"
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn new_contract(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ContractRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejected unparseable contract body");
            return error_response(StatusCode::BAD_REQUEST, "Failed to parse JSON");
        }
    };

    let contract = match request.validate() {
        Ok(contract) => contract,
        Err(e) => {
            debug!(reason = %e, "Rejected invalid contract");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match state.orchestrator.publish(&contract).await {
        Ok(published) => {
            info!(form_id = %published.form_id, run_id = %published.run_id, "Contract published");
            (
                StatusCode::OK,
                Json(json!({
                    "message": "Contract created successfully",
                    "formId": published.form_id,
                })),
            )
                .into_response()
        }
        Err(e) => {
            let chain = error_chain(&e);
            error!(stage = %e.stage(), error = %chain, "Contract publication failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed while creating google form with err : {chain}"),
            )
        }
    }
}
