//! Localhost control API for the monitor.
//!
//! Binds to 127.0.0.1:9191 by default (`[control] bind`).
//! Routes:
//!   GET    /api/v1/status                  - connection, counters, reader status
//!   POST   /api/v1/connect                 - open both transports (`{reader_id?}`)
//!   POST   /api/v1/disconnect              - close both transports, stop timers
//!   GET    /api/v1/reads                   - per-tag read table
//!   DELETE /api/v1/reads                   - clear read table and total
//!   GET    /api/v1/events                  - recent event log, newest first
//!   DELETE /api/v1/events                  - clear event log
//!   GET    /api/v1/cases                   - list cases
//!   POST   /api/v1/cases                   - add a case
//!   DELETE /api/v1/cases/{id}              - remove a case
//!   POST   /api/v1/cases/{id}/expired      - toggle a product tag's expired flag
//!   PUT    /api/v1/cases/import            - replace cases from text (replace-on-success)
//!   GET    /api/v1/cases/export            - cases as text
//!   GET    /api/v1/reconciliation          - per-case and aggregate status
//!   PUT    /api/v1/simulation              - reconcile against a fixed tag list
//!   DELETE /api/v1/simulation              - back to live reads
//!   GET    /api/v1/base-url                - effective upstream base URL
//!   PUT    /api/v1/base-url                - persist a new upstream base URL
//!   GET    /api/v1/readers                 - device passthrough
//!   GET    /api/v1/antennas                - device passthrough
//!   POST   /api/v1/readers/{id}/{action}   - start|stop|reset|reboot|reset-antennas
//!   GET    /api/v1/stream                  - SSE of UI events

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tag_core::Case;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::case_book::CaseBookError;
use crate::devices::{Antenna, DeviceError, Reader};
use crate::monitor::{Monitor, MonitorError};
use crate::reads::{EventLogEntry, TagReadRecord};

// ---------------------------------------------------------------------------
// Request/Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub reader_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseRequest {
    pub master_tag: String,
    #[serde(default)]
    pub product_tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpiredRequest {
    pub tag: String,
}

#[derive(Debug, Serialize)]
pub struct ExpiredResponse {
    pub tag: String,
    pub expired: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    pub tags: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BaseUrlBody {
    pub base_url: String,
}

#[derive(Debug, Serialize)]
pub struct ReadsResponse {
    pub total_reads: u64,
    pub reads: Vec<TagReadRecord>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events_received: u64,
    pub events: Vec<EventLogEntry>,
}

#[derive(Debug, Serialize)]
pub struct CasesResponse {
    pub cases: Vec<Case>,
}

#[derive(Debug, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Debug, Serialize)]
pub struct ReadersResponse {
    pub readers: Vec<Reader>,
}

#[derive(Debug, Serialize)]
pub struct AntennasResponse {
    pub antennas: Vec<Antenna>,
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn case_book_status(e: &CaseBookError) -> StatusCode {
    match e {
        CaseBookError::NotFound(_) => StatusCode::NOT_FOUND,
        CaseBookError::Case(_) | CaseBookError::EmptyImport => StatusCode::BAD_REQUEST,
        CaseBookError::Store(_) | CaseBookError::Json(_) | CaseBookError::Poisoned => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_status(e: &MonitorError) -> StatusCode {
    match e {
        MonitorError::InvalidBaseUrl(_) => StatusCode::BAD_REQUEST,
        MonitorError::Cases(e) => case_book_status(e),
        MonitorError::Device(DeviceError::UnknownAction(_)) => StatusCode::BAD_REQUEST,
        MonitorError::Device(DeviceError::Http(_) | DeviceError::Status { .. }) => {
            StatusCode::BAD_GATEWAY
        }
        MonitorError::Device(DeviceError::InvalidUrl(_))
        | MonitorError::Store(_)
        | MonitorError::Channel(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: MonitorError) -> Response {
    (error_status(&e), e.to_string()).into_response()
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

async fn get_status(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(monitor.status())
}

async fn post_connect(State(monitor): State<Arc<Monitor>>, body: Bytes) -> impl IntoResponse {
    let request: ConnectRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ConnectRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    };
    monitor.connect(request.reader_id.as_deref());
    info!("connect requested");
    (StatusCode::ACCEPTED, Json(monitor.status())).into_response()
}

async fn post_disconnect(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    monitor.disconnect();
    info!("disconnect requested");
    Json(monitor.status())
}

async fn get_reads(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    let total_reads = monitor.status().total_reads;
    Json(ReadsResponse {
        total_reads,
        reads: monitor.reads(),
    })
}

async fn delete_reads(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    monitor.clear_reads();
    StatusCode::NO_CONTENT
}

async fn get_events(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    let events_received = monitor.status().events_received;
    Json(EventsResponse {
        events_received,
        events: monitor.events(),
    })
}

async fn delete_events(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    monitor.clear_events();
    StatusCode::NO_CONTENT
}

async fn get_cases(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(CasesResponse {
        cases: monitor.cases().list(),
    })
}

async fn post_case(
    State(monitor): State<Arc<Monitor>>,
    Json(body): Json<CaseRequest>,
) -> impl IntoResponse {
    match monitor.cases().add(&body.master_tag, &body.product_tags) {
        Ok(case) => (StatusCode::CREATED, Json(case)).into_response(),
        Err(e) => error_response(e.into()),
    }
}

async fn delete_case(
    State(monitor): State<Arc<Monitor>>,
    Path(case_id): Path<String>,
) -> impl IntoResponse {
    match monitor.cases().remove(&case_id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e.into()),
    }
}

async fn post_case_expired(
    State(monitor): State<Arc<Monitor>>,
    Path(case_id): Path<String>,
    Json(body): Json<ExpiredRequest>,
) -> impl IntoResponse {
    match monitor.cases().toggle_expired(&case_id, &body.tag) {
        Ok(expired) => Json(ExpiredResponse {
            tag: body.tag.trim().to_owned(),
            expired,
        })
        .into_response(),
        Err(e) => error_response(e.into()),
    }
}

async fn put_cases_import(State(monitor): State<Arc<Monitor>>, body: String) -> impl IntoResponse {
    match monitor.cases().import_text(&body) {
        Ok(imported) => Json(ImportResponse { imported }).into_response(),
        Err(e) => error_response(e.into()),
    }
}

async fn get_cases_export(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        monitor.cases().export_text(),
    )
}

async fn get_reconciliation(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(monitor.reconciliation())
}

async fn put_simulation(
    State(monitor): State<Arc<Monitor>>,
    Json(body): Json<SimulationRequest>,
) -> impl IntoResponse {
    let tags = monitor.set_simulation(&body.tags);
    Json(SimulationResponse { tags })
}

async fn delete_simulation(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    monitor.clear_simulation();
    StatusCode::NO_CONTENT
}

async fn get_base_url(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    Json(BaseUrlBody {
        base_url: monitor.base_url(),
    })
}

async fn put_base_url(
    State(monitor): State<Arc<Monitor>>,
    Json(body): Json<BaseUrlBody>,
) -> impl IntoResponse {
    match monitor.set_base_url(&body.base_url) {
        Ok(base_url) => Json(BaseUrlBody { base_url }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_readers(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    match monitor.list_readers().await {
        Ok(readers) => Json(ReadersResponse { readers }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_antennas(State(monitor): State<Arc<Monitor>>) -> impl IntoResponse {
    match monitor.list_antennas().await {
        Ok(antennas) => Json(AntennasResponse { antennas }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn post_reader_command(
    State(monitor): State<Arc<Monitor>>,
    Path((reader_id, action)): Path<(String, String)>,
) -> impl IntoResponse {
    match monitor.reader_command(&reader_id, &action).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// ---------------------------------------------------------------------------
// Router builder
// ---------------------------------------------------------------------------

pub fn build_router(monitor: Arc<Monitor>) -> Router {
    Router::new()
        .route("/api/v1/status",                 get(get_status))
        .route("/api/v1/connect",                post(post_connect))
        .route("/api/v1/disconnect",             post(post_disconnect))
        .route("/api/v1/reads",                  get(get_reads).delete(delete_reads))
        .route("/api/v1/events",                 get(get_events).delete(delete_events))
        .route("/api/v1/cases",                  get(get_cases).post(post_case))
        .route("/api/v1/cases/import",           put(put_cases_import))
        .route("/api/v1/cases/export",           get(get_cases_export))
        .route("/api/v1/cases/{id}",             delete(delete_case))
        .route("/api/v1/cases/{id}/expired",     post(post_case_expired))
        .route("/api/v1/reconciliation",         get(get_reconciliation))
        .route("/api/v1/simulation",             put(put_simulation).delete(delete_simulation))
        .route("/api/v1/base-url",               get(get_base_url).put(put_base_url))
        .route("/api/v1/readers",                get(get_readers))
        .route("/api/v1/antennas",               get(get_antennas))
        .route("/api/v1/readers/{id}/{action}",  post(post_reader_command))
        .route("/api/v1/stream",                 get(crate::sse::monitor_sse))
        .layer(TraceLayer::new_for_http())
        .with_state(monitor)
}
