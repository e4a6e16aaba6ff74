pub mod activity;
pub mod analytics;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod service;
pub mod toolkit;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use analytics::SessionOverview;
use config::ServerConfig;
use dispatcher::protocol::{RequestId, Timed};
use dispatcher::{DispatchError, Dispatcher, ServiceState};
use service::DecodeResult;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, config: &ServerConfig) -> Self {
        AppState {
            dispatcher,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/ready", get(ready))
        .route("/decode", post(decode))
        .route("/encode", post(encode))
        .route("/manufacturers", get(manufacturers))
        .route("/sports", get(sports))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A codec result with the dispatcher's own timing next to it.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Reply<T> {
    request_id: RequestId,
    elapsed_ms: u64,
    #[serde(flatten)]
    result: T,
}

impl<T> From<Timed<T>> for Reply<T> {
    fn from(timed: Timed<T>) -> Self {
        Reply {
            request_id: timed.request_id,
            elapsed_ms: timed.elapsed_ms(),
            result: timed.result,
        }
    }
}

#[derive(Serialize)]
struct DecodeBody {
    #[serde(flatten)]
    result: DecodeResult,
    overviews: Vec<SessionOverview>,
}

#[derive(Serialize)]
struct ReadyBody {
    ready: bool,
    state: ServiceState,
}

async fn ready(State(state): State<AppState>) -> Response {
    match state.dispatcher.is_ready().await {
        Ok(timed) => {
            let body = Reply {
                request_id: timed.request_id,
                elapsed_ms: timed.elapsed_ms(),
                result: ReadyBody {
                    ready: timed.result,
                    state: state.dispatcher.state(),
                },
            };
            Json(body).into_response()
        }
        Err(err) => dispatch_failure(err),
    }
}

async fn decode(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut uploaded: Option<(String, Vec<u8>)> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        match field.bytes().await {
            Ok(bytes) => uploaded = Some((name, bytes.to_vec())),
            Err(err) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "err": format!("Failed to read uploaded file: {err}") })),
                )
                    .into_response();
            }
        }
    }

    let Some((name, bytes)) = uploaded else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "err": "No file provided" })),
        )
            .into_response();
    };

    match state.dispatcher.decode(bytes).await {
        Ok(timed) => {
            if let Some(err) = &timed.result.err {
                return codec_failure("decode", Some(&name), err);
            }
            let overviews = analytics::overview(&timed.result.activities);
            let reply = Reply {
                request_id: timed.request_id,
                elapsed_ms: timed.elapsed_ms(),
                result: DecodeBody {
                    result: timed.result,
                    overviews,
                },
            };
            Json(reply).into_response()
        }
        Err(err) => dispatch_failure(err),
    }
}

async fn encode(State(state): State<AppState>, Json(request): Json<Value>) -> Response {
    match state.dispatcher.encode_value(request).await {
        Ok(timed) => {
            if let Some(err) = &timed.result.err {
                return codec_failure("encode", None, err);
            }
            Json(Reply::from(timed)).into_response()
        }
        Err(err) => dispatch_failure(err),
    }
}

async fn manufacturers(State(state): State<AppState>) -> Response {
    match state.dispatcher.manufacturer_list().await {
        Ok(timed) => Json(Reply::from(timed)).into_response(),
        Err(err) => dispatch_failure(err),
    }
}

async fn sports(State(state): State<AppState>) -> Response {
    match state.dispatcher.sport_list().await {
        Ok(timed) => Json(Reply::from(timed)).into_response(),
        Err(err) => dispatch_failure(err),
    }
}

fn codec_failure(operation: &str, file: Option<&str>, err: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "operation": operation, "file": file, "err": err })),
    )
        .into_response()
}

fn dispatch_failure(err: DispatchError) -> Response {
    let status = match err {
        DispatchError::Unavailable | DispatchError::Initialization(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DispatchError::Protocol(_) => StatusCode::BAD_GATEWAY,
        DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
    };
    tracing::warn!(error = %err, status = status.as_u16(), "dispatch failed");
    (status, Json(json!({ "err": err.to_string() }))).into_response()
}

