mod common;

use axum::{Router, body::Body, http::Request, http::StatusCode};
use http_body_util::BodyExt;
use rustyactivity::activity::{EncodeSpecifications, FileType, ToolMode};
use rustyactivity::config::ServerConfig;
use rustyactivity::dispatcher::Dispatcher;
use rustyactivity::service::{ActivityCodec, ActivityService, EncodeRequest};
use rustyactivity::{AppState, build_app};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{catalog, sample_fit};

const BOUNDARY: &str = "activity-boundary";

fn app_with(dispatcher: Dispatcher) -> Router {
    build_app(AppState::new(dispatcher, &ServerConfig::default()))
}

fn app() -> Router {
    app_with(Dispatcher::with_default_codec())
}

fn multipart_upload(file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/decode")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ready_reports_state() {
    let response = app()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["ready"], json!(true));
    assert_eq!(body["state"], json!("ready"));
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn listings_respond() {
    let app = app();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/manufacturers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert!(!body["manufacturers"].as_array().unwrap().is_empty());

    let response = app
        .oneshot(Request::builder().uri("/sports").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert!(body["sports"].as_array().unwrap().iter().any(|sport| sport["name"] == "Running"));
}

#[tokio::test]
async fn decode_returns_activities_and_overviews() {
    let response = app()
        .oneshot(multipart_upload("run.fit", &sample_fit()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["err"], Value::Null);
    assert_eq!(body["activities"].as_array().unwrap().len(), 1);
    assert!(body["elapsedMs"].is_u64());
    let overviews = body["overviews"].as_array().unwrap();
    assert_eq!(overviews.len(), 1);
    assert_eq!(overviews[0]["sport"], json!("Running"));
    assert_eq!(overviews[0]["lapCount"], json!(2));
}

#[tokio::test]
async fn decode_of_garbage_names_the_file() {
    let response = app()
        .oneshot(multipart_upload("notes.txt", b"just some text"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["operation"], json!("decode"));
    assert_eq!(body["file"], json!("notes.txt"));
    assert!(body["err"].is_string());
}

#[tokio::test]
async fn decode_without_file_is_rejected() {
    let req = Request::builder()
        .method("POST")
        .uri("/decode")
        .header("content-type", "multipart/form-data; boundary=--boundary")
        .body(Body::from("----boundary--"))
        .unwrap();

    let response = app().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["err"], json!("No file provided"));
}

#[tokio::test]
async fn encode_returns_named_files() {
    let decoded = ActivityService::with_catalog(catalog()).decode(&sample_fit());
    let request = EncodeRequest {
        activities: decoded.activities,
        spec: EncodeSpecifications::new(ToolMode::Edit, FileType::Gpx),
    };

    let response = app()
        .oneshot(json_post("/encode", &serde_json::to_value(&request).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["type"], json!("gpx"));
    assert!(files[0]["name"].as_str().unwrap().ends_with("-edit.gpx"));
}

#[tokio::test]
async fn encode_of_invalid_request_is_unprocessable() {
    let response = app()
        .oneshot(json_post("/encode", &json!({ "activities": "none" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["operation"], json!("encode"));
    assert_eq!(body["file"], Value::Null);
}

#[tokio::test]
async fn stopped_codec_is_unavailable() {
    let dispatcher = Dispatcher::with_default_codec();
    dispatcher.shutdown().await;

    let response = app_with(dispatcher)
        .oneshot(Request::builder().uri("/sports").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn failed_codec_start_is_unavailable() {
    let dispatcher = Dispatcher::new(|| Err::<ActivityService, _>("no catalog"));

    let response = app_with(dispatcher)
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = read_json(response).await;
    assert!(body["err"].as_str().unwrap().contains("no catalog"));
}

#[tokio::test]
async fn live_server_decodes_uploads() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Dispatcher::with_default_codec();
    let app = app_with(dispatcher.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    let part = reqwest::multipart::Part::bytes(sample_fit()).file_name("run.fit");
    let form = reqwest::multipart::Form::new().part("file", part);
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/decode"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["activities"][0]["sessions"][0]["sport"], json!("Running"));

    server.abort();
    dispatcher.shutdown().await;
}
