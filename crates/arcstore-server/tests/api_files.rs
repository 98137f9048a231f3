mod common;

use arcstore_records::Label;
use axum::http::{Method, StatusCode};
use common::{get, request, seed_file, send, setup, write_npy, Options};
use serde_json::json;

#[tokio::test]
async fn list_and_filter_files() {
    let app = setup(Options::default()).await;
    seed_file(&app.pool, "exp_a", Label::Arc, 120.0, 5.0).await;
    seed_file(&app.pool, "exp_b", Label::SteadyState, 240.0, 10.0).await;

    let (status, body) = get(&app.router, "/api/files").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["count"], 2);
    assert_eq!(body["files"][0]["filename"], "exp_a");

    let (status, body) = get(&app.router, "/api/files?label=steady_state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["files"][0]["label"], "steady_state");

    assert_eq!(app.pool.stats().in_use, 0, "every lease is returned");
}

#[tokio::test]
async fn get_file_and_missing_file() {
    let app = setup(Options::default()).await;
    let id = seed_file(&app.pool, "exp_a", Label::Arc, 120.0, 5.0).await;

    let (status, body) = get(&app.router, &format!("/api/files/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["file"]["file_id"], id);
    assert_eq!(body["file"]["binary_path"], "exp_a.npy");
    assert_eq!(body["file"]["sampling_rate"], 5_000_000.0);

    let (status, body) = get(&app.router, "/api/files/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");

    let (status, body) = get(&app.router, "/api/files/not-a-number").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn file_data_is_split_by_channel() {
    let app = setup(Options::default()).await;
    let id = seed_file(&app.pool, "exp_a", Label::Arc, 120.0, 5.0).await;
    write_npy(
        app.dir.path(),
        "exp_a.npy",
        &[(1.0, 0.1), (2.0, 0.2), (3.0, 0.3)],
    );

    let (status, body) = get(&app.router, &format!("/api/files/{id}/data")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["samples"], 3);
    assert_eq!(body["data"]["load_voltage"], json!([1.0, 2.0, 3.0]));
    assert_eq!(body["data"]["source_current"], json!([0.1, 0.2, 0.3]));
}

#[tokio::test]
async fn missing_sample_file_is_not_found() {
    let app = setup(Options::default()).await;
    let id = seed_file(&app.pool, "exp_a", Label::Arc, 120.0, 5.0).await;

    let (status, body) = get(&app.router, &format!("/api/files/{id}/data")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn update_label_by_name_or_key() {
    let app = setup(Options::default()).await;
    let id = seed_file(&app.pool, "exp_a", Label::Unknown, 120.0, 5.0).await;
    let uri = format!("/api/files/{id}/label");

    let (status, body) = send(
        &app.router,
        request(Method::PUT, &uri, Some(json!({"label": "weak_arc"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, _) = send(
        &app.router,
        request(Method::PUT, &uri, Some(json!({"label": "3"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&app.router, &format!("/api/files/{id}")).await;
    assert_eq!(body["file"]["label"], "restriking_arc");
}

#[tokio::test]
async fn update_label_rejects_bad_input() {
    let app = setup(Options::default()).await;
    let id = seed_file(&app.pool, "exp_a", Label::Unknown, 120.0, 5.0).await;
    let uri = format!("/api/files/{id}/label");

    let (status, body) = send(&app.router, request(Method::PUT, &uri, Some(json!({})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "missing label in request");

    let (status, _) = send(
        &app.router,
        request(Method::PUT, &uri, Some(json!({"label": "lightning"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app.router,
        request(Method::PUT, "/api/files/404/label", Some(json!({"label": "arc"}))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_transients_replaces_indices() {
    let app = setup(Options::default()).await;
    let id = seed_file(&app.pool, "exp_a", Label::Arc, 120.0, 5.0).await;
    let uri = format!("/api/files/{id}/transients");

    let (status, _) = send(
        &app.router,
        request(
            Method::PUT,
            &uri,
            Some(json!({"transient1": 1000, "transient2": 2000})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get(&app.router, &format!("/api/files/{id}")).await;
    assert_eq!(body["file"]["transient1_index"], 1000);
    assert_eq!(body["file"]["transient2_index"], 2000);
    assert!(body["file"]["transient3_index"].is_null());

    let (status, _) = send(
        &app.router,
        request(Method::PUT, &uri, Some(json!({"transient1": -5}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn search_and_statistics() {
    let app = setup(Options::default()).await;
    seed_file(&app.pool, "bench_1", Label::Arc, 120.0, 5.0).await;
    seed_file(&app.pool, "bench_2", Label::Arc, 480.0, 5.0).await;
    seed_file(&app.pool, "field_1", Label::WeakArc, 120.0, 5.0).await;

    let (status, body) = get(
        &app.router,
        "/api/search?filename=bench&voltage_min=100&voltage_max=200",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["results"][0]["filename"], "bench_1");
    assert_eq!(body["results"][0]["voltage"], 120.0);

    let (status, _) = get(&app.router, "/api/search?voltage_min=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&app.router, "/api/labels/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["statistics"][0], json!({"label": "arc", "count": 2}));
}

#[tokio::test]
async fn label_catalogue_lists_keys_and_schemes() {
    let app = setup(Options::default()).await;

    let (status, body) = get(&app.router, "/api/labels").await;
    assert_eq!(status, StatusCode::OK);
    let labels = body["labels"].as_array().expect("labels array");
    assert_eq!(labels.len(), Label::ALL.len());
    assert_eq!(labels[0]["label"], "arc");
    assert_eq!(labels[0]["key"], "1");
    assert!(labels[9]["key"].is_null());
}
