use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use parquet::arrow::ArrowWriter;
use playground::config::PlaygroundConfig;
use playground::server::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "playground-test-boundary";

struct TestApp {
    dir: tempfile::TempDir,
    router: Router,
}

impl TestApp {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = PlaygroundConfig {
            data_dir: Some(dir.path().join("data").to_string_lossy().into_owned()),
            ..Default::default()
        };
        let settings = config.resolve().unwrap();
        let state = AppState::open(settings).unwrap();
        Self { dir, router: build_router(Arc::new(state)) }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let (status, _, body) = self.send_with_headers(request).await;
        (status, body)
    }

    async fn send_with_headers(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, body.to_vec())
    }

    async fn json(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes) = self.send(request).await;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    /// Multipart upload; a part with a file name is sent as a file
    async fn upload(&self, uri: &str, parts: &[(&str, Option<&str>, &str)]) -> (StatusCode, Value) {
        let parts: Vec<(&str, Option<&str>, &[u8])> = parts
            .iter()
            .map(|(name, file_name, value)| (*name, *file_name, value.as_bytes()))
            .collect();
        self.upload_bytes(uri, &parts).await
    }

    async fn upload_bytes(&self, uri: &str, parts: &[(&str, Option<&str>, &[u8])]) -> (StatusCode, Value) {
        let mut body: Vec<u8> = Vec::new();
        for (name, file_name, value) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match file_name {
                Some(file_name) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, file_name
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(value);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap();
        let (status, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn ingest_csv(&self, name: &str, contents: &str) -> Value {
        let (status, dataset) = self
            .upload(
                "/api/datasets/ingest",
                &[("file", Some("data.csv"), contents), ("name", None, name)],
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", dataset);
        dataset
    }

    fn data_files(&self, sub: &str) -> usize {
        std::fs::read_dir(self.dir.path().join("data").join(sub)).unwrap().count()
    }

    /// Dataset, experiment and run; returns the run id
    async fn seed_run(&self) -> String {
        let dataset = self.ingest_csv("seed", "x,y\n1,2\n").await;
        let (_, experiment) = self
            .json(
                Method::POST,
                "/api/experiments",
                Some(json!({"name": "e", "task_type": "regression", "dataset_id": id_of(&dataset)})),
            )
            .await;
        let (status, run) = self
            .json(Method::POST, "/api/runs", Some(json!({"name": "r", "experiment_id": id_of(&experiment)})))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", run);
        id_of(&run)
    }
}

fn parquet_bytes() -> Vec<u8> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("x", DataType::Int64, false),
        Field::new("score", DataType::Float64, true),
        Field::new("label", DataType::Utf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(Float64Array::from(vec![Some(0.5), None, Some(1.5)])),
            Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])),
        ],
    )
    .unwrap();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    buffer
}

fn id_of(value: &Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let (status, body) = app.json(Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"]["database"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ingest_preview_and_stats() {
    let app = TestApp::new();
    let dataset = app.ingest_csv("t1", "a,b\n1,x\n2,y\n,z\n").await;
    assert_eq!(dataset["num_rows"], 3);
    assert_eq!(dataset["num_columns"], 2);
    assert_eq!(dataset["status"], "ready");
    let id = id_of(&dataset);

    let (status, rows) = app
        .json(Method::GET, &format!("/api/datasets/{}/preview?n_rows=2", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["a"], 1);
    assert_eq!(rows[0]["b"], "x");

    let (_, stats) = app.json(Method::GET, &format!("/api/datasets/{}/stats", id), None).await;
    let a = &stats["columns"][0];
    assert_eq!(a["name"], "a");
    assert_eq!(a["missing"], 1);
    assert!(a["n_unique"].as_u64().unwrap() <= 2);
}

#[tokio::test]
async fn test_ingest_and_preview_parquet() {
    let app = TestApp::new();
    let bytes = parquet_bytes();
    let (status, dataset) = app
        .upload_bytes(
            "/api/datasets/ingest",
            &[("file", Some("scores.parquet"), bytes.as_slice()), ("name", None, "scores".as_bytes())],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", dataset);
    assert_eq!(dataset["file_type"], "parquet");
    assert_eq!(dataset["num_rows"], 3);
    assert_eq!(dataset["num_columns"], 3);

    let (status, rows) = app
        .json(Method::GET, &format!("/api/datasets/{}/preview?n_rows=2", id_of(&dataset)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["x"], 1);
    assert_eq!(rows[0]["label"], "a");
    assert_eq!(rows[1]["score"], Value::Null);
}

#[tokio::test]
async fn test_ingest_and_preview_json_lines() {
    let app = TestApp::new();
    let (status, dataset) = app
        .upload(
            "/api/datasets/ingest",
            &[
                ("file", Some("events.jsonl"), "{\"kind\": \"click\", \"n\": 3}\n\n{\"kind\": \"view\", \"n\": null}\n"),
                ("name", None, "events"),
                ("target", None, "kind"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", dataset);
    assert_eq!(dataset["file_type"], "jsonl");
    assert_eq!(dataset["num_rows"], 2);
    assert_eq!(dataset["target_column"], "kind");

    let (status, rows) = app
        .json(Method::GET, &format!("/api/datasets/{}/preview", id_of(&dataset)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows, json!([{"kind": "click", "n": 3}, {"kind": "view", "n": null}]));
}

#[tokio::test]
async fn test_large_responses_are_gzipped() {
    let app = TestApp::new();
    let mut csv = String::from("id,label\n");
    for i in 0..300 {
        csv.push_str(&format!("{},label-{}\n", i, i));
    }
    let dataset = app.ingest_csv("wide", &csv).await;

    let gzip_get = |uri: String| {
        Request::builder()
            .uri(uri)
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap()
    };

    let (status, headers, body) = app
        .send_with_headers(gzip_get(format!("/api/datasets/{}/preview?n_rows=300", id_of(&dataset))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
    assert_eq!(&body[..2], &[0x1f, 0x8b]);

    let (status, headers, body) = app.send_with_headers(gzip_get("/api/health".to_string())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_artifact_uri_cannot_reach_into_data_dir() {
    let app = TestApp::new();
    let run_id = app.seed_run().await;
    let secret = app.dir.path().join("secret.txt");
    std::fs::write(&secret, "TOP SECRET").unwrap();

    let data = app.dir.path().join("data");
    let escaping = data.join("artifacts").join("..").join("..").join("secret.txt");
    for uri in [escaping, data.join("runs").join(format!("{}.log", run_id))] {
        let (status, body) = app
            .json(
                Method::POST,
                "/api/artifacts",
                Some(json!({"run_id": run_id, "name": "leak", "uri": uri.to_string_lossy()})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
        assert_eq!(body["kind"], "validation_error");
    }

    // a path outside the data dir is only a reference: never served or deleted
    let (status, artifact) = app
        .json(
            Method::POST,
            "/api/artifacts",
            Some(json!({"run_id": run_id, "name": "external", "uri": secret.to_string_lossy()})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", artifact);
    let uri = format!("/api/artifacts/{}", id_of(&artifact));

    let (status, _) = app.json(Method::GET, &format!("{}/download", uri), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.json(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(std::fs::read_to_string(&secret).unwrap(), "TOP SECRET");
}

#[tokio::test]
async fn test_ingest_rejects_unknown_extension() {
    let app = TestApp::new();
    let (status, body) = app
        .upload(
            "/api/datasets/ingest",
            &[("file", Some("notes.txt"), "hello"), ("name", None, "notes")],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unsupported_format");
    assert_eq!(app.data_files("datasets"), 0);
}

#[tokio::test]
async fn test_ingest_parse_failure_is_validation_error() {
    let app = TestApp::new();
    let (status, body) = app
        .upload(
            "/api/datasets/ingest",
            &[("file", Some("rows.jsonl"), "{\"a\": 1}\nnot json\n"), ("name", None, "rows")],
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
    assert_eq!(app.data_files("datasets"), 0);

    let (_, list) = app.json(Method::GET, "/api/datasets", None).await;
    assert_eq!(list[0]["status"], "error");
}

#[tokio::test]
async fn test_list_pagination() {
    let app = TestApp::new();
    for name in ["first", "second", "third"] {
        app.ingest_csv(name, "x\n1\n").await;
    }

    let (status, page) = app.json(Method::GET, "/api/datasets?skip=1&limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert_eq!(page[0]["name"], "second");

    let (status, body) = app.json(Method::GET, "/api/datasets?limit=many", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn test_experiment_needs_existing_dataset() {
    let app = TestApp::new();
    let (status, body) = app
        .json(
            Method::POST,
            "/api/experiments",
            Some(json!({"name": "e", "task_type": "regression", "dataset_id": "missing"})),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
    let (_, list) = app.json(Method::GET, "/api/experiments", None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/runs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();
    let (status, bytes) = app.send(request).await;
    let body: Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation_error");
}

#[tokio::test]
async fn test_run_lifecycle_and_cascade_delete() {
    let app = TestApp::new();
    let dataset = app.ingest_csv("iris", "sepal,species\n5.1,setosa\n6.2,virginica\n").await;
    let dataset_id = id_of(&dataset);

    let (status, experiment) = app
        .json(
            Method::POST,
            "/api/experiments",
            Some(json!({
                "name": "baseline",
                "task_type": "classification",
                "dataset_id": dataset_id,
                "target_column": "species"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let experiment_id = id_of(&experiment);

    let (status, run) = app
        .json(
            Method::POST,
            "/api/runs",
            Some(json!({"name": "r1", "experiment_id": experiment_id, "status": "running"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(run["start_time"].is_string());
    let run_id = id_of(&run);

    let (_, run) = app
        .json(Method::POST, &format!("/api/runs/{}/metrics", run_id), Some(json!({"acc": 0.9})))
        .await;
    assert_eq!(run["metrics"]["acc"], 0.9);

    let (status, _) = app
        .json(Method::POST, &format!("/api/runs/{}/logs", run_id), Some(json!({"text": "epoch 1"})))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, log) = app.json(Method::GET, &format!("/api/runs/{}/logs", run_id), None).await;
    assert_eq!(log["text"], "epoch 1\n");

    let (status, run) = app
        .json(Method::PATCH, &format!("/api/runs/{}", run_id), Some(json!({"status": "completed"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    let parse = |field: &str| chrono::DateTime::parse_from_rfc3339(run[field].as_str().unwrap()).unwrap();
    assert!(parse("end_time") >= parse("start_time"));

    let (status, body) = app
        .json(Method::PATCH, &format!("/api/runs/{}", run_id), Some(json!({"status": "running"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, artifact) = app
        .upload(
            "/api/artifacts/upload",
            &[
                ("run_id", None, run_id.as_str()),
                ("name", None, "weights"),
                ("artifact_type", None, "model"),
                ("file", Some("weights.bin"), "0101"),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", artifact);
    assert_eq!(artifact["size"], 4);
    let artifact_id = id_of(&artifact);

    let (status, bytes) = app
        .send(
            Request::builder()
                .uri(format!("/api/artifacts/{}/download", artifact_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"0101");

    let (_, runs) = app
        .json(Method::GET, &format!("/api/experiments/{}/runs", experiment_id), None)
        .await;
    assert_eq!(runs.as_array().unwrap().len(), 1);

    let delete_uri = format!("/api/datasets/{}", dataset_id);
    let (status, body) = app.json(Method::DELETE, &delete_uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "conflict");

    let (status, _) = app
        .json(Method::DELETE, &format!("{}?cascade=true", delete_uri), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.json(Method::GET, &delete_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.json(Method::GET, &format!("/api/runs/{}", run_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.data_files("datasets"), 0);
    assert_eq!(app.data_files("artifacts"), 0);
    assert_eq!(app.data_files("runs"), 0);
}

#[tokio::test]
async fn test_cors_preflight_allows_frontend() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/datasets")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:3000");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
}
