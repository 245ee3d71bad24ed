//! Shared fixtures for breathe-ai integration tests
//!
//! Fake classifiers are `/bin/sh` scripts; the artifact path arrives as `$1`.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, Response};
use breathe_ai::config::{ClassifierConfig, StorageConfig};
use breathe_ai::services::{AudioStore, ClassifierInvoker, IngestOrchestrator, PredictionRecorder};
use breathe_ai::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::SqlitePool;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub const BOUNDARY: &str = "breathe-test-boundary-7f3a";

/// Classifier that prints a healthy, well-formed verdict
pub const HEALTHY_CLASSIFIER: &str = r#"printf '%s' '{"riskLevel":"low","healthScore":92.5,"breathingRate":14.2,"oxygenSaturation":97.0,"breathingPattern":"regular","wheezingDetected":false,"cracklingDetected":false,"recommendations":["Maintain regular breathing exercises"]}'"#;

/// Classifier that rejects the recording
pub const FAILING_CLASSIFIER: &str = "echo 'unsupported sample rate' >&2\nexit 1";

/// Classifier whose verdict is out of range
pub const OUT_OF_RANGE_CLASSIFIER: &str = r#"printf '%s' '{"riskLevel":"low","healthScore":150,"breathingRate":14.2,"oxygenSaturation":97.0,"wheezingDetected":false,"cracklingDetected":false}'"#;

/// Classifier that never finishes on its own
pub const HANGING_CLASSIFIER: &str = "sleep 30";

/// Knobs for a test pipeline
#[derive(Debug, Clone)]
pub struct TestOptions {
    pub classifier_script: String,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub max_upload_bytes: u64,
}

impl TestOptions {
    pub fn new(classifier_script: &str) -> Self {
        Self {
            classifier_script: classifier_script.to_string(),
            timeout_secs: 10,
            max_concurrent: 4,
            max_upload_bytes: StorageConfig::default().max_upload_bytes,
        }
    }
}

/// Pipeline wired against a temporary root folder
pub struct TestPipeline {
    pub orchestrator: IngestOrchestrator,
    pub pool: SqlitePool,
    pub uploads: PathBuf,
    pub root: tempfile::TempDir,
}

/// Router plus the state behind it
pub struct TestApp {
    pub router: axum::Router,
    pub state: AppState,
    pub pool: SqlitePool,
    pub uploads: PathBuf,
    pub root: tempfile::TempDir,
}

/// Write a `/bin/sh` classifier script and return its path
pub fn write_classifier(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("classifier.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write classifier script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod classifier script");
    }
    path
}

pub async fn create_test_pipeline(options: TestOptions) -> TestPipeline {
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    let script = write_classifier(root.path(), &options.classifier_script);

    let pool = breathe_ai::db::init_database_pool(&root.path().join("breathemate.db"))
        .await
        .expect("Failed to initialize database");

    let uploads = root.path().join("uploads");
    let store = AudioStore::new(
        &uploads,
        StorageConfig {
            max_upload_bytes: options.max_upload_bytes,
            ..StorageConfig::default()
        },
    )
    .expect("Failed to open audio store");

    let invoker = ClassifierInvoker::new(&ClassifierConfig {
        command: vec!["/bin/sh".to_string(), script.display().to_string()],
        timeout_secs: options.timeout_secs,
        max_concurrent: options.max_concurrent,
        ..ClassifierConfig::default()
    });

    let orchestrator = IngestOrchestrator::new(store, invoker, PredictionRecorder::new(pool.clone()));
    let uploads = orchestrator.store().root().to_path_buf();

    TestPipeline {
        orchestrator,
        pool,
        uploads,
        root,
    }
}

pub async fn create_test_app(options: TestOptions) -> TestApp {
    let max_upload_bytes = options.max_upload_bytes;
    let pipeline = create_test_pipeline(options).await;

    let state = AppState::new(
        pipeline.pool.clone(),
        pipeline.orchestrator,
        CancellationToken::new(),
        max_upload_bytes,
    );
    let router = build_router(state.clone());

    TestApp {
        router,
        state,
        pool: pipeline.pool,
        uploads: pipeline.uploads,
        root: pipeline.root,
    }
}

/// Mono 16-bit WAV with a slow "breathing" amplitude envelope
pub fn generate_breath_wav(duration_seconds: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("Failed to create WAV writer");
        let total_samples = (duration_seconds * spec.sample_rate as f64) as usize;
        for i in 0..total_samples {
            let t = i as f64 / spec.sample_rate as f64;
            let envelope = (t * std::f64::consts::PI / 2.0).sin().abs();
            let noise = ((i * 7919) % 200) as f64 / 200.0 - 0.5;
            let sample = (envelope * noise * 8000.0) as i16;
            writer.write_sample(sample).expect("Failed to write sample");
        }
        writer.finalize().expect("Failed to finalize WAV");
    }
    cursor.into_inner()
}

/// Multipart body with a single file part
pub fn multipart_body(field: &str, filename: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// POST /api/upload-audio with `bytes` in the `audio` part
pub fn upload_request(filename: &str, bytes: &[u8], user_id: Option<&str>) -> Request<Body> {
    raw_upload_request(multipart_body("audio", filename, "audio/wav", bytes), user_id)
}

pub fn raw_upload_request(body: Vec<u8>, user_id: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload-audio")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::CONTENT_LENGTH, body.len());
    if let Some(user_id) = user_id {
        builder = builder.header("x-user-id", user_id);
    }
    builder.body(Body::from(body)).expect("Failed to build request")
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Response is not JSON")
}

/// Names of finished artifacts in the uploads directory
pub fn stored_files(uploads: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(uploads)
        .expect("Failed to list uploads")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

pub async fn record_count(pool: &SqlitePool) -> i64 {
    breathe_ai::db::prediction_history::count_records(pool)
        .await
        .expect("Failed to count records")
}
