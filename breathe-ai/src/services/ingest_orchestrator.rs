//! Ingestion orchestrator
//!
//! Sequences one upload through store → classify → parse → record and
//! reports exactly which stage failed. Nothing is retried. A record is only
//! written once every earlier stage succeeded, and a failed classification
//! leaves the stored artifact in place.

use crate::models::{
    IngestRun, IngestStage, IngestState, PredictionHistoryRecord, RequestMetadata,
    StateTransition, UploadedAudio,
};
use crate::services::audio_store::AudioStore;
use crate::services::classifier_invoker::ClassifierInvoker;
use crate::services::prediction_recorder::PredictionRecorder;
use crate::services::result_parser;
use axum::body::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest stdout excerpt logged when parsing fails
const STDOUT_LOG_EXCERPT: usize = 512;

/// One upload to ingest
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
    pub user_id: Option<String>,
}

/// Why and where a request failed
#[derive(Debug, Clone)]
pub struct IngestFailure {
    /// Stage that was being attempted
    pub stage: IngestStage,
    pub kind: &'static str,
    pub message: String,
}

/// Stored artifact as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSummary {
    pub stored_name: String,
    pub size_bytes: u64,
    pub content_sha256: String,
}

impl From<&UploadedAudio> for ArtifactSummary {
    fn from(upload: &UploadedAudio) -> Self {
        Self {
            stored_name: upload.stored.stored_name.clone(),
            size_bytes: upload.size_bytes,
            content_sha256: upload.sha256.clone(),
        }
    }
}

/// Final result of one ingestion request
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub request_id: Uuid,
    pub state: IngestState,
    /// Present once the store stage succeeded, including on later failures
    pub artifact: Option<ArtifactSummary>,
    pub result: Result<PredictionHistoryRecord, IngestFailure>,
    /// Every state change the request went through, in order
    pub transitions: Vec<StateTransition>,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Client-facing response body for an upload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub request_id: Uuid,
    pub stage: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction_result: Option<crate::models::PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<IngestOutcome> for IngestResponse {
    fn from(outcome: IngestOutcome) -> Self {
        let stage = outcome.state.stage().as_str();
        match outcome.result {
            Ok(record) => Self {
                request_id: outcome.request_id,
                stage,
                success: true,
                record_id: Some(record.id),
                prediction_result: Some(record.result),
                artifact: outcome.artifact,
                error_kind: None,
                error_message: None,
            },
            Err(failure) => Self {
                request_id: outcome.request_id,
                stage,
                success: false,
                prediction_result: None,
                record_id: None,
                artifact: outcome.artifact,
                error_kind: Some(failure.kind),
                error_message: Some(failure.message),
            },
        }
    }
}

/// Runs the ingestion pipeline
#[derive(Debug, Clone)]
pub struct IngestOrchestrator {
    store: AudioStore,
    invoker: ClassifierInvoker,
    recorder: PredictionRecorder,
}

impl IngestOrchestrator {
    pub fn new(store: AudioStore, invoker: ClassifierInvoker, recorder: PredictionRecorder) -> Self {
        Self {
            store,
            invoker,
            recorder,
        }
    }

    pub fn store(&self) -> &AudioStore {
        &self.store
    }

    pub fn invoker(&self) -> &ClassifierInvoker {
        &self.invoker
    }

    pub fn recorder(&self) -> &PredictionRecorder {
        &self.recorder
    }

    /// Ingest one upload
    pub async fn handle(&self, request: UploadRequest, cancel: &CancellationToken) -> IngestOutcome {
        let mut run = IngestRun::new();
        let request_id = run.request_id;

        info!(
            request_id = %request_id,
            filename = %request.original_filename,
            size_bytes = request.bytes.len(),
            "Upload received"
        );

        // Stored
        let upload = match self
            .store
            .save(
                &request.original_filename,
                request.content_type.as_deref(),
                &request.bytes,
            )
            .await
        {
            Ok(upload) => upload,
            Err(e) => return fail(run, IngestStage::Stored, e.kind(), e.to_string(), None),
        };
        run.advance(IngestStage::Stored);
        let artifact = Some(ArtifactSummary::from(&upload));

        // Classified
        let raw = match self
            .invoker
            .run(&upload.stored, self.invoker.default_timeout(), cancel)
            .await
        {
            Ok(raw) => raw,
            Err(e) => return fail(run, IngestStage::Classified, e.kind(), e.to_string(), artifact),
        };
        run.advance(IngestStage::Classified);

        // Parsed
        let prediction = match result_parser::parse(&raw) {
            Ok(prediction) => prediction,
            Err(e) => {
                debug!(
                    request_id = %request_id,
                    stdout = %excerpt(&raw.stdout),
                    "Rejected classifier output"
                );
                return fail(run, IngestStage::Parsed, e.kind(), e.to_string(), artifact);
            }
        };
        run.advance(IngestStage::Parsed);

        // Recorded
        let metadata = RequestMetadata {
            request_id,
            user_id: request.user_id,
            classifier_duration_ms: raw.duration.as_millis() as u64,
        };
        let record = match self.recorder.persist(&prediction, &upload, &metadata).await {
            Ok(record) => record,
            Err(e) => return fail(run, IngestStage::Recorded, e.kind(), e.to_string(), artifact),
        };
        run.advance(IngestStage::Recorded);
        run.advance(IngestStage::Responded);

        info!(
            request_id = %request_id,
            record_id = %record.id,
            classifier_ms = metadata.classifier_duration_ms,
            elapsed_ms = run.elapsed_ms(),
            "Upload ingested"
        );

        let (state, transitions) = run.finish();
        IngestOutcome {
            request_id,
            state,
            artifact,
            result: Ok(record),
            transitions,
        }
    }
}

fn fail(
    mut run: IngestRun,
    stage: IngestStage,
    kind: &'static str,
    message: String,
    artifact: Option<ArtifactSummary>,
) -> IngestOutcome {
    run.fail(stage, kind);
    warn!(
        request_id = %run.request_id,
        stage = stage.as_str(),
        error_kind = kind,
        artifact_kept = artifact.is_some(),
        elapsed_ms = run.elapsed_ms(),
        "Upload failed: {}",
        message
    );

    let request_id = run.request_id;
    let (state, transitions) = run.finish();
    IngestOutcome {
        request_id,
        state,
        artifact,
        result: Err(IngestFailure {
            stage,
            kind,
            message,
        }),
        transitions,
    }
}

fn excerpt(bytes: &[u8]) -> String {
    let end = bytes.len().min(STDOUT_LOG_EXCERPT);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
