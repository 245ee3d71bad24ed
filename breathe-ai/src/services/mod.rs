//! Ingestion pipeline services

pub mod audio_store;
pub mod classifier_invoker;
pub mod ingest_orchestrator;
pub mod prediction_recorder;
pub mod result_parser;

pub use audio_store::{AudioStore, StoreError};
pub use classifier_invoker::{ClassifierError, ClassifierInvoker};
pub use ingest_orchestrator::{
    ArtifactSummary, IngestFailure, IngestOrchestrator, IngestOutcome, IngestResponse,
    UploadRequest,
};
pub use prediction_recorder::{PredictionRecorder, RecorderError};
pub use result_parser::ResultError;
