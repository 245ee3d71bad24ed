//! Data models for audio ingestion

pub mod classifier_output;
pub mod ingest_state;
pub mod prediction;
pub mod uploaded_audio;

pub use classifier_output::RawClassifierOutput;
pub use ingest_state::{IngestRun, IngestStage, IngestState, StateTransition};
pub use prediction::{
    BreathingPattern, IrregularityType, PredictionHistoryRecord, PredictionResult,
    RequestMetadata, Severity,
};
pub use uploaded_audio::{StoredRef, UploadedAudio};
