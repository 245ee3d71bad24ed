//! Prediction result and history record
//!
//! `PredictionResult` only exists in validated form: the result parser is the
//! sole producer, and every numeric field is within its bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error for a categorical value outside its enumerated set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub value: String,
    pub expected: &'static [&'static str],
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized value '{}' (expected one of: {})",
            self.value,
            self.expected.join(", ")
        )
    }
}

impl std::error::Error for UnknownVariant {}

/// Generates a lowercase-serialized enum with `as_str` and case-insensitive `FromStr`
macro_rules! categorical {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownVariant {
                        value: s.to_string(),
                        expected: Self::VALUES,
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

categorical! {
    /// Three-step scale used for risk level and stress level
    pub enum Severity {
        Low => "low",
        Moderate => "moderate",
        High => "high",
    }
}

categorical! {
    pub enum BreathingPattern {
        Regular => "regular",
        Irregular => "irregular",
        Shallow => "shallow",
        Rapid => "rapid",
        Labored => "labored",
    }
}

categorical! {
    pub enum IrregularityType {
        Apnea => "apnea",
        Tachypnea => "tachypnea",
        Bradypnea => "bradypnea",
        Hyperventilation => "hyperventilation",
        Periodic => "periodic",
    }
}

/// Validated classifier outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub risk_level: Severity,
    /// 0..=100
    pub health_score: f64,
    /// Breaths per minute, 0..=80
    pub breathing_rate: f64,
    /// Percent, 0..=100
    pub oxygen_saturation: f64,
    pub breathing_pattern: Option<BreathingPattern>,
    pub wheezing_detected: bool,
    pub crackling_detected: bool,
    pub irregularity_type: Option<IrregularityType>,
    pub stress_level: Option<Severity>,
    pub recommendations: Vec<String>,
    /// Seconds, 0..=3600
    pub audio_duration_seconds: Option<f64>,
}

/// Caller-supplied context for a history record
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub request_id: Uuid,
    /// Authenticated user, if the caller scopes history per user
    pub user_id: Option<String>,
    /// Wall-clock time spent in the classifier
    pub classifier_duration_ms: u64,
}

/// Durable record of one completed prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionHistoryRecord {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub original_filename: String,
    pub stored_path: String,
    pub content_sha256: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: PredictionResult,
    pub classifier_duration_ms: u64,
}
