//! Classifier result parser
//!
//! Turns raw classifier stdout into a validated [`PredictionResult`]. The
//! parser is total: every input yields either a result or a typed error.
//!
//! Two failure classes are kept apart:
//! - `ParseError`: output is not a well-formed result (empty, truncated, not
//!   UTF-8, not one JSON object, missing field, wrong type, junk numeric text)
//! - `ValidationError`: well-formed but semantically out of range

use crate::models::{BreathingPattern, IrregularityType, PredictionResult, RawClassifierOutput, Severity};
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

/// Result parsing errors
#[derive(Debug, Error, PartialEq)]
pub enum ResultError {
    #[error("Malformed classifier output: {0}")]
    Parse(String),

    #[error("Invalid classifier result: {0}")]
    Validation(String),
}

impl ResultError {
    /// Stable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            ResultError::Parse(_) => "ParseError",
            ResultError::Validation(_) => "ValidationError",
        }
    }
}

const HEALTH_SCORE_RANGE: (f64, f64) = (0.0, 100.0);
const BREATHING_RATE_RANGE: (f64, f64) = (0.0, 80.0);
const OXYGEN_SATURATION_RANGE: (f64, f64) = (0.0, 100.0);
const AUDIO_DURATION_RANGE: (f64, f64) = (0.0, 3600.0);

/// Parse and validate one classifier run's stdout
pub fn parse(output: &RawClassifierOutput) -> Result<PredictionResult, ResultError> {
    if output.stdout_truncated {
        return Err(ResultError::Parse(format!(
            "output exceeded capture limit ({} bytes kept)",
            output.stdout.len()
        )));
    }

    let text = std::str::from_utf8(&output.stdout)
        .map_err(|e| ResultError::Parse(format!("output is not UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(ResultError::Parse("output is empty".to_string()));
    }

    let value: Value = serde_json::from_str(text).map_err(|e| {
        // Literals such as 1e400 are valid JSON but overflow f64
        if e.is_syntax() && e.to_string().starts_with("number out of range") {
            ResultError::Validation(format!("numeric value out of range: {}", e))
        } else {
            ResultError::Parse(format!("output is not valid JSON: {}", e))
        }
    })?;
    let Value::Object(fields) = value else {
        return Err(ResultError::Parse(format!(
            "expected a JSON object, found {}",
            json_type(&value)
        )));
    };

    let result = PredictionResult {
        risk_level: required(&fields, "riskLevel", categorical::<Severity>)?,
        health_score: required(&fields, "healthScore", |f, v| {
            bounded(f, v, HEALTH_SCORE_RANGE)
        })?,
        breathing_rate: required(&fields, "breathingRate", |f, v| {
            bounded(f, v, BREATHING_RATE_RANGE)
        })?,
        oxygen_saturation: required(&fields, "oxygenSaturation", |f, v| {
            bounded(f, v, OXYGEN_SATURATION_RANGE)
        })?,
        wheezing_detected: required(&fields, "wheezingDetected", boolean)?,
        crackling_detected: required(&fields, "cracklingDetected", boolean)?,
        breathing_pattern: optional(&fields, "breathingPattern", categorical::<BreathingPattern>)?,
        irregularity_type: optional(&fields, "irregularityType", categorical::<IrregularityType>)?,
        stress_level: optional(&fields, "stressLevel", categorical::<Severity>)?,
        recommendations: optional(&fields, "recommendations", recommendations)?.unwrap_or_default(),
        audio_duration_seconds: optional(&fields, "audioDurationSeconds", |f, v| {
            bounded(f, v, AUDIO_DURATION_RANGE)
        })?,
    };

    Ok(result)
}

fn required<T>(
    fields: &Map<String, Value>,
    name: &str,
    convert: impl FnOnce(&str, &Value) -> Result<T, ResultError>,
) -> Result<T, ResultError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(ResultError::Parse(format!(
            "required field '{}' is missing",
            name
        ))),
        Some(value) => convert(name, value),
    }
}

fn optional<T>(
    fields: &Map<String, Value>,
    name: &str,
    convert: impl FnOnce(&str, &Value) -> Result<T, ResultError>,
) -> Result<Option<T>, ResultError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => convert(name, value).map(Some),
    }
}

/// Numeric field: JSON number or a string holding a plain finite number
fn number(name: &str, value: &Value) -> Result<f64, ResultError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric_text(s.trim()),
        other => {
            return Err(ResultError::Parse(format!(
                "field '{}' must be a number, found {}",
                name,
                json_type(other)
            )))
        }
    };

    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ResultError::Parse(format!(
            "field '{}' is not a finite number: {}",
            name, value
        ))),
    }
}

/// Accept only decimal notation (`f64::from_str` also takes "inf" and "NaN")
fn parse_numeric_text(s: &str) -> Option<f64> {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        && s.chars().any(|c| c.is_ascii_digit());
    if plain {
        f64::from_str(s).ok()
    } else {
        None
    }
}

fn bounded(name: &str, value: &Value, (min, max): (f64, f64)) -> Result<f64, ResultError> {
    let n = number(name, value)?;
    if n < min || n > max {
        return Err(ResultError::Validation(format!(
            "field '{}' = {} is outside [{}, {}]",
            name, n, min, max
        )));
    }
    Ok(n)
}

fn boolean(name: &str, value: &Value) -> Result<bool, ResultError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(ResultError::Parse(format!(
            "field '{}' must be a boolean, found {}",
            name, other
        ))),
    }
}

fn categorical<T>(name: &str, value: &Value) -> Result<T, ResultError>
where
    T: FromStr<Err = crate::models::prediction::UnknownVariant>,
{
    match value {
        Value::String(s) => s
            .parse::<T>()
            .map_err(|e| ResultError::Validation(format!("field '{}': {}", name, e))),
        other => Err(ResultError::Parse(format!(
            "field '{}' must be a string, found {}",
            name,
            json_type(other)
        ))),
    }
}

/// List of non-blank strings; a bare string is a one-item list
fn recommendations(name: &str, value: &Value) -> Result<Vec<String>, ResultError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        single @ Value::String(_) => vec![single],
        other => {
            return Err(ResultError::Parse(format!(
                "field '{}' must be a list of strings, found {}",
                name,
                json_type(other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) if s.trim().is_empty() => Err(ResultError::Validation(format!(
                "field '{}' item {} is blank",
                name, i
            ))),
            Value::String(s) => Ok(s.trim().to_string()),
            other => Err(ResultError::Parse(format!(
                "field '{}' item {} must be a string, found {}",
                name,
                i,
                json_type(other)
            ))),
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn raw(stdout: impl Into<Vec<u8>>) -> RawClassifierOutput {
        RawClassifierOutput {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            duration: Duration::from_millis(50),
        }
    }

    fn valid() -> Value {
        json!({
            "riskLevel": "low",
            "healthScore": 92.5,
            "breathingRate": 14.2,
            "oxygenSaturation": 97.0,
            "breathingPattern": "regular",
            "wheezingDetected": false,
            "cracklingDetected": false,
            "recommendations": ["Stay hydrated"]
        })
    }

    fn parse_value(value: &Value) -> Result<PredictionResult, ResultError> {
        parse(&raw(value.to_string()))
    }

    fn with(field: &str, value: Value) -> Value {
        let mut doc = valid();
        doc[field] = value;
        doc
    }

    fn without(field: &str) -> Value {
        let mut doc = valid();
        doc.as_object_mut().unwrap().remove(field);
        doc
    }

    #[test]
    fn test_parse_well_formed_result() {
        let result = parse_value(&valid()).unwrap();
        assert_eq!(result.risk_level, Severity::Low);
        assert_eq!(result.health_score, 92.5);
        assert_eq!(result.breathing_rate, 14.2);
        assert_eq!(result.oxygen_saturation, 97.0);
        assert_eq!(result.breathing_pattern, Some(BreathingPattern::Regular));
        assert!(!result.wheezing_detected);
        assert_eq!(result.recommendations, vec!["Stay hydrated".to_string()]);
        assert_eq!(result.irregularity_type, None);
        assert_eq!(result.audio_duration_seconds, None);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let doc = with("modelVersion", json!("2.1.0"));
        assert!(parse_value(&doc).is_ok());
    }

    #[test]
    fn test_empty_and_whitespace_output() {
        assert!(matches!(parse(&raw("")), Err(ResultError::Parse(_))));
        assert!(matches!(parse(&raw("  \n")), Err(ResultError::Parse(_))));
    }

    #[test]
    fn test_truncated_output_is_parse_error() {
        let mut output = raw(valid().to_string());
        output.stdout_truncated = true;
        assert_eq!(parse(&output).unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_non_utf8_output() {
        assert!(matches!(parse(&raw(vec![0xff, 0xfe, b'{'])), Err(ResultError::Parse(_))));
    }

    #[test]
    fn test_not_a_single_object() {
        assert!(matches!(parse(&raw("[1, 2]")), Err(ResultError::Parse(_))));
        assert!(matches!(parse(&raw("{\"riskLevel\": ")), Err(ResultError::Parse(_))));
        let two = format!("{}\n{}", valid(), valid());
        assert!(matches!(parse(&raw(two)), Err(ResultError::Parse(_))));
        assert!(matches!(parse(&raw("Loading model...")), Err(ResultError::Parse(_))));
    }

    #[test]
    fn test_missing_or_null_required_field_never_defaults() {
        for field in [
            "riskLevel",
            "healthScore",
            "breathingRate",
            "oxygenSaturation",
            "wheezingDetected",
            "cracklingDetected",
        ] {
            let err = parse_value(&without(field)).unwrap_err();
            assert_eq!(err.kind(), "ParseError", "missing {}", field);
            let err = parse_value(&with(field, Value::Null)).unwrap_err();
            assert_eq!(err.kind(), "ParseError", "null {}", field);
        }
    }

    #[test]
    fn test_health_score_above_range_is_validation_error() {
        let err = parse_value(&with("healthScore", json!(150))).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");
        assert!(err.to_string().contains("healthScore"));
    }

    #[test]
    fn test_overflowing_number_literal_is_validation_error() {
        let text = valid().to_string().replace("92.5", "1e400");
        let err = parse(&raw(text)).unwrap_err();
        assert_eq!(err.kind(), "ValidationError");

        // Still malformed when the document is broken
        assert_eq!(parse(&raw("{\"healthScore\": 1e4")).unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn test_every_out_of_range_value_is_validation_error() {
        let cases = [
            ("healthScore", json!(-0.1)),
            ("healthScore", json!(100.01)),
            ("breathingRate", json!(-1)),
            ("breathingRate", json!(81)),
            ("oxygenSaturation", json!(101)),
            ("oxygenSaturation", json!(-5)),
            ("audioDurationSeconds", json!(3601)),
            ("audioDurationSeconds", json!(-1)),
            ("riskLevel", json!("critical")),
            ("stressLevel", json!("extreme")),
            ("breathingPattern", json!("erratic")),
            ("irregularityType", json!("unknown")),
            ("recommendations", json!(["ok", "  "])),
        ];
        for (field, value) in cases {
            let err = parse_value(&with(field, value.clone())).unwrap_err();
            assert_eq!(err.kind(), "ValidationError", "{} = {}", field, value);
        }
    }

    #[test]
    fn test_boundary_values_accepted() {
        let mut doc = valid();
        doc["healthScore"] = json!(0);
        doc["breathingRate"] = json!(80);
        doc["oxygenSaturation"] = json!(100);
        doc["audioDurationSeconds"] = json!(3600);
        let result = parse_value(&doc).unwrap();
        assert_eq!(result.health_score, 0.0);
        assert_eq!(result.breathing_rate, 80.0);
    }

    #[test]
    fn test_numeric_strings() {
        let result = parse_value(&with("breathingRate", json!(" 16.5 "))).unwrap();
        assert_eq!(result.breathing_rate, 16.5);

        for junk in ["12abc", "NaN", "inf", "", "-"] {
            let err = parse_value(&with("breathingRate", json!(junk))).unwrap_err();
            assert_eq!(err.kind(), "ParseError", "{:?}", junk);
        }
    }

    #[test]
    fn test_wrong_types_are_parse_errors() {
        let cases = [
            ("healthScore", json!(true)),
            ("healthScore", json!([90])),
            ("riskLevel", json!(2)),
            ("wheezingDetected", json!(1)),
            ("wheezingDetected", json!("yes")),
            ("recommendations", json!(42)),
            ("recommendations", json!(["ok", 3])),
        ];
        for (field, value) in cases {
            let err = parse_value(&with(field, value.clone())).unwrap_err();
            assert_eq!(err.kind(), "ParseError", "{} = {}", field, value);
        }
    }

    #[test]
    fn test_boolean_strings() {
        let doc = with("wheezingDetected", json!("true"));
        assert!(parse_value(&doc).unwrap().wheezing_detected);
        let doc = with("cracklingDetected", json!("false"));
        assert!(!parse_value(&doc).unwrap().crackling_detected);
    }

    #[test]
    fn test_categoricals_are_case_insensitive() {
        let mut doc = valid();
        doc["riskLevel"] = json!("HIGH");
        doc["stressLevel"] = json!("Moderate");
        doc["irregularityType"] = json!("Tachypnea");
        let result = parse_value(&doc).unwrap();
        assert_eq!(result.risk_level, Severity::High);
        assert_eq!(result.stress_level, Some(Severity::Moderate));
        assert_eq!(result.irregularity_type, Some(IrregularityType::Tachypnea));
    }

    #[test]
    fn test_recommendations_shapes() {
        let result = parse_value(&with("recommendations", json!("See a doctor"))).unwrap();
        assert_eq!(result.recommendations, vec!["See a doctor".to_string()]);

        let result = parse_value(&without("recommendations")).unwrap();
        assert!(result.recommendations.is_empty());
    }
}
