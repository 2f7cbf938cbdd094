//! Parsing of the classifier's text answer into typed labels.
//!
//! Models asked for "only the JSON object" still wrap it in ```json fences,
//! prefix it with a sentence, or answer with the long label names from the
//! prompt's definitions ("UI Defect"). These passes recover the object
//! without loosening the label vocabulary: anything outside
//! `{Content, UI} × {Change, Bug}` is rejected.

use crate::error::ClassificationError;
use crate::output::{DefectType, Nature};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Both labels for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPair {
    pub nature: Nature,
    pub defect_type: DefectType,
}

#[derive(Debug, Deserialize)]
struct RawLabels {
    nature: Option<String>,
    #[serde(rename = "type")]
    defect_type: Option<String>,
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*\n?(.*?)\n?\s*```\s*$").unwrap());

static OBJECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*?\}").unwrap());

/// Parse the model's answer for `record_id`.
pub fn parse_labels(record_id: u32, answer: &str) -> Result<LabelPair, ClassificationError> {
    let unfenced = strip_fences(answer);
    let object = OBJECT_RE
        .find(&unfenced)
        .map(|m| m.as_str())
        .ok_or_else(|| ClassificationError::MalformedResponse {
            record_id,
            detail: format!("no JSON object in {:?}", truncate(answer, 120)),
        })?;

    let raw: RawLabels =
        serde_json::from_str(object).map_err(|e| ClassificationError::MalformedResponse {
            record_id,
            detail: format!("{e} in {:?}", truncate(object, 120)),
        })?;

    let nature_str = raw.nature.ok_or_else(|| ClassificationError::MalformedResponse {
        record_id,
        detail: "missing \"nature\"".into(),
    })?;
    let type_str = raw.defect_type.ok_or_else(|| ClassificationError::MalformedResponse {
        record_id,
        detail: "missing \"type\"".into(),
    })?;

    let nature = nature_str
        .parse::<Nature>()
        .map_err(|value| ClassificationError::UnknownLabel {
            record_id,
            field: "nature".into(),
            value,
        })?;
    let defect_type = type_str
        .parse::<DefectType>()
        .map_err(|value| ClassificationError::UnknownLabel {
            record_id,
            field: "type".into(),
            value,
        })?;

    Ok(LabelPair {
        nature,
        defect_type,
    })
}

fn strip_fences(input: &str) -> String {
    match FENCE_RE.captures(input) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}\u{2026}")
    }
}
