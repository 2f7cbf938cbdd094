//! JSON export: the record list, four-space indented.

use crate::error::ExportError;
use crate::output::AnnotationRecord;
use serde::Serialize;

/// Serialise `records` as a JSON array.
pub fn to_json(records: &[AnnotationRecord]) -> Result<String, ExportError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    records.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|e| ExportError::Json(serde::ser::Error::custom(e)))
}

/// Read records back from [`to_json`] output.
pub fn from_json(text: &str) -> Result<Vec<AnnotationRecord>, ExportError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DefectType, Nature, Rect};
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trip_keeps_records() {
        let records = vec![
            AnnotationRecord {
                id: 1,
                page: 1,
                contents: vec!["Typo".into()],
                authors: vec!["Alice".into()],
                coordinates: Rect::new(10.0, 20.25, 30.0, 40.0),
                image: "aGk=".into(),
                nature: Some(Nature::Content),
                defect_type: Some(DefectType::Bug),
            },
            AnnotationRecord {
                id: 2,
                page: 2,
                contents: vec!["Wrong color".into(), "Agreed".into()],
                authors: vec!["Bob".into(), "Carol".into()],
                coordinates: Rect::new(1.0, 2.0, 3.0, 4.0),
                image: "aGk=".into(),
                nature: None,
                defect_type: None,
            },
        ];
        let text = to_json(&records).unwrap();
        assert!(text.contains("\n    {"));
        assert!(text.contains("\"type\": \"Bug\""));
        assert_eq!(from_json(&text).unwrap(), records);
    }

    #[test]
    fn missing_labels_read_as_none() {
        let text = r#"[{"id":3,"page":1,"contents":["x"],"authors":["y"],
                       "coordinates":[0,0,1,1],"image":""}]"#;
        let records = from_json(text).unwrap();
        assert_eq!(records[0].nature, None);
        assert_eq!(records[0].defect_type, None);
    }
}
