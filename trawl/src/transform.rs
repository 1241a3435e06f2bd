//! Record transformation stage.

use serde_json::{Map, Value};

/// One record of a CloudTrail log file.
pub type LogRecord = Map<String, Value>;

/// A record shaped for the destination index.
pub type Document = Map<String, Value>;

/// Pure mapping from one extracted record to zero or more output records.
///
/// Implementations do no I/O and never fail; malformed input is filtered
/// out during extraction.
pub trait Transform: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn transform(&self, input: Self::Input) -> Vec<Self::Output>;
}

const USER_IDENTITY: &str = "userIdentity";
const SESSION_CONTEXT: &str = "sessionContext";
const REQUEST_PARAMETERS: &str = "requestParameters";
const RESPONSE_ELEMENTS: &str = "responseElements";
const RAW: &str = "raw";

/// Reshapes CloudTrail records for indexing.
///
/// Free-form nested objects (`userIdentity.sessionContext`,
/// `requestParameters`, `responseElements`) are stored as JSON strings so
/// their thousands of distinct keys do not end up in the index mapping.
/// The untouched record is kept as a JSON string in `raw`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudTrailTransform;

impl CloudTrailTransform {
    pub fn to_document(record: LogRecord) -> Document {
        let raw = Value::Object(record.clone()).to_string();

        let mut document: Document = record
            .into_iter()
            .filter_map(|(field, value)| {
                let value = match field.as_str() {
                    USER_IDENTITY => reshape_identity(value)?,
                    REQUEST_PARAMETERS | RESPONSE_ELEMENTS => encode(value)?,
                    _ => value,
                };
                Some((field, value))
            })
            .collect();

        document.insert(RAW.to_string(), Value::String(raw));
        document
    }
}

impl Transform for CloudTrailTransform {
    type Input = LogRecord;
    type Output = Document;

    fn transform(&self, record: LogRecord) -> Vec<Document> {
        vec![Self::to_document(record)]
    }
}

/// JSON-string encoding of a nested value; `None` drops the field.
fn encode(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(Value::String(other.to_string())),
    }
}

fn reshape_identity(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(identity) => Some(Value::Object(
            identity
                .into_iter()
                .filter_map(|(field, value)| match field.as_str() {
                    SESSION_CONTEXT => encode(value).map(|v| (field, v)),
                    _ => Some((field, value)),
                })
                .collect(),
        )),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> LogRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_full_record() {
        let input = record(json!({
            "id": "a",
            "a": 1,
            "userIdentity": {"b": 2, "sessionContext": {"c": 3}},
            "requestParameters": {"d": 4},
            "responseElements": {"e": 5}
        }));

        let doc = CloudTrailTransform::to_document(input);
        assert_eq!(
            Value::Object(doc),
            json!({
                "id": "a",
                "a": 1,
                "userIdentity": {"b": 2, "sessionContext": "{\"c\":3}"},
                "requestParameters": "{\"d\":4}",
                "responseElements": "{\"e\":5}",
                "raw": "{\"id\":\"a\",\"a\":1,\"userIdentity\":{\"b\":2,\"sessionContext\":{\"c\":3}},\"requestParameters\":{\"d\":4},\"responseElements\":{\"e\":5}}"
            })
        );
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let doc = CloudTrailTransform::to_document(record(json!({
            "id": "c",
            "requestParameters": {"k": 4}
        })));

        assert!(!doc.contains_key("userIdentity"));
        assert!(!doc.contains_key("responseElements"));
        assert_eq!(doc["requestParameters"], "{\"k\":4}");
        assert_eq!(doc["raw"], "{\"id\":\"c\",\"requestParameters\":{\"k\":4}}");
    }

    #[test]
    fn test_identity_without_session_context() {
        let doc = CloudTrailTransform::to_document(record(json!({
            "userIdentity": {"type": "AWSService", "invokedBy": "s3.amazonaws.com"}
        })));
        assert_eq!(doc["userIdentity"], json!({"type": "AWSService", "invokedBy": "s3.amazonaws.com"}));
    }

    #[test]
    fn test_null_nested_values_are_dropped() {
        let doc = CloudTrailTransform::to_document(record(json!({
            "userIdentity": {"sessionContext": null},
            "requestParameters": null,
            "responseElements": null
        })));

        assert_eq!(doc["userIdentity"], json!({}));
        assert!(!doc.contains_key("requestParameters"));
        assert!(!doc.contains_key("responseElements"));
        assert_eq!(
            doc["raw"],
            "{\"userIdentity\":{\"sessionContext\":null},\"requestParameters\":null,\"responseElements\":null}"
        );
    }

    #[test]
    fn test_field_order_is_kept() {
        let doc = CloudTrailTransform::to_document(record(json!({
            "eventVersion": "1.08",
            "requestParameters": {"bucketName": "x"},
            "eventTime": "2024-05-01T12:00:00Z"
        })));
        let fields: Vec<&str> = doc.keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["eventVersion", "requestParameters", "eventTime", "raw"]);
    }

    #[test]
    fn test_transform_is_one_to_one() {
        let out = CloudTrailTransform.transform(record(json!({"eventID": "x"})));
        assert_eq!(out.len(), 1);
    }
}
