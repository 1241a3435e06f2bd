//! Property tests for batching and the CloudTrail transformation.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use trawl::extract::RecordStream;
use trawl::{BatchPipeline, CloudTrailTransform, Extract, Load, LoadOutcome, Merge, PipelineStats, Transform};

struct Sequence(Vec<u32>);

#[async_trait]
impl Extract for Sequence {
    type Record = u32;

    async fn extract(&self, _merge: Merge, _stats: Arc<PipelineStats>) -> trawl::Result<RecordStream<u32>> {
        Ok(stream::iter(self.0.clone().into_iter().map(Ok)).boxed())
    }
}

struct Identity;

impl Transform for Identity {
    type Input = u32;
    type Output = u32;

    fn transform(&self, n: u32) -> Vec<u32> {
        vec![n]
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Vec<u32>>>);

#[async_trait]
impl Load for Recorder {
    type Item = u32;

    async fn load(&self, batch: Vec<u32>) -> LoadOutcome {
        let loaded = batch.len();
        self.0.lock().push(batch);
        LoadOutcome { loaded, failed: 0 }
    }
}

fn json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _:/.-]{0,16}".prop_map(Value::String),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    json_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn json_object() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map("[a-z]{1,6}", json_value(), 0..4).prop_map(|m| m.into_iter().collect())
}

/// CloudTrail-like records; nested fields are optional objects.
fn log_record() -> impl Strategy<Value = Map<String, Value>> {
    (
        "[a-f0-9]{8}",
        prop::option::of(json_object()),
        prop::option::of(prop::option::of(json_object())),
        prop::option::of(json_object()),
        prop::option::of(json_object()),
        json_object(),
    )
        .prop_map(|(event_id, identity, session, request, response, extra)| {
            let mut record = Map::new();
            record.insert("eventID".into(), Value::String(event_id));
            for (field, value) in extra.into_iter().filter(|(field, _)| field != "raw") {
                record.entry(field).or_insert(value);
            }
            if let Some(mut identity) = identity {
                match session {
                    Some(Some(ctx)) => {
                        identity.insert("sessionContext".into(), Value::Object(ctx));
                    }
                    Some(None) => {
                        identity.insert("sessionContext".into(), Value::Null);
                    }
                    None => {}
                }
                record.insert("userIdentity".into(), Value::Object(identity));
            }
            if let Some(request) = request {
                record.insert("requestParameters".into(), Value::Object(request));
            }
            if let Some(response) = response {
                record.insert("responseElements".into(), Value::Object(response));
            }
            record
        })
}

fn decode(value: &Value) -> Value {
    serde_json::from_str(value.as_str().expect("encoded as string")).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn batches_cover_input_in_order(
        items in prop::collection::vec(any::<u32>(), 0..300),
        batch_size in 1usize..40,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let loader = Recorder::default();
        rt.block_on(BatchPipeline::new(1, batch_size).run(&Sequence(items.clone()), &Identity, &loader))
            .unwrap();

        let batches = loader.0.into_inner();
        prop_assert_eq!(batches.len(), items.len().div_ceil(batch_size));
        if let Some(last) = batches.last() {
            let expected = match items.len() % batch_size {
                0 => batch_size,
                rest => rest,
            };
            prop_assert_eq!(last.len(), expected);
        }
        prop_assert!(batches.iter().rev().skip(1).all(|b| b.len() == batch_size));
        prop_assert_eq!(batches.concat(), items);
    }

    #[test]
    fn transform_keeps_original_as_raw(record in log_record()) {
        let doc = CloudTrailTransform::to_document(record.clone());
        let raw: Value = serde_json::from_str(doc["raw"].as_str().unwrap()).unwrap();
        prop_assert_eq!(raw, Value::Object(record));
    }

    #[test]
    fn transform_encodes_only_nested_fields(record in log_record()) {
        let doc = CloudTrailTransform::to_document(record.clone());

        for (field, value) in &record {
            match field.as_str() {
                "requestParameters" | "responseElements" => {
                    prop_assert_eq!(&decode(&doc[field]), value);
                }
                "userIdentity" => {
                    let identity = value.as_object().unwrap();
                    let reshaped = doc[field].as_object().unwrap();
                    for (key, inner) in identity {
                        match (key.as_str(), inner) {
                            ("sessionContext", Value::Null) => prop_assert!(!reshaped.contains_key(key)),
                            ("sessionContext", _) => prop_assert_eq!(&decode(&reshaped[key]), inner),
                            _ => prop_assert_eq!(&reshaped[key], inner),
                        }
                    }
                }
                _ => prop_assert_eq!(&doc[field], value),
            }
        }
        prop_assert_eq!(doc.len(), record.len() + 1);
    }
}
