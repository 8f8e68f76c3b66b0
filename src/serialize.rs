//! Splits a value graph into JSON plus a side list of binary buffers, and
//! splices them back together.
//!
//! A buffer leaf is removed from its parent (map entries are dropped, list
//! slots become `null`) and its location is recorded in `buffer_paths`, a
//! list of key/index segments from the root.

use crate::error::{BridgeError, Result};
use crate::value::{StateMap, StateValue, WIDGET_REF_PREFIX, utc_iso8601};
use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

pub type BufferPath = Vec<PathSegment>;

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedState {
    pub state: Value,
    pub buffer_paths: Vec<BufferPath>,
    pub buffers: Vec<Vec<u8>>,
}

impl EncodedState {
    pub fn buffer_paths_json(&self) -> Value {
        serde_json::to_value(&self.buffer_paths).unwrap_or(Value::Array(Vec::new()))
    }
}

pub fn encode(value: &StateValue) -> Result<EncodedState> {
    let mut path = Vec::new();
    let mut buffer_paths = Vec::new();
    let mut buffers = Vec::new();

    let state = encode_node(value, &mut path, &mut buffer_paths, &mut buffers)?.unwrap_or(Value::Null);

    Ok(EncodedState {
        state,
        buffer_paths,
        buffers,
    })
}

pub fn encode_state(state: &StateMap) -> Result<EncodedState> {
    let mut path = Vec::new();
    let mut buffer_paths = Vec::new();
    let mut buffers = Vec::new();

    let state = encode_map(state, &mut path, &mut buffer_paths, &mut buffers)?;

    Ok(EncodedState {
        state,
        buffer_paths,
        buffers,
    })
}

/// `None` means the node was a buffer and has been moved to `buffers`.
fn encode_node(
    value: &StateValue,
    path: &mut BufferPath,
    buffer_paths: &mut Vec<BufferPath>,
    buffers: &mut Vec<Vec<u8>>,
) -> Result<Option<Value>> {
    let json = match value {
        StateValue::Bytes(data) => {
            buffer_paths.push(path.clone());
            buffers.push(data.clone());
            return Ok(None);
        }
        StateValue::Null => Value::Null,
        StateValue::Bool(b) => Value::Bool(*b),
        StateValue::Int(n) => Value::from(*n),
        StateValue::UInt(n) => Value::from(*n),
        StateValue::Float(f) => float_value(*f, value)?,
        StateValue::Decimal(text) => {
            let parsed = text.trim().parse::<f64>().map_err(|_| not_serializable(value))?;
            float_value(parsed, value)?
        }
        StateValue::Str(s) => Value::String(s.clone()),
        StateValue::DateTime(dt) => Value::String(utc_iso8601(&dt.with_timezone(&Utc))),
        StateValue::NaiveDateTime(naive) => {
            warn!(
                datetime = %naive,
                "interpreting naive datetime as local time; please add timezone info to timestamps"
            );
            let utc = local_to_utc(naive, |wall| {
                Local
                    .from_local_datetime(wall)
                    .map(|local| local.with_timezone(&Utc))
            });
            Value::String(utc_iso8601(&utc))
        }
        StateValue::List(items) | StateValue::Tuple(items) | StateValue::Set(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                let encoded = encode_node(item, path, buffer_paths, buffers)?;
                path.pop();
                out.push(encoded.unwrap_or(Value::Null));
            }
            Value::Array(out)
        }
        StateValue::Map(map) => encode_map(map, path, buffer_paths, buffers)?,
        StateValue::Widget(id) => Value::String(format!("{WIDGET_REF_PREFIX}{id}")),
        StateValue::Opaque { .. } => return Err(not_serializable(value)),
    };

    Ok(Some(json))
}

fn encode_map(
    map: &StateMap,
    path: &mut BufferPath,
    buffer_paths: &mut Vec<BufferPath>,
    buffers: &mut Vec<Vec<u8>>,
) -> Result<Value> {
    let mut out = Map::new();
    for (key, item) in map {
        path.push(PathSegment::Key(key.clone()));
        let encoded = encode_node(item, path, buffer_paths, buffers)?;
        path.pop();
        if let Some(json) = encoded {
            out.insert(key.clone(), json);
        }
    }
    Ok(Value::Object(out))
}

fn float_value(f: f64, original: &StateValue) -> Result<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| not_serializable(original))
}

/// Wall-clock times inside a DST gap move forward past it; if no nearby
/// time resolves, the value is read as UTC.
fn local_to_utc<F>(naive: &NaiveDateTime, resolve: F) -> DateTime<Utc>
where
    F: Fn(&NaiveDateTime) -> LocalResult<DateTime<Utc>>,
{
    let mut wall = *naive;
    for _ in 0..=4 {
        if let Some(utc) = resolve(&wall).earliest() {
            return utc;
        }
        wall = wall + Duration::minutes(30);
    }
    naive.and_utc()
}

fn not_serializable(value: &StateValue) -> BridgeError {
    let value = match value {
        StateValue::Opaque { repr, .. } => repr.clone(),
        other => format!("{other:?}"),
    };
    BridgeError::NotSerializable { value }
}

/// Inverse of [`encode`]: puts each buffer back at its path.
pub fn decode(state: &Value, buffer_paths: &[BufferPath], buffers: Vec<Vec<u8>>) -> Result<StateValue> {
    if buffer_paths.len() != buffers.len() {
        return Err(BridgeError::BufferPath {
            path: format!("{} path(s)", buffer_paths.len()),
            reason: format!("expected one buffer per path, got {}", buffers.len()),
        });
    }

    let mut root = StateValue::from_json(state);

    for (path, buffer) in buffer_paths.iter().zip(buffers) {
        splice_buffer(&mut root, path, buffer)?;
    }

    Ok(root)
}

pub fn decode_state(state: &Value, buffer_paths: &[BufferPath], buffers: Vec<Vec<u8>>) -> Result<StateMap> {
    match decode(state, buffer_paths, buffers)? {
        StateValue::Map(map) => Ok(map),
        StateValue::Null => Ok(StateMap::new()),
        other => Err(BridgeError::InvalidMessage(format!(
            "widget state must be an object, got {}",
            other.type_name()
        ))),
    }
}

fn splice_buffer(root: &mut StateValue, path: &[PathSegment], buffer: Vec<u8>) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *root = StateValue::Bytes(buffer);
        return Ok(());
    };

    let mut current = root;
    for segment in parents {
        current = descend_existing(current, segment).ok_or_else(|| BridgeError::BufferPath {
            path: pointer(path),
            reason: "path does not exist".to_string(),
        })?;
    }

    match (current, last) {
        (StateValue::Map(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), StateValue::Bytes(buffer));
            Ok(())
        }
        (StateValue::List(items), PathSegment::Index(index)) => {
            if *index < items.len() {
                items[*index] = StateValue::Bytes(buffer);
                Ok(())
            } else if *index == items.len() {
                items.push(StateValue::Bytes(buffer));
                Ok(())
            } else {
                Err(BridgeError::BufferPath {
                    path: pointer(path),
                    reason: "array index out of bounds".to_string(),
                })
            }
        }
        _ => Err(BridgeError::BufferPath {
            path: pointer(path),
            reason: "cannot place a buffer under a non-container value".to_string(),
        }),
    }
}

fn descend_existing<'a>(value: &'a mut StateValue, segment: &PathSegment) -> Option<&'a mut StateValue> {
    match (value, segment) {
        (StateValue::Map(map), PathSegment::Key(key)) => map.get_mut(key),
        (StateValue::List(items), PathSegment::Index(index)) => items.get_mut(*index),
        _ => None,
    }
}

/// JSON pointer rendering of a buffer path, for error messages.
pub fn pointer(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        out.push('/');
        match segment {
            PathSegment::Index(index) => out.push_str(&index.to_string()),
            PathSegment::Key(key) => out.push_str(&key.replace('~', "~0").replace('/', "~1")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};
    use serde_json::json;

    fn sample_state() -> StateValue {
        let dt = FixedOffset::west_opt(5 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2023, 11, 5, 8, 30, 0)
            .single()
            .expect("datetime");

        StateValue::map([
            ("value", StateValue::Int(7)),
            ("label", StateValue::from("Threshold")),
            ("ratio", StateValue::Float(0.25)),
            ("enabled", StateValue::Bool(true)),
            ("missing", StateValue::Null),
            ("updated", StateValue::DateTime(dt)),
            ("image", StateValue::bytes(vec![0_u8, 159, 146, 150])),
            (
                "series",
                StateValue::List(vec![
                    StateValue::Int(1),
                    StateValue::bytes(b"xy".to_vec()),
                    StateValue::map([("raw", StateValue::bytes(b"z".to_vec()))]),
                ]),
            ),
        ])
    }

    fn contains_buffer(value: &Value, buffers: &[Vec<u8>]) -> bool {
        match value {
            Value::Array(items) => items.iter().any(|v| contains_buffer(v, buffers)),
            Value::Object(map) => map.values().any(|v| contains_buffer(v, buffers)),
            Value::String(s) => buffers.iter().any(|b| b.as_slice() == s.as_bytes()),
            _ => false,
        }
    }

    #[test]
    fn buffers_are_pulled_out_with_their_paths() {
        let encoded = encode(&sample_state()).expect("encode");

        assert_eq!(encoded.buffers.len(), 3);
        assert_eq!(
            encoded.buffer_paths,
            vec![
                vec![PathSegment::Key("image".into())],
                vec![PathSegment::Key("series".into()), PathSegment::Index(1)],
                vec![
                    PathSegment::Key("series".into()),
                    PathSegment::Index(2),
                    PathSegment::Key("raw".into()),
                ],
            ]
        );
        assert!(encoded.state.get("image").is_none());
        assert_eq!(encoded.state["series"], json!([1, null, {}]));
        assert!(!contains_buffer(&encoded.state, &encoded.buffers));
        assert_eq!(encoded.buffer_paths_json(), json!([["image"], ["series", 1], ["series", 2, "raw"]]));
    }

    #[test]
    fn datetimes_are_sent_as_utc_with_z_suffix() {
        let encoded = encode(&sample_state()).expect("encode");
        assert_eq!(encoded.state["updated"], "2023-11-05T13:30:00Z");
    }

    #[test]
    fn naive_datetime_is_accepted_as_local_time() {
        let naive = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(3, 4, 5))
            .expect("naive datetime");
        let encoded = encode(&StateValue::NaiveDateTime(naive)).expect("encode naive");
        let text = encoded.state.as_str().expect("string");
        assert!(text.ends_with('Z'));

        let expected = Local
            .from_local_datetime(&naive)
            .earliest()
            .expect("local time")
            .with_timezone(&Utc);
        assert_eq!(text, utc_iso8601(&expected));
    }

    #[test]
    fn naive_datetime_in_dst_gap_moves_past_it() {
        let naive = chrono::NaiveDate::from_ymd_opt(2024, 3, 10)
            .and_then(|d| d.and_hms_opt(2, 30, 0))
            .expect("naive datetime");
        let skipped = |wall: &NaiveDateTime| {
            if wall.hour() == 2 {
                LocalResult::None
            } else {
                LocalResult::Single(wall.and_utc())
            }
        };
        let utc = local_to_utc(&naive, skipped);
        assert_eq!(utc_iso8601(&utc), "2024-03-10T03:00:00Z");

        let unresolvable = local_to_utc(&naive, |_| LocalResult::None);
        assert_eq!(unresolvable, naive.and_utc());
    }

    #[test]
    fn round_trip_restores_structure() {
        let original = sample_state();
        let encoded = encode(&original).expect("encode");
        let decoded =
            decode(&encoded.state, &encoded.buffer_paths, encoded.buffers.clone()).expect("decode");

        assert_eq!(decoded, original.normalized());
    }

    #[test]
    fn non_native_leaves_are_normalized() {
        let value = StateValue::map([
            ("big", StateValue::UInt(u64::MAX)),
            ("price", StateValue::Decimal("19.990".to_string())),
            ("tags", StateValue::Set(vec![StateValue::from("a"), StateValue::from("b")])),
            ("pair", StateValue::Tuple(vec![StateValue::Int(1), StateValue::Int(2)])),
            ("child", StateValue::Widget("f00d".to_string())),
        ]);
        let encoded = encode(&value).expect("encode");
        assert_eq!(
            encoded.state,
            json!({
                "big": u64::MAX,
                "price": 19.99,
                "tags": ["a", "b"],
                "pair": [1, 2],
                "child": "IPY_MODEL_f00d",
            })
        );
    }

    #[test]
    fn unsupported_leaf_names_the_value() {
        let value = StateValue::map([(
            "conn",
            StateValue::Opaque {
                type_name: "Socket".to_string(),
                repr: "<Socket 127.0.0.1:80>".to_string(),
            },
        )]);
        let err = encode(&value).expect_err("opaque values are not serializable");
        match err {
            BridgeError::NotSerializable { value } => assert_eq!(value, "<Socket 127.0.0.1:80>"),
            other => panic!("expected NotSerializable, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_floats_are_rejected() {
        let err = encode(&StateValue::Float(f64::NAN)).expect_err("NaN is not JSON");
        assert!(matches!(err, BridgeError::NotSerializable { .. }));
    }

    #[test]
    fn decode_rejects_mismatched_buffer_counts() {
        let err = decode(&json!({}), &[vec![PathSegment::Key("a".into())]], Vec::new())
            .expect_err("missing buffer");
        assert!(matches!(err, BridgeError::BufferPath { .. }));
    }

    #[test]
    fn decode_rejects_paths_through_scalars() {
        let err = decode(
            &json!({"value": 3}),
            &[vec![PathSegment::Key("value".into()), PathSegment::Key("x".into())]],
            vec![b"q".to_vec()],
        )
        .expect_err("cannot descend into a number");
        match err {
            BridgeError::BufferPath { path, .. } => assert_eq!(path, "/value/x"),
            other => panic!("expected BufferPath, got {other:?}"),
        }
    }

    #[test]
    fn buffer_paths_parse_from_wire_json() {
        let paths: Vec<BufferPath> =
            serde_json::from_value(json!([["data", 0, "a/b"]])).expect("parse paths");
        assert_eq!(pointer(&paths[0]), "/data/0/a~1b");
    }
}
