//! Response body decoding.
//!
//! A [`Decoder`] parses the raw body into a JSON value and navigates a
//! [`JsonPath`] into it. The located node is then decoded with serde.

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::DecodeError;

/// Maximum number of segments in a [`JsonPath`].
pub const MAX_PATH_DEPTH: usize = 5;

/// One step of a [`JsonPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member lookup.
    Key(String),
    /// Array element lookup.
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "\"{key}\""),
            Self::Index(index) => write!(f, "[{index}]"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Ordered sequence of keys and indices leading from the root to a node.
///
/// An empty path addresses the root. Depth is checked when the path is
/// applied, so an over-long path surfaces as [`DecodeError::PathTooDeep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JsonPath(Vec<PathSegment>);

impl JsonPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        segments.into_iter().collect()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The path segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Fail if the path is deeper than [`MAX_PATH_DEPTH`].
    pub fn check_depth(&self) -> Result<(), DecodeError> {
        if self.0.len() > MAX_PATH_DEPTH {
            return Err(DecodeError::PathTooDeep {
                depth: self.0.len(),
                max: MAX_PATH_DEPTH,
            });
        }
        Ok(())
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for JsonPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Parses response bodies and navigates into them.
pub trait Decoder: Send + Sync {
    /// Parse raw bytes into a structured value.
    fn parse(&self, bytes: &[u8]) -> Result<Value, DecodeError>;

    /// Locate the node addressed by `path`.
    fn navigate(&self, root: Value, path: &JsonPath) -> Result<Value, DecodeError> {
        navigate(root, path)
    }
}

/// The default `serde_json` decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn parse(&self, bytes: &[u8]) -> Result<Value, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::Parse)
    }
}

/// Walk `path` from `root`, taking ownership of the located node.
pub fn navigate(root: Value, path: &JsonPath) -> Result<Value, DecodeError> {
    path.check_depth()?;

    path.segments()
        .iter()
        .try_fold(root, |node, segment| match (segment, node) {
            (PathSegment::Key(key), Value::Object(mut map)) => map
                .remove(key)
                .ok_or_else(|| DecodeError::KeyNotFound(key.clone())),
            (PathSegment::Index(index), Value::Array(mut items)) => {
                if *index < items.len() {
                    Ok(items.swap_remove(*index))
                } else {
                    Err(DecodeError::IndexOutOfBounds {
                        index: *index,
                        len: items.len(),
                    })
                }
            }
            (segment, other) => Err(DecodeError::TypeMismatch {
                segment: segment.to_string(),
                found: kind(&other),
            }),
        })
}

/// Decode a located node into `T`.
pub fn decode<T: DeserializeOwned>(node: Value) -> Result<T, DecodeError> {
    serde_json::from_value(node).map_err(DecodeError::Deserialize)
}

/// Decode a located array node element by element.
pub fn decode_array<T: DeserializeOwned>(node: Value) -> Result<Vec<T>, DecodeError> {
    match node {
        Value::Array(items) => items.into_iter().map(decode).collect(),
        other => Err(DecodeError::NotAnArray(kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
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
    use serde::Deserialize;
    use serde_json::json;

    fn nested() -> Value {
        json!({"a": {"b": {"c": 1}}})
    }

    #[test]
    fn test_root_path_returns_whole_document() {
        let node = navigate(nested(), &JsonPath::root()).unwrap();
        assert_eq!(node, nested());
    }

    #[test]
    fn test_navigate_to_scalar() {
        let node = navigate(nested(), &JsonPath::new(["a", "b", "c"])).unwrap();
        assert_eq!(node, json!(1));
        assert_eq!(decode::<u32>(node).unwrap(), 1);
    }

    #[test]
    fn test_missing_key() {
        let err = navigate(nested(), &JsonPath::new(["a", "b", "z"])).unwrap_err();
        assert!(matches!(err, DecodeError::KeyNotFound(ref k) if k == "z"));
    }

    #[test]
    fn test_paths_up_to_max_depth() {
        let doc = json!({"l1": {"l2": {"l3": {"l4": {"l5": "deep"}}}}});
        let keys = ["l1", "l2", "l3", "l4", "l5"];

        for depth in 0..=MAX_PATH_DEPTH {
            let path = JsonPath::new(keys[..depth].iter().copied());
            assert!(navigate(doc.clone(), &path).is_ok(), "depth {depth}");
        }

        let node = navigate(doc, &JsonPath::new(keys)).unwrap();
        assert_eq!(node, json!("deep"));
    }

    #[test]
    fn test_path_too_deep() {
        let path = JsonPath::new(["a", "b", "c", "d", "e", "f"]);
        let err = navigate(nested(), &path).unwrap_err();
        assert!(matches!(err, DecodeError::PathTooDeep { depth: 6, max: 5 }));
    }

    #[test]
    fn test_mixed_keys_and_indices() {
        let doc = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        let path: JsonPath = vec![
            PathSegment::from("data"),
            PathSegment::from("items"),
            PathSegment::Index(1),
            PathSegment::from("id"),
        ]
        .into_iter()
        .collect();

        assert_eq!(navigate(doc, &path).unwrap(), json!(2));
    }

    #[test]
    fn test_index_out_of_bounds_and_type_mismatch() {
        let doc = json!({"items": [1]});

        let err = navigate(doc.clone(), &JsonPath::new(vec![PathSegment::from("items"), PathSegment::Index(3)]))
            .unwrap_err();
        assert!(matches!(err, DecodeError::IndexOutOfBounds { index: 3, len: 1 }));

        let err = navigate(doc, &JsonPath::new(vec![PathSegment::Index(0)])).unwrap_err();
        assert!(matches!(err, DecodeError::TypeMismatch { found: "object", .. }));
    }

    #[test]
    fn test_decode_array_requires_array() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: u32,
        }

        let items: Vec<Item> = decode_array(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(items, vec![Item { id: 1 }, Item { id: 2 }]);

        let err = decode_array::<Item>(json!({"id": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::NotAnArray("object")));

        let err = decode_array::<Item>(json!([{"id": 1}, {"name": "x"}])).unwrap_err();
        assert!(matches!(err, DecodeError::Deserialize(_)));
    }

    #[test]
    fn test_json_decoder_parse_error() {
        let err = JsonDecoder.parse(b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)));
    }
}
