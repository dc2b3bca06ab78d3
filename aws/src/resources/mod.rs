//! Resource implementations

pub mod appflow;
pub mod s3;

pub use appflow::ConnectorProfileResource;
pub use s3::DirectoryBucketResource;

use converge::schema::{Block, NestingMode};
use converge::{AttributePath, ConvergeError, Dynamic, DynamicValue};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub(crate) fn path(name: &str) -> AttributePath {
    AttributePath::new(name)
}

/// Known, non-null string at `path`
pub(crate) fn string_at(value: &DynamicValue, path: &AttributePath) -> Option<String> {
    value
        .get(path)
        .and_then(Dynamic::as_string)
        .map(str::to_string)
}

pub(crate) fn required_string(value: &DynamicValue, path: &AttributePath) -> converge::Result<String> {
    string_at(value, path)
        .ok_or_else(|| ConvergeError::Custom(format!("{} must be known before apply", path)))
}

pub(crate) fn decode<T: DeserializeOwned>(kind: &str, remote: &Value) -> converge::Result<T> {
    serde_json::from_value(remote.clone())
        .map_err(|e| ConvergeError::Decoding(format!("{} response: {}", kind, e)))
}

pub(crate) fn opt_string(value: Option<String>) -> Dynamic {
    value.map(Dynamic::String).unwrap_or(Dynamic::Null)
}

/// Shapes a response object the way the planner shapes configuration:
/// every attribute present (null when absent), list blocks as lists
pub(crate) fn conform(block: &Block, remote: &Value) -> Dynamic {
    let mut shaped = BTreeMap::new();

    for attr in &block.attributes {
        let value = remote
            .get(&attr.name)
            .map(Dynamic::from_json)
            .unwrap_or(Dynamic::Null);
        shaped.insert(attr.name.clone(), value);
    }

    for nested in &block.block_types {
        let value = match (nested.nesting, remote.get(&nested.type_name)) {
            (NestingMode::Single, Some(obj @ Value::Object(_))) => conform(&nested.block, obj),
            (NestingMode::Single, _) => Dynamic::Null,
            (_, Some(Value::Array(items))) => Dynamic::List(
                items.iter().map(|item| conform(&nested.block, item)).collect(),
            ),
            (_, Some(obj @ Value::Object(_))) => Dynamic::List(vec![conform(&nested.block, obj)]),
            _ => Dynamic::List(Vec::new()),
        };
        shaped.insert(nested.type_name.clone(), value);
    }

    Dynamic::Map(shaped)
}

/// Request payload for one planned block element. Null attributes are
/// left out and single-element list blocks collapse into objects.
pub(crate) fn block_payload(block: &Block, planned: &Dynamic) -> Value {
    let mut payload = Map::new();

    for attr in &block.attributes {
        match planned.get(&attr.name) {
            Some(value) if !value.is_null() && !value.is_unknown() => {
                payload.insert(attr.name.clone(), value.to_json());
            }
            _ => {}
        }
    }

    for nested in &block.block_types {
        let Some(value) = planned.get(&nested.type_name) else {
            continue;
        };
        let nested_payload = match (nested.nesting, value) {
            (NestingMode::Single, element @ Dynamic::Map(_)) => block_payload(&nested.block, element),
            (_, Dynamic::List(items)) if nested.max_items == 1 => match items.first() {
                Some(element) => block_payload(&nested.block, element),
                None => continue,
            },
            (_, Dynamic::List(items)) if !items.is_empty() => Value::Array(
                items
                    .iter()
                    .map(|item| block_payload(&nested.block, item))
                    .collect(),
            ),
            _ => continue,
        };
        payload.insert(nested.type_name.clone(), nested_payload);
    }

    Value::Object(payload)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use converge::schema::{AttributeBuilder, AttributeType, BlockBuilder, NestedBlock};
    use serde_json::json;

    fn block() -> Block {
        BlockBuilder::new()
            .attribute(
                AttributeBuilder::new("url", AttributeType::String)
                    .required()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("port", AttributeType::Int)
                    .optional()
                    .build(),
            )
            .block(
                NestedBlock::list(
                    "auth",
                    BlockBuilder::new()
                        .attribute(
                            AttributeBuilder::new("code", AttributeType::String)
                                .optional()
                                .build(),
                        )
                        .build(),
                )
                .max_items(1),
            )
            .build()
    }

    #[test]
    fn conform_fills_missing_attributes_and_blocks() {
        let shaped = conform(&block(), &json!({"url": "https://x", "extra": true}));

        assert_eq!(shaped.get("url"), Some(&Dynamic::from("https://x")));
        assert_eq!(shaped.get("port"), Some(&Dynamic::Null));
        assert_eq!(shaped.get("auth"), Some(&Dynamic::List(vec![])));
        assert!(shaped.get("extra").is_none());
    }

    #[test]
    fn conform_wraps_objects_in_list_blocks() {
        let shaped = conform(&block(), &json!({"url": "u", "auth": {"code": "c"}}));
        let auth = shaped.get("auth").and_then(Dynamic::as_list).unwrap();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].get("code"), Some(&Dynamic::from("c")));
    }

    #[test]
    fn block_payload_drops_nulls_and_collapses_single_blocks() {
        let planned = conform(&block(), &json!({"url": "u", "port": 8080, "auth": [{"code": "c"}]}));
        assert_eq!(
            block_payload(&block(), &planned),
            json!({"url": "u", "port": 8080, "auth": {"code": "c"}})
        );

        let bare = conform(&block(), &json!({"url": "u"}));
        assert_eq!(block_payload(&block(), &bare), json!({"url": "u"}));
    }
}
