//! Conversion between property list values and JSON values.
//!
//! Build settings travel as JSON (that is what `xcodebuild -json` emits);
//! project files and entitlements are property lists.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::time::SystemTime;

/// Convert a property list value to JSON.
///
/// Dates become RFC 3339 strings and data blobs become base64 strings.
pub fn plist_to_json(value: &plist::Value) -> Value {
    match value {
        plist::Value::Boolean(b) => Value::Bool(*b),
        plist::Value::Integer(i) => {
            if let Some(signed) = i.as_signed() {
                Value::Number(signed.into())
            } else if let Some(unsigned) = i.as_unsigned() {
                Value::Number(unsigned.into())
            } else {
                Value::Null
            }
        }
        plist::Value::Real(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        plist::Value::String(s) => Value::String(s.clone()),
        plist::Value::Array(items) => Value::Array(items.iter().map(plist_to_json).collect()),
        plist::Value::Dictionary(dict) => Value::Object(
            dict.iter()
                .map(|(k, v)| (k.clone(), plist_to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        plist::Value::Date(date) => {
            let time: DateTime<Utc> = SystemTime::from(date.clone()).into();
            Value::String(time.to_rfc3339())
        }
        plist::Value::Data(bytes) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        plist::Value::Uid(uid) => Value::Number(uid.get().into()),
        _ => Value::Null,
    }
}

/// Convert a JSON value to a property list value.
///
/// `null` has no plist counterpart; it yields `None` and is dropped from
/// arrays and dictionaries.
pub fn json_to_plist(value: &Value) -> Option<plist::Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(plist::Value::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(plist::Value::Integer(i.into()))
            } else if let Some(u) = n.as_u64() {
                Some(plist::Value::Integer(u.into()))
            } else {
                n.as_f64().map(plist::Value::Real)
            }
        }
        Value::String(s) => Some(plist::Value::String(s.clone())),
        Value::Array(items) => Some(plist::Value::Array(
            items.iter().filter_map(json_to_plist).collect(),
        )),
        Value::Object(map) => {
            let mut dict = plist::Dictionary::new();
            for (k, v) in map {
                if let Some(v) = json_to_plist(v) {
                    dict.insert(k.clone(), v);
                }
            }
            Some(plist::Value::Dictionary(dict))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_to_plist_and_back() {
        let original = json!({
            "aps-environment": "development",
            "com.apple.security.app-sandbox": true,
            "count": 3,
            "com.apple.developer.icloud-container-identifiers": ["iCloud.a", "iCloud.b"],
        });

        let plist_value = json_to_plist(&original).unwrap();
        let dict = plist_value.as_dictionary().unwrap();
        assert_eq!(
            dict.get("aps-environment").and_then(|v| v.as_string()),
            Some("development")
        );
        assert_eq!(
            dict.get("com.apple.security.app-sandbox").and_then(|v| v.as_boolean()),
            Some(true)
        );

        assert_eq!(plist_to_json(&plist_value), original);
    }

    #[test]
    fn test_json_null_is_dropped() {
        let value = json_to_plist(&json!({"a": null, "b": [null, "x"]})).unwrap();
        let dict = value.as_dictionary().unwrap();
        assert!(!dict.contains_key("a"));
        assert_eq!(dict.get("b").and_then(|v| v.as_array()).map(|a| a.len()), Some(1));
    }

    #[test]
    fn test_plist_data_becomes_base64() {
        let value = plist::Value::Data(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(plist_to_json(&value), json!("3q2+7w=="));
    }
}
