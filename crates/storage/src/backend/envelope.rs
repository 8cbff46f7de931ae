//! Expiry envelope for backends without native TTL support.
//!
//! Values written with a TTL are wrapped as
//! `{"$expireAt": <epoch-millis>, "$value": <value>}` and the expiry is
//! enforced lazily when the value is read back. Values written without one are
//! stored as-is, unless they have the shape of an envelope themselves: those
//! are wrapped with `"$expireAt": null` so they read back unchanged.

use crate::clock;
use serde_json::{Map, Value};
use std::time::Duration;

const EXPIRE_FIELD: &str = "$expireAt";
const VALUE_FIELD: &str = "$value";

pub(crate) enum Unwrapped {
    Live(Value),
    Expired,
}

/// `Some(deadline)` if `map` is an envelope. A `null` deadline never expires.
fn deadline(map: &Map<String, Value>) -> Option<Option<i64>> {
    if map.len() != 2 || !map.contains_key(VALUE_FIELD) {
        return None;
    }
    match map.get(EXPIRE_FIELD)? {
        Value::Null => Some(None),
        expire_at => expire_at.as_i64().map(Some),
    }
}

fn envelope(value: &Value, expire_at: Value) -> Value {
    let mut map = Map::with_capacity(2);
    map.insert(EXPIRE_FIELD.to_string(), expire_at);
    map.insert(VALUE_FIELD.to_string(), value.clone());
    Value::Object(map)
}

pub(crate) fn wrap(value: &Value, ttl: Option<Duration>, now: i64) -> Value {
    match (ttl, value) {
        (Some(ttl), _) => envelope(value, Value::from(clock::expiry(now, ttl))),
        (None, Value::Object(map)) if deadline(map).is_some() => envelope(value, Value::Null),
        (None, _) => value.clone(),
    }
}

pub(crate) fn unwrap(document: Value, now: i64) -> Unwrapped {
    let Value::Object(mut map) = document else {
        return Unwrapped::Live(document);
    };
    match deadline(&map) {
        None => Unwrapped::Live(Value::Object(map)),
        Some(Some(expire_at)) if expire_at <= now => Unwrapped::Expired,
        Some(_) => Unwrapped::Live(map.remove(VALUE_FIELD).unwrap_or(Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn live(unwrapped: Unwrapped) -> Option<Value> {
        match unwrapped {
            Unwrapped::Live(v) => Some(v),
            Unwrapped::Expired => None,
        }
    }

    #[test]
    fn test_no_ttl_is_stored_raw() {
        let value = json!({"title": "Movie"});
        assert_eq!(wrap(&value, None, 0), value);
    }

    #[test]
    fn test_ttl_expires() {
        let wrapped = wrap(&json!(42), Some(Duration::from_secs(1)), 10_000);
        assert_eq!(wrapped, json!({"$expireAt": 11_000, "$value": 42}));
        assert_eq!(live(unwrap(wrapped.clone(), 10_999)), Some(json!(42)));
        assert!(live(unwrap(wrapped, 11_000)).is_none());
    }

    #[test]
    fn test_lookalike_objects_pass_through() {
        // Extra fields mean this is a user value, not an envelope.
        let value = json!({"$expireAt": 1, "$value": 2, "other": 3});
        assert_eq!(wrap(&value, None, 5), value);
        assert_eq!(live(unwrap(value.clone(), 5)), Some(value));
        let value = json!({"$expireAt": "soon", "$value": 2});
        assert_eq!(wrap(&value, None, 5), value);
        assert_eq!(live(unwrap(value.clone(), 5)), Some(value));
    }

    #[rstest]
    #[case::expired_shape(json!({"$expireAt": 1, "$value": "x"}))]
    #[case::null_shape(json!({"$expireAt": null, "$value": {"$expireAt": 1, "$value": 2}}))]
    fn test_envelope_shaped_values_are_escaped(#[case] value: Value) {
        let stored = wrap(&value, None, 10_000);
        assert_eq!(stored, json!({"$expireAt": null, "$value": value.clone()}));
        assert_eq!(live(unwrap(stored, 10_000)), Some(value));
    }

    #[test]
    fn test_envelope_shaped_values_with_ttl() {
        let value = json!({"$expireAt": 1, "$value": "x"});
        let stored = wrap(&value, Some(Duration::from_secs(1)), 10_000);
        assert_eq!(live(unwrap(stored.clone(), 10_500)), Some(value));
        assert!(live(unwrap(stored, 11_000)).is_none());
    }
}
