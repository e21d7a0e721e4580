//! Serde helpers for broker payloads.
//!
//! The broker is inconsistent about event `data`: reserved events and most
//! application events carry a JSON document encoded as a string, while some
//! brokers send the object inline. [`decode_data`] accepts both.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserialize `null` or a missing value as `T::default()`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode an event payload that may be a JSON-encoded string or an inline value.
///
/// A string whose contents parse as JSON is decoded from those contents first;
/// if that does not fit `T` the string itself is tried, so plain string payloads
/// still decode into `String`.
pub fn decode_data<T: DeserializeOwned>(data: &Value) -> crate::Result<T> {
    if let Value::String(encoded) = data
        && let Ok(inner) = serde_json::from_str::<Value>(encoded)
        && let Ok(decoded) = serde_json::from_value(inner)
    {
        return Ok(decoded);
    }

    deserialize_value(data.clone())
}

#[cfg(feature = "tracing")]
fn deserialize_value<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    serde_path_to_error::deserialize(value).map_err(|e| {
        tracing::debug!(
            type_name = %type_name::<T>(),
            path = %e.path(),
            error = %e.inner(),
            "event data did not match the requested type"
        );
        e.into_inner().into()
    })
}

#[cfg(not(feature = "tracing"))]
fn deserialize_value<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}
