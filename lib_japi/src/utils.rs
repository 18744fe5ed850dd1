//! JSON helpers shared by the dispatcher, the push services and embedding
//! applications: typed accessors over `serde_json::Value` and the
//! newline-terminated serializer used for everything that goes on the wire.

use serde_json::Value;

use crate::error::JapiError;

/// Serialize a JSON value into a single wire line.
///
/// The message and its trailing newline are assembled in one buffer so the
/// transport can emit them with a single write call. Readers rely on line
/// boundaries aligning with JSON boundaries.
pub fn to_line(value: &Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}

/// Get the string value stored under `key`.
///
/// Returns [`JapiError::NotFound`] if the key is missing and
/// [`JapiError::InvalidArgument`] if the value has a different type. The
/// other typed accessors below follow the same contract.
pub fn get_str<'a>(value: &'a Value, key: &str) -> Result<&'a str, JapiError> {
    let entry = value
        .get(key)
        .ok_or_else(|| JapiError::NotFound(key.to_string()))?;
    entry
        .as_str()
        .ok_or_else(|| JapiError::InvalidArgument(format!("'{key}' is not a string")))
}

/// Get the boolean value stored under `key`.
pub fn get_bool(value: &Value, key: &str) -> Result<bool, JapiError> {
    let entry = value
        .get(key)
        .ok_or_else(|| JapiError::NotFound(key.to_string()))?;
    entry
        .as_bool()
        .ok_or_else(|| JapiError::InvalidArgument(format!("'{key}' is not a boolean")))
}

/// Get the integer value stored under `key`.
pub fn get_i64(value: &Value, key: &str) -> Result<i64, JapiError> {
    let entry = value
        .get(key)
        .ok_or_else(|| JapiError::NotFound(key.to_string()))?;
    entry
        .as_i64()
        .ok_or_else(|| JapiError::InvalidArgument(format!("'{key}' is not an integer")))
}

/// Get the floating point value stored under `key`.
pub fn get_f64(value: &Value, key: &str) -> Result<f64, JapiError> {
    let entry = value
        .get(key)
        .ok_or_else(|| JapiError::NotFound(key.to_string()))?;
    entry
        .as_f64()
        .ok_or_else(|| JapiError::InvalidArgument(format!("'{key}' is not a number")))
}
