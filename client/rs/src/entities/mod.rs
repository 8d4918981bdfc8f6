use chrono::{DateTime, Utc};

/// Core / pulsar / database / logging config types.
pub mod config;
/// Subtypes of [LogConfig][logger::LogConfig].
pub mod logger;
/// The TES task document and its subtypes.
pub mod task;

pub type MongoId = String;

/// Lift a possibly-empty string into an Option.
///
/// The core never conflates "absent" with "empty": anywhere an
/// empty string means "not provided", it must pass through here
/// before being treated as a value.
pub fn maybe_non_empty(value: &str) -> Option<&str> {
  if value.is_empty() { None } else { Some(value) }
}

/// Numeric companion to [maybe_non_empty]: zero means
/// "not provided".
pub fn maybe_non_zero(value: i64) -> Option<i64> {
  if value == 0 { None } else { Some(value) }
}

/// Current time, RFC 3339 in all serialized forms.
pub fn tesp_timestamp() -> DateTime<Utc> {
  Utc::now()
}
