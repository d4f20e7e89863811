use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Ordered severity of a [`LogRecord`]. Serialized as its numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
    Fatal = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> u8 {
        level as u8
    }
}

/// Error returned for numeric or textual levels outside `DEBUG..=FATAL`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct UnknownLevel(pub String);

impl TryFrom<u8> for LogLevel {
    type Error = UnknownLevel;

    fn try_from(value: u8) -> Result<Self, UnknownLevel> {
        match value {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Warn),
            3 => Ok(LogLevel::Error),
            4 => Ok(LogLevel::Fatal),
            other => Err(UnknownLevel(other.to_string())),
        }
    }
}

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    /// Accepts level names in any case as well as their numeric form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<u8>() {
            return LogLevel::try_from(n);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            _ => Err(UnknownLevel(trimmed.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceContext {
    pub metric: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallContext {
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    /// Elapsed time in milliseconds.
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActionContext {
    pub action: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub event: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Structured context attached to a [`LogRecord`].
///
/// On the wire this is a single JSON object; the `type` field selects one of
/// the typed variants. Objects without a recognised `type`, or whose fields
/// don't fit the typed shape, are kept verbatim as [`LogContext::Generic`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogContext {
    Performance(PerformanceContext),
    ApiCall(ApiCallContext),
    UserAction(UserActionContext),
    Security(SecurityContext),
    Generic(Map<String, Value>),
}

impl LogContext {
    /// Value of the `type` discriminator, if any.
    pub fn kind(&self) -> Option<&str> {
        match self {
            LogContext::Performance(_) => Some("performance"),
            LogContext::ApiCall(_) => Some("api_call"),
            LogContext::UserAction(_) => Some("user_action"),
            LogContext::Security(_) => Some("security"),
            LogContext::Generic(map) => map.get("type").and_then(Value::as_str),
        }
    }
}

impl From<Map<String, Value>> for LogContext {
    fn from(map: Map<String, Value>) -> Self {
        LogContext::Generic(map)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedRef<'a> {
    Performance(&'a PerformanceContext),
    ApiCall(&'a ApiCallContext),
    UserAction(&'a UserActionContext),
    Security(&'a SecurityContext),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Tagged {
    Performance(PerformanceContext),
    ApiCall(ApiCallContext),
    UserAction(UserActionContext),
    Security(SecurityContext),
}

impl Serialize for LogContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LogContext::Performance(c) => TaggedRef::Performance(c).serialize(serializer),
            LogContext::ApiCall(c) => TaggedRef::ApiCall(c).serialize(serializer),
            LogContext::UserAction(c) => TaggedRef::UserAction(c).serialize(serializer),
            LogContext::Security(c) => TaggedRef::Security(c).serialize(serializer),
            LogContext::Generic(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for LogContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        let known = matches!(
            map.get("type").and_then(Value::as_str),
            Some("performance" | "api_call" | "user_action" | "security")
        );
        if !known {
            return Ok(LogContext::Generic(map));
        }

        match serde_json::from_value::<Tagged>(Value::Object(map.clone())) {
            Ok(Tagged::Performance(c)) => Ok(LogContext::Performance(c)),
            Ok(Tagged::ApiCall(c)) => Ok(LogContext::ApiCall(c)),
            Ok(Tagged::UserAction(c)) => Ok(LogContext::UserAction(c)),
            Ok(Tagged::Security(c)) => Ok(LogContext::Security(c)),
            Err(_) => Ok(LogContext::Generic(map)),
        }
    }
}

/// One observed event, as buffered by the logger and shipped to `/api/logs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<LogContext>,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Envelope posted by a flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub logs: Vec<LogRecord>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn level_is_numeric_on_the_wire() {
        assert_eq!(serde_json::to_value(LogLevel::Error).unwrap(), json!(3));
        let level: LogLevel = serde_json::from_value(json!(4)).unwrap();
        assert_eq!(level, LogLevel::Fatal);
        assert!(serde_json::from_value::<LogLevel>(json!(9)).is_err());
    }

    #[test]
    fn level_parses_names_and_numbers() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("1".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Debug < LogLevel::Fatal);
    }

    #[test]
    fn performance_context_carries_type_tag() {
        let ctx = LogContext::Performance(PerformanceContext {
            metric: "api_response_time".into(),
            value: 120.0,
            unit: "ms".into(),
        });
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(
            value,
            json!({"type": "performance", "metric": "api_response_time", "value": 120.0, "unit": "ms"})
        );
    }

    #[test]
    fn user_action_details_are_flattened() {
        let mut details = Map::new();
        details.insert("button".into(), json!("send"));
        let ctx = LogContext::UserAction(UserActionContext { action: "click".into(), details });

        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value, json!({"type": "user_action", "action": "click", "button": "send"}));

        let back: LogContext = serde_json::from_value(value).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn unknown_or_malformed_context_stays_generic() {
        let untyped: LogContext = serde_json::from_value(json!({"page": "home"})).unwrap();
        assert!(matches!(untyped, LogContext::Generic(_)));

        let custom: LogContext = serde_json::from_value(json!({"type": "navigation"})).unwrap();
        assert_eq!(custom.kind(), Some("navigation"));

        // `performance` without a numeric value cannot be typed
        let partial: LogContext =
            serde_json::from_value(json!({"type": "performance", "metric": "x"})).unwrap();
        assert!(matches!(partial, LogContext::Generic(_)));
        assert_eq!(partial.kind(), Some("performance"));
    }

    #[test]
    fn record_uses_camel_case_and_skips_absent_fields() {
        let record = LogRecord {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: "hello".into(),
            context: None,
            session_id: "s1".into(),
            user_id: None,
            user_agent: Some("agent".into()),
            url: None,
            stack: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["sessionId"], json!("s1"));
        assert_eq!(value["userAgent"], json!("agent"));
        assert!(value.get("stack").is_none());
        assert!(value.get("context").is_none());
    }
}
