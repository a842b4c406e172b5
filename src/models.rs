use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference from a message to a pre-priced report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportRef {
    Absent,
    Id(i64),
    /// Present but not integer-like; priced from the text instead.
    Invalid(String),
}

/// One upstream message, decoded from its raw JSON object.
///
/// `text` is kept raw and only checked by [`Message::text`]: a message priced
/// from a report never reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub timestamp: String,
    pub text: Option<Value>,
    pub report: ReportRef,
}

impl Message {
    pub fn from_value(raw: &Value) -> Result<Self, MessageError> {
        let obj = raw.as_object().ok_or(MessageError::NotAnObject)?;

        let id = match field(obj, "id") {
            Some(v) => parse_integer(v).ok_or(MessageError::InvalidField {
                field: "id",
                expected: "an integer",
            })?,
            None => return Err(MessageError::MissingField("id")),
        };

        let timestamp = match field(obj, "timestamp") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(MessageError::InvalidField {
                    field: "timestamp",
                    expected: "a string",
                })
            }
            None => return Err(MessageError::MissingField("timestamp")),
        };

        Ok(Self {
            id,
            timestamp,
            text: field(obj, "text").cloned(),
            report: report_ref(obj.get("report_id")),
        })
    }

    pub fn text(&self) -> Result<&str, MessageError> {
        match &self.text {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(_) => Err(MessageError::InvalidField {
                field: "text",
                expected: "a string",
            }),
            None => Err(MessageError::MissingField("text")),
        }
    }
}

fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    obj.get(name).filter(|v| !v.is_null())
}

/// Accepts JSON integers, integral floats and strings holding a base-10
/// integer.
pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn report_ref(value: Option<&Value>) -> ReportRef {
    let Some(value) = value else {
        return ReportRef::Absent;
    };
    match value {
        Value::Null | Value::Bool(false) => ReportRef::Absent,
        Value::String(s) if s.is_empty() => ReportRef::Absent,
        Value::Number(n) if n.as_f64() == Some(0.0) => ReportRef::Absent,
        other => match parse_integer(other) {
            Some(id) => ReportRef::Id(id),
            None => ReportRef::Invalid(other.to_string()),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDetails {
    pub name: String,
    pub credit_cost: f64,
}

impl ReportDetails {
    pub fn from_object(obj: &Map<String, Value>) -> Result<Self, MessageError> {
        let name = match field(obj, "name") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(MessageError::InvalidField {
                    field: "name",
                    expected: "a string",
                })
            }
            None => return Err(MessageError::MissingField("name")),
        };

        let credit_cost = match field(obj, "credit_cost") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
            None => return Err(MessageError::MissingField("credit_cost")),
        }
        .ok_or(MessageError::InvalidField {
            field: "credit_cost",
            expected: "a number",
        })?;

        Ok(Self { name, credit_cost })
    }
}

/// Outcome of asking the upstream store for a report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportLookup {
    Found(ReportDetails),
    NotFound,
    /// Body was not a usable JSON object (undecodable, not an object, or
    /// empty); the message is priced from its text.
    Unreadable(String),
    /// The report object lacks a field or holds the wrong type; the message
    /// is skipped.
    Malformed(MessageError),
}

impl ReportLookup {
    /// Classifies a decoded report body.
    pub fn from_body(body: &Value) -> Self {
        match body {
            Value::Object(obj) if obj.is_empty() => {
                ReportLookup::Unreadable("empty report object".into())
            }
            Value::Object(obj) => match ReportDetails::from_object(obj) {
                Ok(details) => ReportLookup::Found(details),
                Err(e) => ReportLookup::Malformed(e),
            },
            _ => ReportLookup::Unreadable("expected a JSON object".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub message_id: i64,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub report_name: Option<String>,
    pub credits_used: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UsagePeriodResult {
    pub usage: Vec<UsageEntry>,
}
