//! Wire codec: semicolon-delimited `key=value=dtype` tokens.
//!
//! The first token is the bare command name. Every subsequent non-empty
//! token is `key=value=dtype` with `dtype ∈ {int, float, str, bool}`.
//! Trailing semicolons are allowed (the resulting empty-string token is
//! skipped); any other malformed token rejects the whole message. This
//! legacy format is kept for wire compatibility with an external GUI that
//! already speaks it, so it is hand-parsed rather than derived from
//! `serde`, even though the typed [`Command`]/[`AgentMessage`] enums
//! underneath it are ordinary Rust enums.

use crate::error::ProtocolError;
use std::fmt::Write as _;

/// A single decoded field value, tagged with its wire dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl FieldValue {
    fn dtype_name(&self) -> &'static str {
        match self {
            FieldValue::Int(_) => "int",
            FieldValue::Float(_) => "float",
            FieldValue::Str(_) => "str",
            FieldValue::Bool(_) => "bool",
        }
    }

    fn write_value(&self, out: &mut String) {
        match self {
            FieldValue::Int(v) => {
                let _ = write!(out, "{v}");
            }
            FieldValue::Float(v) => {
                let _ = write!(out, "{v}");
            }
            FieldValue::Str(v) => out.push_str(v),
            FieldValue::Bool(v) => out.push_str(if *v { "True" } else { "False" }),
        }
    }
}

/// A decoded message: bare command name plus its ordered `key=value=dtype`
/// fields. This is the wire-level representation; [`Command`] and
/// [`AgentMessage`] are the typed views built on top of it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawMessage {
    pub command: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl RawMessage {
    pub fn new(command: impl Into<String>) -> Self {
        RawMessage {
            command: command.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_int(mut self, key: &str, value: i64) -> Self {
        self.fields.push((key.to_owned(), FieldValue::Int(value)));
        self
    }

    pub fn with_float(mut self, key: &str, value: f64) -> Self {
        self.fields
            .push((key.to_owned(), FieldValue::Float(value)));
        self
    }

    pub fn with_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields
            .push((key.to_owned(), FieldValue::Str(value.into())));
        self
    }

    pub fn with_bool(mut self, key: &str, value: bool) -> Self {
        self.fields.push((key.to_owned(), FieldValue::Bool(value)));
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_int(&self, key: &str) -> Result<i64, ProtocolError> {
        match self.get(key) {
            Some(FieldValue::Int(v)) => Ok(*v),
            Some(other) => Err(ProtocolError::TypeMismatch {
                field: key.to_owned(),
                value: format!("{other:?}"),
                dtype: "int",
            }),
            None => Err(ProtocolError::MissingField(key.to_owned())),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64, ProtocolError> {
        match self.get(key) {
            Some(FieldValue::Float(v)) => Ok(*v),
            Some(FieldValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(ProtocolError::TypeMismatch {
                field: key.to_owned(),
                value: format!("{other:?}"),
                dtype: "float",
            }),
            None => Err(ProtocolError::MissingField(key.to_owned())),
        }
    }

    pub fn get_float_opt(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(FieldValue::Float(v)) => Some(*v),
            Some(FieldValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Result<&str, ProtocolError> {
        match self.get(key) {
            Some(FieldValue::Str(v)) => Ok(v.as_str()),
            Some(other) => Err(ProtocolError::TypeMismatch {
                field: key.to_owned(),
                value: format!("{other:?}"),
                dtype: "str",
            }),
            None => Err(ProtocolError::MissingField(key.to_owned())),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, ProtocolError> {
        match self.get(key) {
            Some(FieldValue::Bool(v)) => Ok(*v),
            Some(other) => Err(ProtocolError::TypeMismatch {
                field: key.to_owned(),
                value: format!("{other:?}"),
                dtype: "bool",
            }),
            None => Err(ProtocolError::MissingField(key.to_owned())),
        }
    }
}

/// Serialize a [`RawMessage`] to its wire form.
pub fn encode(msg: &RawMessage) -> String {
    let mut out = String::new();
    out.push_str(&msg.command);
    for (key, value) in &msg.fields {
        out.push(';');
        out.push_str(key);
        out.push('=');
        value.write_value(&mut out);
        out.push('=');
        out.push_str(value.dtype_name());
    }
    out.push(';');
    out
}

/// Parse a wire-form message. Strict: any token that isn't an empty
/// trailing piece and isn't of the form `key=value=dtype` rejects the
/// whole message.
pub fn decode(s: &str) -> Result<RawMessage, ProtocolError> {
    let mut parts = s.split(';');
    let command = parts.next().filter(|c| !c.is_empty());
    let command = command.ok_or(ProtocolError::EmptyMessage)?.to_owned();

    let mut fields = Vec::new();
    for token in parts {
        if token.is_empty() {
            continue;
        }
        let mut pieces = token.splitn(3, '=');
        let key = pieces.next();
        let value = pieces.next();
        let dtype = pieces.next();
        let (key, value, dtype) = match (key, value, dtype) {
            (Some(k), Some(v), Some(d)) if !k.is_empty() => (k, v, d),
            _ => return Err(ProtocolError::MalformedToken(token.to_owned())),
        };

        let parsed = match dtype {
            "int" => value
                .parse::<i64>()
                .map(FieldValue::Int)
                .map_err(|_| ProtocolError::TypeMismatch {
                    field: key.to_owned(),
                    value: value.to_owned(),
                    dtype: "int",
                })?,
            "float" => value
                .parse::<f64>()
                .map(FieldValue::Float)
                .map_err(|_| ProtocolError::TypeMismatch {
                    field: key.to_owned(),
                    value: value.to_owned(),
                    dtype: "float",
                })?,
            "str" => FieldValue::Str(value.to_owned()),
            "bool" => match value {
                "True" => FieldValue::Bool(true),
                "False" => FieldValue::Bool(false),
                _ => {
                    return Err(ProtocolError::TypeMismatch {
                        field: key.to_owned(),
                        value: value.to_owned(),
                        dtype: "bool",
                    })
                }
            },
            other => return Err(ProtocolError::UnknownDtype(other.to_owned())),
        };
        fields.push((key.to_owned(), parsed));
    }

    Ok(RawMessage { command, fields })
}
