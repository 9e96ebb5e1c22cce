//! OCPP-J message framing
//!
//! The OCPP-J transport envelope is a JSON array whose first element selects
//! the variant:
//!
//! - **Call**       `[2, "<messageId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<messageId>", {<payload>}]`
//! - **CallError**  `[4, "<messageId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Unknown *action names* are not a framing concern; `decode` only rejects
//! frames whose shape is wrong. `decode(encode(m)) == m` holds for every
//! valid frame.

use serde_json::Value;
use thiserror::Error;

// ── Message-type discriminants ─────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, messageId, action, payload]`
    Call {
        message_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, messageId, payload]`
    CallResult { message_id: String, payload: Value },
    /// `[4, messageId, errorCode, errorDescription, errorDetails]`
    CallError {
        message_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

/// Reasons a raw frame fails to decode. All of these leave the connection
/// open; the offending frame is dropped by the caller.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("empty frame array")]
    EmptyArray,

    #[error("message type is not an integer")]
    InvalidMessageType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("wrong element count for message type {message_type}: expected {expected}, got {got}")]
    WrongArity {
        message_type: u64,
        expected: usize,
        got: usize,
    },

    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

impl OcppFrame {
    // ── Decoding ───────────────────────────────────────────

    /// Decode a raw text frame into an `OcppFrame`.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let arr = value.as_array().ok_or(FrameError::NotAnArray)?;

        if arr.is_empty() {
            return Err(FrameError::EmptyArray);
        }

        let msg_type = arr[0].as_u64().ok_or(FrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::decode_call(arr),
            MSG_TYPE_CALL_RESULT => Self::decode_call_result(arr),
            MSG_TYPE_CALL_ERROR => Self::decode_call_error(arr),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    fn expect_arity(arr: &[Value], msg_type: u64, expected: usize) -> Result<(), FrameError> {
        if arr.len() != expected {
            return Err(FrameError::WrongArity {
                message_type: msg_type,
                expected,
                got: arr.len(),
            });
        }
        Ok(())
    }

    fn string_field(value: &Value, name: &'static str) -> Result<String, FrameError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or(FrameError::FieldTypeMismatch(name))
    }

    fn payload_field(value: &Value) -> Result<Value, FrameError> {
        if value.is_object() {
            Ok(value.clone())
        } else {
            Err(FrameError::FieldTypeMismatch("payload must be an object"))
        }
    }

    fn decode_call(arr: &[Value]) -> Result<Self, FrameError> {
        Self::expect_arity(arr, MSG_TYPE_CALL, 4)?;

        Ok(Self::Call {
            message_id: Self::string_field(&arr[1], "messageId must be a string")?,
            action: Self::string_field(&arr[2], "action must be a string")?,
            payload: Self::payload_field(&arr[3])?,
        })
    }

    fn decode_call_result(arr: &[Value]) -> Result<Self, FrameError> {
        Self::expect_arity(arr, MSG_TYPE_CALL_RESULT, 3)?;

        Ok(Self::CallResult {
            message_id: Self::string_field(&arr[1], "messageId must be a string")?,
            payload: Self::payload_field(&arr[2])?,
        })
    }

    fn decode_call_error(arr: &[Value]) -> Result<Self, FrameError> {
        Self::expect_arity(arr, MSG_TYPE_CALL_ERROR, 5)?;

        Ok(Self::CallError {
            message_id: Self::string_field(&arr[1], "messageId must be a string")?,
            error_code: Self::string_field(&arr[2], "errorCode must be a string")?,
            error_description: Self::string_field(&arr[3], "errorDescription must be a string")?,
            error_details: Self::payload_field(&arr[4])?,
        })
    }

    // ── Encoding ───────────────────────────────────────────

    /// Encode this frame as a single text frame. Exact inverse of [`decode`].
    ///
    /// [`decode`]: OcppFrame::decode
    pub fn encode(&self) -> String {
        let arr = match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL),
                Value::String(message_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult {
                message_id,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_RESULT),
                Value::String(message_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_ERROR),
                Value::String(message_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        // serializing a Value cannot fail
        serde_json::to_string(&arr).unwrap()
    }

    // ── Helpers ────────────────────────────────────────────

    /// The unique message id shared by a Call and its response.
    pub fn message_id(&self) -> &str {
        match self {
            Self::Call { message_id, .. }
            | Self::CallResult { message_id, .. }
            | Self::CallError { message_id, .. } => message_id,
        }
    }

    /// Action name for log records: the Call's action, or the variant name
    /// for responses.
    pub fn message_type(&self) -> &str {
        match self {
            Self::Call { action, .. } => action,
            Self::CallResult { .. } => "CallResult",
            Self::CallError { .. } => "CallError",
        }
    }

    /// Build a `CallError` answering `message_id` with empty details.
    pub fn error_response(
        message_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            message_id: message_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}
