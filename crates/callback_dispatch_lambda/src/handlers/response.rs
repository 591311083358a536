//! API Gateway proxy request and response helpers for HTTP-facing handlers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiGatewayResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub headers: Value,
    pub body: String,
}

impl ApiGatewayResponse {
    /// Pretty-printed JSON body. Falls back to a 500 if the payload cannot be
    /// serialized.
    pub fn json(status_code: u16, payload: &impl Serialize) -> Self {
        match serde_json::to_string_pretty(payload) {
            Ok(body) => Self::with_body(status_code, body),
            Err(error) => Self::error(500, "serialization_error", &error.to_string()),
        }
    }

    pub fn error(status_code: u16, code: &str, message: &str) -> Self {
        let body = json!({ "error": code, "message": message });
        Self::with_body(status_code, body.to_string())
    }

    pub fn bad_request(message: &str) -> Self {
        Self::error(400, "validation_error", message)
    }

    fn with_body(status_code: u16, body: String) -> Self {
        Self {
            status_code,
            headers: json!({ "Content-Type": JSON_CONTENT_TYPE }),
            body,
        }
    }
}

/// Extracts the request payload from either a direct invocation or an API
/// Gateway proxy event, whose `body` may be an object or a JSON string.
pub fn request_payload(event: Value) -> Result<Value, String> {
    let Value::Object(mut object) = event else {
        return Err("request payload must be a JSON object".to_string());
    };

    match object.remove("body") {
        None => Ok(Value::Object(object)),
        Some(Value::Null) => Ok(Value::Object(Map::new())),
        Some(body @ Value::Object(_)) => Ok(body),
        Some(Value::String(text)) => {
            serde_json::from_str(&text).map_err(|error| format!("malformed JSON body: {error}"))
        }
        Some(_) => Err("request body must be a JSON object or a JSON string".to_string()),
    }
}
