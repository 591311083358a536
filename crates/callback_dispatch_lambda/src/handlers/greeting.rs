use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handlers::response::{request_payload, ApiGatewayResponse};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct GreetingRequest {
    name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
struct GreetingResponse {
    message: String,
}

pub fn handle_greeting_event(event: Value) -> ApiGatewayResponse {
    let request = request_payload(event).and_then(|payload| {
        serde_json::from_value::<GreetingRequest>(payload)
            .map_err(|error| format!("Malformed request: {error}"))
    });

    match request {
        Ok(request) => ApiGatewayResponse::json(
            200,
            &GreetingResponse {
                message: format!("Hello {}", request.name),
            },
        ),
        Err(message) => ApiGatewayResponse::bad_request(&message),
    }
}
