use callback_dispatch_lambda::config::log_format_from_env;
use callback_dispatch_lambda::handlers::greeting::handle_greeting_event;
use callback_dispatch_lambda::handlers::response::ApiGatewayResponse;
use callback_dispatch_lambda::telemetry::init_logging;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

async fn handle_request(event: LambdaEvent<Value>) -> Result<ApiGatewayResponse, Error> {
    let response = handle_greeting_event(event.payload);
    tracing::info!(
        component = "greeting_handler",
        event = "greeting_answered",
        request_id = %event.context.request_id,
        status_code = response.status_code,
    );
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging(log_format_from_env()?);

    lambda_runtime::run(service_fn(handle_request)).await
}
