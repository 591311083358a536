use aws_sdk_sfn::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sfn::operation::send_task_success::SendTaskSuccessError;
use callback_dispatch_core::contract::CoordinatorErrorKind;
use callback_dispatch_lambda::adapters::coordinator::{
    CoordinatorAck, CoordinatorError, TaskCoordinator,
};
use callback_dispatch_lambda::config::RuntimeConfig;
use callback_dispatch_lambda::handlers::dispatch::{
    summarize_outcome, Dispatcher, InvocationSummary,
};
use callback_dispatch_lambda::telemetry::init_logging;
use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

const THROTTLING_CODES: &[&str] = &["ThrottlingException", "TooManyRequestsException"];

struct StepFunctionsCoordinator {
    sfn_client: aws_sdk_sfn::Client,
}

impl TaskCoordinator for StepFunctionsCoordinator {
    fn send_task_success(
        &self,
        token: &str,
        output: &str,
    ) -> Result<CoordinatorAck, CoordinatorError> {
        let task_token = token.to_string();
        let task_output = output.to_string();
        let client = self.sfn_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .send_task_success()
                    .task_token(task_token)
                    .output(task_output)
                    .send()
                    .await
                    .map(|_| CoordinatorAck::Accepted)
                    .map_err(classify_send_error)
            })
        })
    }
}

fn classify_send_error(error: SdkError<SendTaskSuccessError>) -> CoordinatorError {
    let kind = match &error {
        SdkError::ServiceError(context) => classify_service_error(context.err()),
        _ => CoordinatorErrorKind::Transport,
    };

    CoordinatorError::new(
        kind,
        format!("failed to send task success: {}", DisplayErrorContext(&error)),
    )
}

fn classify_service_error(error: &SendTaskSuccessError) -> CoordinatorErrorKind {
    if error.is_invalid_token() {
        CoordinatorErrorKind::InvalidToken
    } else if error.is_task_does_not_exist() {
        CoordinatorErrorKind::TaskDoesNotExist
    } else if error.is_task_timed_out() {
        CoordinatorErrorKind::TaskTimedOut
    } else if error.is_kms_throttling_exception()
        || error
            .code()
            .is_some_and(|code| THROTTLING_CODES.contains(&code))
    {
        CoordinatorErrorKind::Throttled
    } else {
        CoordinatorErrorKind::Rejected
    }
}

async fn handle_request(
    event: LambdaEvent<Value>,
    dispatcher: &Dispatcher<StepFunctionsCoordinator>,
    report_batch_item_failures: bool,
) -> Result<InvocationSummary, Error> {
    let span = tracing::info_span!("invocation", request_id = %event.context.request_id);
    span.in_scope(|| {
        let outcome = dispatcher.handle_value(event.payload)?;
        let event_time = Utc::now().to_rfc3339();
        summarize_outcome(&outcome, report_batch_item_failures, &event_time)
    })
    .map_err(Error::from)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = RuntimeConfig::from_env()?;
    init_logging(config.log_format);

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let dispatcher = Dispatcher::new(
        StepFunctionsCoordinator {
            sfn_client: aws_sdk_sfn::Client::new(&aws_config),
        },
        config.dispatch,
    );
    let report_batch_item_failures = config.report_batch_item_failures;

    let dispatcher = &dispatcher;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(event, dispatcher, report_batch_item_failures).await
    }))
    .await
}
