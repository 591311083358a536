use aws_lambda_events::event::sqs::{BatchItemFailure, SqsBatchResponse};
use callback_dispatch_core::contract::{
    token_fingerprint, CompletionReport, DispatchError, DispatchOutcome, RecordFailure,
    ResolvedCallback, SourceKind, DEFAULT_RESULT_OUTPUT,
};
use callback_dispatch_core::envelope::{
    resolve_direct, EnvelopeRecord, InboundEvent, QueueRecord, TopicRecord,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::adapters::coordinator::TaskCoordinator;

const COMPONENT: &str = "callback_dispatcher";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Serialized JSON reported when a record carries no `Output`.
    pub default_output: String,
    /// When set, events of any other source kind are rejected.
    pub expected_source: Option<SourceKind>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_output: DEFAULT_RESULT_OUTPUT.to_string(),
            expected_source: None,
        }
    }
}

/// Lambda response for one invocation. A partially failed queue batch
/// carries the SQS partial batch response fields at the top level.
#[derive(Debug, Clone, Serialize)]
pub struct InvocationSummary {
    pub status: String,
    pub source: SourceKind,
    pub reported: usize,
    pub event_time: String,
    #[serde(flatten)]
    pub batch_response: Option<SqsBatchResponse>,
}

/// Turns inbound events into completion reports, one per resolvable record.
pub struct Dispatcher<C> {
    coordinator: C,
    settings: DispatchSettings,
}

impl<C: TaskCoordinator> Dispatcher<C> {
    pub fn new(coordinator: C, settings: DispatchSettings) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Logs and classifies a raw transport event, then dispatches it.
    pub fn handle_value(&self, event: Value) -> Result<DispatchOutcome, DispatchError> {
        debug!(component = COMPONENT, event = "inbound_payload", payload = %event);

        let event = InboundEvent::from_value(event).map_err(|error| {
            warn!(
                component = COMPONENT,
                event = "event_rejected",
                error_code = error.code(),
                error = %error,
            );
            error
        })?;
        info!(
            component = COMPONENT,
            event = "inbound_event",
            source = %event.source(),
            records = event.record_count(),
            message_ids = ?event.message_ids(),
        );
        self.handle(&event)
    }

    /// Dispatches every record of the event.
    ///
    /// Only event-level problems fail the call; record-level failures are
    /// collected in the outcome so the remaining records still get reported.
    pub fn handle(&self, event: &InboundEvent) -> Result<DispatchOutcome, DispatchError> {
        let source = event.source();
        if let Some(expected) = self.settings.expected_source {
            if expected != source {
                let error = DispatchError::malformed(format!(
                    "expected a {expected} event but received a {source} event"
                ));
                warn!(
                    component = COMPONENT,
                    event = "event_rejected",
                    source = %source,
                    error_code = error.code(),
                    error = %error,
                );
                return Err(error);
            }
        }

        info!(
            component = COMPONENT,
            event = "dispatch_started",
            source = %source,
            records = event.record_count(),
        );

        let outcome = match event {
            InboundEvent::DirectInvocation(payload) => {
                let mut outcome = DispatchOutcome::new(SourceKind::Direct);
                match self.handle_direct(payload) {
                    Ok(report) => outcome.reports.push(report),
                    Err(error) => outcome.failures.push(RecordFailure {
                        index: 0,
                        message_id: None,
                        error,
                    }),
                }
                outcome
            }
            InboundEvent::QueuedMessage(records) => self.handle_queue(records),
            InboundEvent::TopicNotification(records) => self.handle_topic(records),
        };

        info!(
            component = COMPONENT,
            event = "dispatch_completed",
            source = %source,
            reported = outcome.reports.len(),
            failed = outcome.failures.len(),
        );
        Ok(outcome)
    }

    pub fn handle_direct(
        &self,
        payload: &Map<String, Value>,
    ) -> Result<CompletionReport, DispatchError> {
        self.report(SourceKind::Direct, 0, resolve_direct(payload))
    }

    pub fn handle_queue(&self, records: &[QueueRecord]) -> DispatchOutcome {
        self.dispatch_records(SourceKind::Queue, records)
    }

    pub fn handle_topic(&self, records: &[TopicRecord]) -> DispatchOutcome {
        self.dispatch_records(SourceKind::Topic, records)
    }

    fn dispatch_records<R: EnvelopeRecord>(
        &self,
        source: SourceKind,
        records: &[R],
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::new(source);
        for record in records {
            match self.report(source, record.index(), record.resolve()) {
                Ok(report) => outcome.reports.push(report),
                Err(error) => outcome.failures.push(RecordFailure {
                    index: record.index(),
                    message_id: record.message_id().map(str::to_string),
                    error,
                }),
            }
        }
        outcome
    }

    fn report(
        &self,
        source: SourceKind,
        index: usize,
        resolved: Result<ResolvedCallback, DispatchError>,
    ) -> Result<CompletionReport, DispatchError> {
        let report = resolved
            .and_then(|callback| callback.into_report(&self.settings.default_output))
            .map_err(|error| {
                error!(
                    component = COMPONENT,
                    event = "record_rejected",
                    source = %source,
                    record_index = index,
                    error_code = error.code(),
                    error = %error,
                );
                error
            })?;

        let fingerprint = token_fingerprint(&report.token);
        match self
            .coordinator
            .send_task_success(&report.token, &report.result)
        {
            Ok(ack) => {
                info!(
                    component = COMPONENT,
                    event = "completion_reported",
                    source = %source,
                    record_index = index,
                    token_fingerprint = %fingerprint,
                    ack = ?ack,
                );
                Ok(report)
            }
            Err(coordinator_error) => {
                error!(
                    component = COMPONENT,
                    event = "completion_failed",
                    source = %source,
                    record_index = index,
                    token_fingerprint = %fingerprint,
                    error_kind = %coordinator_error.kind,
                    error = %coordinator_error.message,
                );
                Err(coordinator_error.into())
            }
        }
    }
}

/// Maps a dispatch outcome onto the Lambda response.
///
/// Queue failures become `batchItemFailures` when partial batch responses are
/// enabled and every failed record has a message id. Any other failure fails
/// the invocation so the transport redelivers the whole event.
pub fn summarize_outcome(
    outcome: &DispatchOutcome,
    report_batch_item_failures: bool,
    event_time: &str,
) -> Result<InvocationSummary, DispatchError> {
    let mut summary = InvocationSummary {
        status: "ok".to_string(),
        source: outcome.source,
        reported: outcome.reports.len(),
        event_time: event_time.to_string(),
        batch_response: None,
    };

    let Some(first_failure) = outcome.failures.first() else {
        return Ok(summary);
    };

    let partial_ids = if outcome.source == SourceKind::Queue && report_batch_item_failures {
        outcome.failed_message_ids()
    } else {
        None
    };

    match partial_ids {
        Some(ids) => {
            summary.status = "partial_failure".to_string();
            summary.batch_response = Some(SqsBatchResponse {
                batch_item_failures: ids
                    .into_iter()
                    .map(|item_identifier| BatchItemFailure { item_identifier })
                    .collect(),
            });
            Ok(summary)
        }
        None => Err(first_failure.error.clone()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use callback_dispatch_core::contract::CoordinatorErrorKind;
    use serde_json::json;

    use super::*;
    use crate::adapters::coordinator::{CoordinatorAck, CoordinatorError};
    use crate::config::RuntimeConfig;

    /// Idempotent fake: every call is recorded, but a token only completes once.
    struct RecordingCoordinator {
        calls: Mutex<Vec<CompletionReport>>,
        completed: Mutex<Vec<String>>,
        failure: Option<CoordinatorErrorKind>,
    }

    impl RecordingCoordinator {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                completed: Mutex::new(Vec::new()),
                failure: None,
            }
        }

        fn failing(kind: CoordinatorErrorKind) -> Self {
            Self {
                failure: Some(kind),
                ..Self::new()
            }
        }

        fn calls(&self) -> Vec<CompletionReport> {
            self.calls.lock().expect("poisoned mutex").clone()
        }

        fn completed(&self) -> Vec<String> {
            self.completed.lock().expect("poisoned mutex").clone()
        }
    }

    impl TaskCoordinator for RecordingCoordinator {
        fn send_task_success(
            &self,
            token: &str,
            output: &str,
        ) -> Result<CoordinatorAck, CoordinatorError> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push(CompletionReport {
                    token: token.to_string(),
                    result: output.to_string(),
                });

            if let Some(kind) = self.failure {
                return Err(CoordinatorError::new(kind, "Rate exceeded"));
            }

            let mut completed = self.completed.lock().expect("poisoned mutex");
            if completed.iter().any(|existing| existing == token) {
                return Ok(CoordinatorAck::Duplicate);
            }
            completed.push(token.to_string());
            Ok(CoordinatorAck::Accepted)
        }
    }

    fn dispatcher() -> Dispatcher<RecordingCoordinator> {
        Dispatcher::new(RecordingCoordinator::new(), DispatchSettings::default())
    }

    fn report(token: &str, result: &str) -> CompletionReport {
        CompletionReport {
            token: token.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn queue_event_reports_body_token() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .handle_value(json!({"Records": [{"body": "{\"Token\":\"abc123\"}"}]}))
            .expect("event should dispatch");

        assert_eq!(outcome.source, SourceKind::Queue);
        assert_eq!(outcome.reports, vec![report("abc123", "42")]);
        assert!(outcome.is_complete());
        assert_eq!(dispatcher.coordinator().calls(), vec![report("abc123", "42")]);
    }

    #[test]
    fn topic_event_reports_message_token() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .handle_value(json!({"Records": [{"Sns": {"Message": "{\"Token\":\"xyz789\"}"}}]}))
            .expect("event should dispatch");

        assert_eq!(outcome.source, SourceKind::Topic);
        assert_eq!(outcome.reports, vec![report("xyz789", "42")]);
        assert_eq!(dispatcher.coordinator().calls(), vec![report("xyz789", "42")]);
    }

    #[test]
    fn direct_event_reports_flat_token() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .handle_value(json!({"Token": "direct001"}))
            .expect("event should dispatch");

        assert_eq!(outcome.source, SourceKind::Direct);
        assert_eq!(outcome.reports, vec![report("direct001", "42")]);
        assert_eq!(dispatcher.coordinator().calls().len(), 1);
    }

    #[test]
    fn every_source_kind_yields_exactly_one_report_for_t1() {
        for event in [
            json!({"Token": "T1"}),
            json!({"Records": [{"eventSource": "aws:sqs", "body": "{\"Token\":\"T1\"}"}]}),
            json!({"Records": [{"EventSource": "aws:sns", "Sns": {"Message": "{\"Token\":\"T1\"}"}}]}),
        ] {
            let dispatcher = dispatcher();
            let reports = dispatcher
                .handle_value(event)
                .expect("event should dispatch")
                .into_result()
                .expect("record should report");

            assert_eq!(reports, vec![report("T1", "42")]);
            assert_eq!(dispatcher.coordinator().calls().len(), 1);
        }
    }

    #[test]
    fn malformed_queue_body_fails_without_coordinator_call() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .handle_value(json!({"Records": [{"body": "{not json"}]}))
            .expect("envelope should classify");

        let error = outcome.into_result().expect_err("body should be rejected");
        assert!(matches!(error, DispatchError::MalformedPayload { .. }));
        assert!(dispatcher.coordinator().calls().is_empty());
    }

    #[test]
    fn direct_event_without_token_fails_without_coordinator_call() {
        let dispatcher = dispatcher();
        let payload = Map::from_iter([("Name".to_string(), json!("no token here"))]);

        let error = dispatcher
            .handle_direct(&payload)
            .expect_err("token should be missing");

        assert_eq!(error, DispatchError::missing_token("$.Token"));
        assert!(dispatcher.coordinator().calls().is_empty());
    }

    #[test]
    fn redelivered_token_has_a_single_side_effect() {
        let dispatcher = dispatcher();
        let event = json!({"Records": [{"body": "{\"Token\":\"T2\"}"}]});

        for _ in 0..2 {
            let outcome = dispatcher
                .handle_value(event.clone())
                .expect("event should dispatch");
            assert!(outcome.is_complete());
        }

        assert_eq!(dispatcher.coordinator().calls().len(), 2);
        assert_eq!(dispatcher.coordinator().completed(), vec!["T2".to_string()]);
    }

    #[test]
    fn batch_failures_are_isolated_per_record() {
        let dispatcher = dispatcher();
        let outcome = dispatcher
            .handle_value(json!({
                "Records": [
                    {"eventSource": "aws:sqs", "messageId": "m-0", "body": "{\"Token\":\"first\"}"},
                    {"eventSource": "aws:sqs", "messageId": "m-1", "body": "oops"},
                    {"eventSource": "aws:sqs", "messageId": "m-2", "body": "{\"Token\":\"third\"}"}
                ]
            }))
            .expect("event should dispatch");

        assert_eq!(
            outcome.reports,
            vec![report("first", "42"), report("third", "42")]
        );
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].index, 1);
        assert_eq!(outcome.failures[0].message_id.as_deref(), Some("m-1"));
        assert_eq!(dispatcher.coordinator().calls().len(), 2);
    }

    #[test]
    fn caller_supplied_output_overrides_configured_result() {
        let dispatcher = Dispatcher::new(
            RecordingCoordinator::new(),
            DispatchSettings {
                default_output: r#""configured""#.to_string(),
                expected_source: None,
            },
        );

        let outcome = dispatcher
            .handle_value(json!({
                "Records": [
                    {"body": "{\"Token\":\"with-output\",\"Output\":{\"score\":7}}"},
                    {"body": "{\"Token\":\"without-output\"}"}
                ]
            }))
            .expect("event should dispatch");

        assert_eq!(
            outcome.reports,
            vec![
                report("with-output", r#"{"score":7}"#),
                report("without-output", r#""configured""#),
            ]
        );
    }

    #[test]
    fn pinned_source_rejects_other_kinds_without_coordinator_call() {
        let dispatcher = Dispatcher::new(
            RecordingCoordinator::new(),
            DispatchSettings {
                expected_source: Some(SourceKind::Queue),
                ..DispatchSettings::default()
            },
        );

        let error = dispatcher
            .handle_value(json!({"Token": "direct001"}))
            .expect_err("direct event should be rejected");

        assert_eq!(
            error,
            DispatchError::malformed("expected a queue event but received a direct event")
        );
        assert!(dispatcher.coordinator().calls().is_empty());
    }

    #[test]
    fn coordinator_failure_is_surfaced_as_unavailable() {
        let dispatcher = Dispatcher::new(
            RecordingCoordinator::failing(CoordinatorErrorKind::Throttled),
            DispatchSettings::default(),
        );

        let error = dispatcher
            .handle_value(json!({"Token": "direct001"}))
            .expect("event should dispatch")
            .into_result()
            .expect_err("coordinator should fail");

        assert_eq!(
            error,
            DispatchError::CoordinatorUnavailable {
                kind: CoordinatorErrorKind::Throttled,
                message: "Rate exceeded".to_string(),
            }
        );
    }

    fn failed_outcome(source: SourceKind, message_ids: &[Option<&str>]) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::new(source);
        outcome.reports.push(report("ok", "42"));
        for (index, message_id) in message_ids.iter().enumerate() {
            outcome.failures.push(RecordFailure {
                index,
                message_id: message_id.map(str::to_string),
                error: DispatchError::malformed("bad body"),
            });
        }
        outcome
    }

    #[test]
    fn summary_reports_success() {
        let summary = summarize_outcome(
            &failed_outcome(SourceKind::Topic, &[]),
            true,
            "2026-01-01T00:00:00+00:00",
        )
        .expect("outcome should succeed");

        assert_eq!(summary.status, "ok");
        assert_eq!(summary.reported, 1);

        let body = serde_json::to_value(&summary).expect("summary should serialize");
        assert!(body.get("batchItemFailures").is_none());
    }

    #[test]
    fn summary_lists_queue_item_failures() {
        let summary = summarize_outcome(
            &failed_outcome(SourceKind::Queue, &[Some("m-1"), Some("m-4")]),
            true,
            "2026-01-01T00:00:00+00:00",
        )
        .expect("partial failure should be reported");

        assert_eq!(summary.status, "partial_failure");
        let body = serde_json::to_value(&summary).expect("summary should serialize");
        assert_eq!(
            body["batchItemFailures"],
            json!([{"itemIdentifier": "m-1"}, {"itemIdentifier": "m-4"}])
        );
    }

    #[test]
    fn summary_fails_invocation_when_failures_cannot_be_itemised() {
        let cases = [
            (failed_outcome(SourceKind::Queue, &[Some("m-1"), None]), true),
            (failed_outcome(SourceKind::Queue, &[Some("m-1")]), false),
            (failed_outcome(SourceKind::Topic, &[Some("n-1")]), true),
            (failed_outcome(SourceKind::Direct, &[None]), true),
        ];

        for (outcome, report_batch_item_failures) in cases {
            let error = summarize_outcome(&outcome, report_batch_item_failures, "now")
                .expect_err("invocation should fail");
            assert_eq!(error, DispatchError::malformed("bad body"));
        }
    }

    #[test]
    fn throttled_queue_record_fails_invocation_under_default_config() {
        let config = RuntimeConfig::from_lookup(|_| None).expect("defaults should load");
        let dispatcher = Dispatcher::new(
            RecordingCoordinator::failing(CoordinatorErrorKind::Throttled),
            config.dispatch,
        );

        let outcome = dispatcher
            .handle_value(json!({
                "Records": [
                    {"eventSource": "aws:sqs", "messageId": "m-1", "body": "{\"Token\":\"T3\"}"}
                ]
            }))
            .expect("event should dispatch");

        let error = summarize_outcome(&outcome, config.report_batch_item_failures, "now")
            .expect_err("failed record must be redelivered");
        assert_eq!(error.code(), "coordinator_unavailable");
    }
}
