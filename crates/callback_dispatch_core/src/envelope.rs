use aws_lambda_events::event::sqs::SqsMessage;
use serde_json::{Map, Value};

use crate::contract::{DispatchError, ResolvedCallback, SourceKind, OUTPUT_FIELD, TOKEN_FIELD};

pub const RECORDS_FIELD: &str = "Records";
pub const QUEUE_EVENT_SOURCE: &str = "aws:sqs";
pub const TOPIC_EVENT_SOURCE: &str = "aws:sns";

const DIRECT_LOCATION: &str = "$";

/// Inbound event after transport classification.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    DirectInvocation(Map<String, Value>),
    QueuedMessage(Vec<QueueRecord>),
    TopicNotification(Vec<TopicRecord>),
}

/// Position-tagged SQS message of a queue batch.
#[derive(Debug, Clone)]
pub struct QueueRecord {
    pub index: usize,
    pub message: SqsMessage,
}

/// SNS record of a topic batch. Kept untyped because test fixtures and
/// replayed notifications often omit the envelope metadata that
/// `aws_lambda_events` requires.
#[derive(Debug, Clone)]
pub struct TopicRecord {
    pub index: usize,
    pub message_id: Option<String>,
    pub raw: Value,
}

/// One embedded record of an enveloped event.
pub trait EnvelopeRecord {
    fn index(&self) -> usize;
    fn message_id(&self) -> Option<&str>;
    fn resolve(&self) -> Result<ResolvedCallback, DispatchError>;
}

impl EnvelopeRecord for QueueRecord {
    fn index(&self) -> usize {
        self.index
    }

    fn message_id(&self) -> Option<&str> {
        self.message.message_id.as_deref()
    }

    fn resolve(&self) -> Result<ResolvedCallback, DispatchError> {
        resolve_queue_record(self)
    }
}

impl EnvelopeRecord for TopicRecord {
    fn index(&self) -> usize {
        self.index
    }

    fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    fn resolve(&self) -> Result<ResolvedCallback, DispatchError> {
        resolve_topic_record(self)
    }
}

impl InboundEvent {
    /// Classifies a raw event by its shape.
    ///
    /// An object without `Records` is a direct invocation. Otherwise the first
    /// record decides the kind, from its `eventSource` tag when present and
    /// from its shape when not, and every other record must agree. Queue
    /// records must also decode as SQS messages.
    pub fn from_value(event: Value) -> Result<Self, DispatchError> {
        let Value::Object(mut object) = event else {
            return Err(DispatchError::malformed("event payload must be a JSON object"));
        };

        let Some(records) = object.remove(RECORDS_FIELD) else {
            return Ok(Self::DirectInvocation(object));
        };

        let Value::Array(records) = records else {
            return Err(DispatchError::malformed(format!(
                "{RECORDS_FIELD} must be an array"
            )));
        };

        let Some(first) = records.first() else {
            return Err(DispatchError::malformed(format!(
                "{RECORDS_FIELD} must contain at least one record"
            )));
        };

        let source = classify_record(first).ok_or_else(|| {
            DispatchError::malformed(format!(
                "{RECORDS_FIELD}[0] has no recognised event source"
            ))
        })?;

        let mut queue_records = Vec::new();
        let mut topic_records = Vec::new();
        for (index, raw) in records.into_iter().enumerate() {
            if classify_record(&raw) != Some(source) {
                return Err(DispatchError::malformed(format!(
                    "{RECORDS_FIELD}[{index}] is not a {source} record"
                )));
            }

            if source == SourceKind::Topic {
                let message_id = raw
                    .get("Sns")
                    .and_then(|sns| sns.get("MessageId"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                topic_records.push(TopicRecord {
                    index,
                    message_id,
                    raw,
                });
            } else {
                let message = serde_json::from_value::<SqsMessage>(raw).map_err(|error| {
                    DispatchError::malformed(format!(
                        "{RECORDS_FIELD}[{index}] is not a valid queue record: {error}"
                    ))
                })?;
                queue_records.push(QueueRecord { index, message });
            }
        }

        Ok(match source {
            SourceKind::Topic => Self::TopicNotification(topic_records),
            _ => Self::QueuedMessage(queue_records),
        })
    }

    pub fn source(&self) -> SourceKind {
        match self {
            Self::DirectInvocation(_) => SourceKind::Direct,
            Self::QueuedMessage(_) => SourceKind::Queue,
            Self::TopicNotification(_) => SourceKind::Topic,
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            Self::DirectInvocation(_) => 1,
            Self::QueuedMessage(records) => records.len(),
            Self::TopicNotification(records) => records.len(),
        }
    }

    /// Transport message ids present in the batch, in record order.
    pub fn message_ids(&self) -> Vec<&str> {
        match self {
            Self::DirectInvocation(_) => Vec::new(),
            Self::QueuedMessage(records) => {
                records.iter().filter_map(EnvelopeRecord::message_id).collect()
            }
            Self::TopicNotification(records) => {
                records.iter().filter_map(EnvelopeRecord::message_id).collect()
            }
        }
    }
}

fn classify_record(record: &Value) -> Option<SourceKind> {
    let object = record.as_object()?;
    let tag = object
        .get("eventSource")
        .or_else(|| object.get("EventSource"))
        .and_then(Value::as_str);

    match tag {
        Some(QUEUE_EVENT_SOURCE) => Some(SourceKind::Queue),
        Some(TOPIC_EVENT_SOURCE) => Some(SourceKind::Topic),
        Some(_) => None,
        None if object.get("Sns").is_some_and(Value::is_object) => Some(SourceKind::Topic),
        None if object.contains_key("body") => Some(SourceKind::Queue),
        None => None,
    }
}

pub fn resolve_direct(payload: &Map<String, Value>) -> Result<ResolvedCallback, DispatchError> {
    extract_callback(payload, DIRECT_LOCATION)
}

pub fn resolve_queue_record(record: &QueueRecord) -> Result<ResolvedCallback, DispatchError> {
    let location = format!("{RECORDS_FIELD}[{}].body", record.index);
    let body = record
        .message
        .body
        .as_deref()
        .ok_or_else(|| DispatchError::malformed(format!("{location} must be a string")))?;

    let object = parse_embedded_object(body, &location)?;
    extract_callback(&object, &location)
}

pub fn resolve_topic_record(record: &TopicRecord) -> Result<ResolvedCallback, DispatchError> {
    let location = format!("{RECORDS_FIELD}[{}].Sns.Message", record.index);
    let message = record
        .raw
        .get("Sns")
        .and_then(|sns| sns.get("Message"))
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::malformed(format!("{location} must be a string")))?;

    let object = parse_embedded_object(message, &location)?;
    extract_callback(&object, &location)
}

fn parse_embedded_object(text: &str, location: &str) -> Result<Map<String, Value>, DispatchError> {
    serde_json::from_str::<Value>(text)
        .map_err(|error| DispatchError::malformed(format!("{location} is not valid JSON: {error}")))
        .and_then(|value| match value {
            Value::Object(object) => Ok(object),
            _ => Err(DispatchError::malformed(format!(
                "{location} must encode a JSON object"
            ))),
        })
}

fn extract_callback(
    object: &Map<String, Value>,
    location: &str,
) -> Result<ResolvedCallback, DispatchError> {
    let token = match object.get(TOKEN_FIELD) {
        Some(Value::String(token)) if !token.trim().is_empty() => token.clone(),
        _ => return Err(DispatchError::missing_token(format!("{location}.{TOKEN_FIELD}"))),
    };

    let output = object
        .get(OUTPUT_FIELD)
        .filter(|value| !value.is_null())
        .cloned();

    Ok(ResolvedCallback { token, output })
}
