//! Event emission.
//!
//! [`ExecutionRuntimeServices`] is the per-run sink for [`LanguageEvent`]s. It
//! keeps every event in emission order and can additionally stream them to a
//! subscriber over an unbounded Tokio channel, the same way workflow runs
//! stream their lifecycle to the UI. Consumers rely on emission order and
//! never re-sort.

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use stepwise_types::events::keys;
use stepwise_types::{EventType, LanguageEvent, StepType, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Ordered payload builder.
///
/// Every payload starts with the step name, step type, execution path and a
/// human-readable description.
#[derive(Debug, Clone)]
pub struct EventPayload {
    data: IndexMap<String, JsonValue>,
}

impl EventPayload {
    pub fn new(step_name: &str, step_type: StepType, path: String, description: &str) -> Self {
        let mut data = IndexMap::new();
        data.insert(keys::STEP_NAME.to_string(), JsonValue::String(step_name.to_string()));
        data.insert(keys::STEP_TYPE.to_string(), JsonValue::String(step_type.as_str().to_string()));
        data.insert(keys::PATH.to_string(), JsonValue::String(path));
        data.insert(keys::DESCRIPTION.to_string(), JsonValue::String(description.to_string()));
        Self { data }
    }

    pub fn with(mut self, key: &str, value: JsonValue) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    /// Add a bound-value map, rendering sensitive entries as the mask.
    pub fn with_values(self, key: &str, values: &IndexMap<String, Value>) -> Self {
        self.with(key, masked_map(values))
    }

    pub fn into_data(self) -> IndexMap<String, JsonValue> {
        self.data
    }
}

/// JSON object of `values` with sensitive entries masked, in map order.
pub fn masked_map(values: &IndexMap<String, Value>) -> JsonValue {
    JsonValue::Object(values.iter().map(|(name, value)| (name.clone(), value.masked())).collect())
}

/// Per-run event sink.
#[derive(Debug, Default)]
pub struct ExecutionRuntimeServices {
    events: Vec<LanguageEvent>,
    next_sequence: u64,
    subscriber: Option<UnboundedSender<LanguageEvent>>,
}

impl ExecutionRuntimeServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also forward each event to `subscriber` as it is emitted.
    pub fn with_subscriber(subscriber: UnboundedSender<LanguageEvent>) -> Self {
        Self {
            subscriber: Some(subscriber),
            ..Self::default()
        }
    }

    /// Append an event; returns its sequence number.
    pub fn emit(&mut self, event_type: EventType, payload: EventPayload) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let event = LanguageEvent {
            event_type,
            sequence,
            timestamp: Utc::now(),
            data: payload.into_data(),
        };
        debug!(
            event = event_type.as_str(),
            sequence,
            step = event.step_name().unwrap_or_default(),
            "language event"
        );

        if let Some(subscriber) = &self.subscriber
            && subscriber.send(event.clone()).is_err()
        {
            debug!("event subscriber dropped; continuing without streaming");
            self.subscriber = None;
        }
        self.events.push(event);
        sequence
    }

    pub fn events(&self) -> &[LanguageEvent] {
        &self.events
    }

    /// Event types in emission order.
    pub fn event_types(&self) -> Vec<EventType> {
        self.events.iter().map(|event| event.event_type).collect()
    }

    pub fn events_of(&self, event_type: EventType) -> impl Iterator<Item = &LanguageEvent> {
        self.events.iter().filter(move |event| event.event_type == event_type)
    }

    /// Remove and return every recorded event.
    pub fn drain_events(&mut self) -> Vec<LanguageEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::indexmap;
    use serde_json::json;
    use stepwise_types::SENSITIVE_VALUE_MASK;

    fn payload() -> EventPayload {
        EventPayload::new("login", StepType::Operation, "0.1".to_string(), "Input binding finished")
    }

    #[test]
    fn payload_starts_with_common_keys_and_masks_values() {
        let values = indexmap! {
            "user".to_string() => Value::new("jane"),
            "password".to_string() => Value::sensitive("hunter2"),
        };
        let data = payload().with_values(keys::BOUND_INPUTS, &values).into_data();

        assert_eq!(
            data.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["stepName", "stepType", "path", "description", "boundInputs"]
        );
        assert_eq!(data["boundInputs"], json!({"user": "jane", "password": SENSITIVE_VALUE_MASK}));
    }

    #[test]
    fn events_are_sequenced_in_emission_order() {
        let mut services = ExecutionRuntimeServices::new();
        services.emit(EventType::InputStart, payload());
        services.emit(EventType::InputEnd, payload());

        assert_eq!(services.event_types(), vec![EventType::InputStart, EventType::InputEnd]);
        assert_eq!(services.events().iter().map(|event| event.sequence).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(services.drain_events().len(), 2);
        assert!(services.events().is_empty());
    }

    #[tokio::test]
    async fn streams_events_to_subscriber() {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
        let mut services = ExecutionRuntimeServices::with_subscriber(sender);

        services.emit(EventType::ActionStart, payload());
        let streamed = receiver.recv().await.expect("streamed event");
        assert_eq!(streamed.event_type, EventType::ActionStart);
        assert_eq!(streamed.step_name(), Some("login"));

        drop(receiver);
        services.emit(EventType::ActionEnd, payload());
        assert_eq!(services.events().len(), 2);
    }
}
