// skein-test-utils: frame-level protocol helpers for integration tests.

mod mock_ws_client;

pub use mock_ws_client::MockWsClient;

use skein_core::StreamEvent;

/// `count` generic payload values for event store tests.
pub fn event_values(count: u64) -> Vec<serde_json::Value> {
    (1..=count)
        .map(|i| serde_json::json!({ "kind": "test", "value": i }))
        .collect()
}

/// A short text-producing run: deltas, a step boundary, done.
pub fn text_run_events(text: &str) -> Vec<StreamEvent> {
    vec![
        StreamEvent::StepStart,
        StreamEvent::TextDelta {
            delta: text.to_owned(),
        },
        StreamEvent::StepEnd,
    ]
}
