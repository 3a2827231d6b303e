//! In-memory event capture for logging assertions
//!
//! Storage operations promise one `start` and one terminal event (`end` or
//! `end_error`) per call. The capture handle lets tests check that pairing
//! and look events up by the ids the store logs (`record_id`, `session_id`,
//! `backup_id`).

use evidex_core_types::schema::{
    EVENT_END, EVENT_END_ERROR, EVENT_START, FIELD_BACKUP_ID, FIELD_COMPONENT, FIELD_ERR_CODE,
    FIELD_EVENT, FIELD_OP, FIELD_RECORD_ID, FIELD_SESSION_ID,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// One captured tracing event, every field rendered as a string
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub op: Option<String>,
    pub event: Option<String>,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn component(&self) -> Option<&str> {
        self.field(FIELD_COMPONENT)
    }

    pub fn record_id(&self) -> Option<&str> {
        self.field(FIELD_RECORD_ID)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.field(FIELD_SESSION_ID)
    }

    pub fn backup_id(&self) -> Option<&str> {
        self.field(FIELD_BACKUP_ID)
    }

    /// Stable `ERR_*` code of an `end_error` event
    pub fn err_code(&self) -> Option<&str> {
        self.field(FIELD_ERR_CODE)
    }

    pub fn is(&self, op: &str, event: &str) -> bool {
        self.op.as_deref() == Some(op) && self.event.as_deref() == Some(event)
    }
}

/// Start/terminal event counts for one operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpSummary {
    pub starts: usize,
    pub ends: usize,
    pub errors: usize,
}

impl OpSummary {
    pub fn is_balanced(&self) -> bool {
        self.starts == self.ends + self.errors
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: BTreeMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.fields.insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }
}

/// Layer pushing every event into a shared buffer
pub struct TestCaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl TestCaptureLayer {
    pub fn new() -> (Self, TestCapture) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: Arc::clone(&events),
            },
            TestCapture { events },
        )
    }
}

impl<S> Layer<S> for TestCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let captured = CapturedEvent {
            level: *event.metadata().level(),
            op: visitor.fields.get(FIELD_OP).cloned(),
            event: visitor.fields.get(FIELD_EVENT).cloned(),
            fields: visitor.fields,
        };
        if let Ok(mut events) = self.events.lock() {
            events.push(captured);
        }
    }
}

/// Handle onto the captured events
#[derive(Clone)]
pub struct TestCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl TestCapture {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for_op(&self, op: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.op.as_deref() == Some(op))
            .collect()
    }

    /// Events of `op` carrying `field = value`
    pub fn events_with(&self, op: &str, field: &str, value: &str) -> Vec<CapturedEvent> {
        self.events_for_op(op)
            .into_iter()
            .filter(|e| e.field(field) == Some(value))
            .collect()
    }

    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CapturedEvent) -> bool,
    {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    /// Start/end/error counts of `op`, optionally narrowed to events whose
    /// `field` equals `value`
    pub fn op_summary(&self, op: &str, filter: Option<(&str, &str)>) -> OpSummary {
        let events = match filter {
            Some((field, value)) => self.events_with(op, field, value),
            None => self.events_for_op(op),
        };
        let mut summary = OpSummary::default();
        for e in &events {
            match e.event.as_deref() {
                Some(EVENT_START) => summary.starts += 1,
                Some(EVENT_END) => summary.ends += 1,
                Some(EVENT_END_ERROR) => summary.errors += 1,
                _ => {}
            }
        }
        summary
    }

    /// Error codes logged by `end_error` events of `op`
    pub fn error_codes(&self, op: &str) -> Vec<String> {
        self.events_for_op(op)
            .into_iter()
            .filter(|e| e.event.as_deref() == Some(EVENT_END_ERROR))
            .filter_map(|e| e.err_code().map(str::to_string))
            .collect()
    }

    /// # Panics
    ///
    /// When no event of `op` has the given event name.
    pub fn assert_event_exists(&self, op: &str, event: &str) {
        let events = self.events();
        assert!(
            events.iter().any(|e| e.is(op, event)),
            "no {}/{} event among {} captured",
            op,
            event,
            events.len()
        );
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

static GLOBAL_CAPTURE: OnceLock<TestCapture> = OnceLock::new();

/// Install the capture layer as the global subscriber (once) and return it
///
/// All tests in a process share the buffer; filter on values unique to the
/// test, such as a record id.
///
/// ```
/// use evidex_core::logging_facility::test_capture::init_test_capture;
/// use evidex_core::log_op_start;
///
/// let capture = init_test_capture();
/// log_op_start!("doc_example_op");
/// capture.assert_event_exists("doc_example_op", "start");
/// ```
pub fn init_test_capture() -> TestCapture {
    GLOBAL_CAPTURE
        .get_or_init(|| {
            let (layer, capture) = TestCaptureLayer::new();
            tracing_subscriber::registry().with(layer).init();
            capture
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op: &str, name: &str, extra: &[(&str, &str)]) -> CapturedEvent {
        let mut fields: BTreeMap<String, String> = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        fields.insert(FIELD_OP.to_string(), op.to_string());
        fields.insert(FIELD_EVENT.to_string(), name.to_string());
        CapturedEvent {
            level: Level::INFO,
            op: Some(op.to_string()),
            event: Some(name.to_string()),
            fields,
        }
    }

    #[test]
    fn test_summary_balances_start_against_end_and_error() {
        let (_layer, capture) = TestCaptureLayer::new();
        {
            let mut events = capture.events.lock().unwrap();
            events.push(event("write_record", EVENT_START, &[("record_id", "a")]));
            events.push(event("write_record", EVENT_END, &[("record_id", "a")]));
            events.push(event("write_record", EVENT_START, &[("record_id", "b")]));
            events.push(event(
                "write_record",
                EVENT_END_ERROR,
                &[("record_id", "b"), ("err_code", "ERR_IO")],
            ));
        }

        let all = capture.op_summary("write_record", None);
        assert_eq!(all, OpSummary { starts: 2, ends: 1, errors: 1 });
        assert!(all.is_balanced());
        let only_b = capture.op_summary("write_record", Some(("record_id", "b")));
        assert_eq!(only_b.errors, 1);
        assert_eq!(capture.error_codes("write_record"), vec!["ERR_IO".to_string()]);
    }

    #[test]
    fn test_accessors_read_schema_fields() {
        let e = event(
            "restore_backup",
            EVENT_START,
            &[("backup_id", "b1"), ("session_id", "s1"), ("component", "evidex_store::backup")],
        );
        assert_eq!(e.backup_id(), Some("b1"));
        assert_eq!(e.session_id(), Some("s1"));
        assert_eq!(e.component(), Some("evidex_store::backup"));
        assert!(e.record_id().is_none());
        assert!(e.is("restore_backup", EVENT_START));
    }

    #[test]
    fn test_clear_empties_local_capture() {
        let (_layer, capture) = TestCaptureLayer::new();
        capture.clear();
        assert!(capture.events().is_empty());
    }
}
