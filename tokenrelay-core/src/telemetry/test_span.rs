#![cfg(test)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{span, Event, Level, Subscriber};
use tracing_core::field::{Field, Visit};
use tracing_subscriber::registry;
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

#[derive(Default, Debug)]
pub struct SpanData {
    pub name: String,
    pub fields: Mutex<HashMap<String, String>>, // stringified values via Debug
}

#[derive(Debug, Clone)]
pub struct EventData {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

impl EventData {
    pub fn field(&self, key: &str) -> Option<String> {
        self.fields.get(key).cloned()
    }
}

#[derive(Default, Debug)]
pub struct CaptureStore {
    pub spans: Mutex<HashMap<span::Id, Arc<SpanData>>>,
    pub events: Mutex<Vec<EventData>>,
}

impl CaptureStore {
    pub fn events_named(&self, message: &str) -> Vec<EventData> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.message == message)
            .cloned()
            .collect()
    }

    pub fn last_event(&self, message: &str) -> Option<EventData> {
        self.events_named(message).pop()
    }

    pub fn span_named(&self, name: &str) -> Option<Arc<SpanData>> {
        self.spans
            .lock()
            .unwrap()
            .values()
            .find(|s| s.name == name)
            .cloned()
    }
}

struct MapVisitor<'a> {
    map: &'a mut HashMap<String, String>,
}

impl<'a> Visit for MapVisitor<'a> {
    fn record_debug(&mut self, field: &Field, value: &dyn core::fmt::Debug) {
        self.map.insert(field.name().to_string(), format!("{value:?}"));
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_bool(&mut self, field: &Field, value: bool) {
        self.map.insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &Field, value: &str) {
        self.map.insert(field.name().to_string(), format!("\"{}\"", value));
    }
    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.map.insert(field.name().to_string(), format!("{value}"));
    }
}

#[derive(Clone)]
pub struct CaptureLayer {
    pub store: Arc<CaptureStore>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, _ctx: Context<'_, S>) {
        let name = attrs.metadata().name().to_string();
        let data = Arc::new(SpanData { name, ..Default::default() });
        {
            let mut map = data.fields.lock().unwrap();
            attrs.record(&mut MapVisitor { map: &mut map });
        }
        self.store.spans.lock().unwrap().insert(id.clone(), data);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, _ctx: Context<'_, S>) {
        if let Some(data) = self.store.spans.lock().unwrap().get(id) {
            let mut map = data.fields.lock().unwrap();
            values.record(&mut MapVisitor { map: &mut map });
        }
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut MapVisitor { map: &mut fields });
        let message = fields.remove("message").unwrap_or_default();
        self.store.events.lock().unwrap().push(EventData {
            level: *event.metadata().level(),
            message,
            fields,
        });
    }
}

static GUARDS: once_cell::sync::Lazy<Mutex<Vec<tracing::subscriber::DefaultGuard>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Vec::new()));

/// Capture spans and events emitted on the current thread for the rest of the test.
pub fn install_capture() -> Arc<CaptureStore> {
    use tracing_subscriber::prelude::*;
    let store = Arc::new(CaptureStore::default());
    let layer = CaptureLayer { store: store.clone() };
    let subscriber = registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    GUARDS.lock().unwrap().push(guard);
    store
}
