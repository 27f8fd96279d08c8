//! Process-global bounded cache of structured log records, fed from the
//! `tracing` pipeline so remote callers can fetch recent logs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use tree::Tree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub severity: String,
    pub category: String,
    pub message: String,
}

impl LogRecord {
    /// The record as carried over the bus.
    pub fn to_tree(&self) -> Tree {
        let mut t = Tree::new();
        t.insert("timestamp", self.timestamp.as_str());
        t.insert("type", self.severity.as_str());
        t.insert("category", self.category.as_str());
        t.insert("message", self.message.as_str());
        t
    }
}

struct CacheState {
    capacity: usize,
    records: VecDeque<LogRecord>,
}

/// A ring of recent records behind one mutex. The capacity only grows: if
/// one registrant wants a larger cache, everyone gets the larger cache.
pub struct LogCache {
    state: Mutex<CacheState>,
}

pub const DEFAULT_CAPACITY: usize = 100;

lazy_static::lazy_static! {
    static ref INSTANCE: LogCache = LogCache {
        state: Mutex::new(CacheState {
            capacity: DEFAULT_CAPACITY,
            records: VecDeque::new(),
        }),
    };
}

impl LogCache {
    /// The process-global cache, constructed on first use.
    pub fn instance() -> &'static LogCache {
        &INSTANCE
    }

    /// Raise the capacity to at least `capacity`. Never shrinks.
    pub fn register(&self, capacity: usize) {
        let mut state = self.state.lock().expect("log cache poisoned");
        if capacity > state.capacity {
            state.capacity = capacity;
        }
    }

    pub fn append(&self, record: LogRecord) {
        let mut state = self.state.lock().expect("log cache poisoned");
        if state.records.len() == state.capacity {
            state.records.pop_front();
        }
        state.records.push_back(record);
    }

    /// Up to the last `n` records, oldest first.
    pub fn cached(&self, n: usize) -> Vec<LogRecord> {
        let state = self.state.lock().expect("log cache poisoned");
        let skip = state.records.len().saturating_sub(n);
        state.records.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.state.lock().expect("log cache poisoned").records.clear();
    }
}

/// A `tracing` layer appending every event to the global cache. The
/// category is the `category` field when present, the event target
/// otherwise.
pub struct CacheLayer;

struct EventVisitor {
    message: String,
    category: Option<String>,
}

impl tracing::field::Visit for EventVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "category" => self.category = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for CacheLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = EventVisitor {
            message: String::new(),
            category: None,
        };
        event.record(&mut visitor);

        LogCache::instance().append(LogRecord {
            timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
            severity: event.metadata().level().to_string(),
            category: visitor
                .category
                .unwrap_or_else(|| event.metadata().target().to_string()),
            message: visitor.message,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(i: usize) -> LogRecord {
        LogRecord {
            timestamp: format!("t{i}"),
            severity: "INFO".into(),
            category: "device/1".into(),
            message: format!("message {i}"),
        }
    }

    #[test]
    fn capacity_only_grows_and_drops_oldest() {
        // A private cache for the test; the global one is shared state.
        let cache = LogCache {
            state: Mutex::new(CacheState {
                capacity: 3,
                records: VecDeque::new(),
            }),
        };
        cache.register(2);
        for i in 0..5 {
            cache.append(record(i));
        }
        let got = cache.cached(10);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].message, "message 2");
        assert_eq!(got[2].message, "message 4");

        // The last-n view returns the newest suffix.
        let got = cache.cached(2);
        assert_eq!(got[0].message, "message 3");
        assert_eq!(got[1].message, "message 4");

        cache.register(5);
        for i in 5..9 {
            cache.append(record(i));
        }
        assert_eq!(cache.cached(100).len(), 5);
    }

    #[test]
    fn records_carry_the_bus_shape() {
        let t = record(1).to_tree();
        let keys: Vec<&str> = t.keys().collect();
        assert_eq!(keys, vec!["timestamp", "type", "category", "message"]);
    }
}
