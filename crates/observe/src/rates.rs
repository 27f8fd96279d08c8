//! Traffic accounting for the broker rate monitor: every message is
//! credited once to its sender and once to each addressed receiver.

use std::collections::HashMap;
use std::fmt::Write as _;

use fabric::Message;

/// Receiver credited when a header names no receivers at all. Some brokers
/// legitimately omit receiver routing from the visible header; those
/// messages still count.
pub const UNROUTED_RECEIVER: &str = "__none__";

/// Synthetic sender of `target=log` messages.
pub const LOG_SENDER: &str = "?";

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    count: u64,
    bytes: u64,
}

impl Counters {
    fn add(&mut self, bytes: u64) {
        self.count += 1;
        self.bytes += bytes;
    }
}

/// Classify one message into its sender key and receiver keys.
pub fn classify(message: &Message) -> (String, Vec<String>) {
    // Log traffic bypasses slot routing entirely; both sides are credited
    // to the synthetic log key.
    if message.is_log() {
        let key = format!("{LOG_SENDER}:log");
        return (key.clone(), vec![key]);
    }

    let sender = {
        let instance = message.sender().unwrap_or(LOG_SENDER);
        let function = message
            .header
            .get::<String>(fabric::header::SIGNAL_FUNCTION)
            .map(String::as_str)
            .unwrap_or("?");
        format!("{instance}:{function}")
    };

    let slot_functions = message.slot_functions();
    let receivers = if !slot_functions.is_empty() {
        slot_functions
            .into_iter()
            .map(|(instance, slot)| format!("{instance}:{slot}"))
            .collect()
    } else {
        let ids = message.slot_instance_ids();
        if !ids.is_empty() {
            ids
        } else {
            vec![UNROUTED_RECEIVER.to_string()]
        }
    };

    (sender, receivers)
}

/// Interval accounting: record everything seen, render a report, reset.
#[derive(Default)]
pub struct RateAccounting {
    senders: HashMap<String, Counters>,
    receivers: HashMap<String, Counters>,
}

impl RateAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: &Message) {
        let bytes = message.wire_size() as u64;
        let (sender, receivers) = classify(message);
        self.senders.entry(sender).or_default().add(bytes);
        for receiver in receivers {
            self.receivers.entry(receiver).or_default().add(bytes);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Render the interval report and reset the counters. Rows show the
    /// message rate and the average message size in kB.
    pub fn report(&mut self, elapsed_seconds: f64) -> String {
        let mut out = String::new();
        render_section(&mut out, "senders", &self.senders, elapsed_seconds);
        render_section(&mut out, "receivers", &self.receivers, elapsed_seconds);
        self.senders.clear();
        self.receivers.clear();
        out
    }
}

fn render_section(
    out: &mut String,
    title: &str,
    counters: &HashMap<String, Counters>,
    elapsed_seconds: f64,
) {
    let elapsed = elapsed_seconds.max(f64::EPSILON);
    let mut rows: Vec<(&str, Counters)> = counters
        .iter()
        .map(|(name, c)| (name.as_str(), *c))
        .collect();
    rows.sort_by(|a, b| a.0.cmp(b.0));

    let _ = writeln!(out, "{title} (rate 1/s, avg kB):");
    let mut total = Counters::default();
    let mut top: Option<(&str, f64)> = None;
    for (name, c) in &rows {
        let rate = c.count as f64 / elapsed;
        let avg_kb = c.bytes as f64 / c.count as f64 / 1000.0;
        let _ = writeln!(out, "  {name:<48} {rate:>10.2} {avg_kb:>10.3}");
        total.count += c.count;
        total.bytes += c.bytes;
        if top.map(|(_, best)| rate > best).unwrap_or(true) {
            top = Some((name, rate));
        }
    }
    if let Some((name, rate)) = top {
        let _ = writeln!(out, "  highest: {name} at {rate:.2} 1/s");
    }
    if total.count > 0 {
        let _ = writeln!(
            out,
            "  total: {:.2} 1/s, {:.3} kB avg",
            total.count as f64 / elapsed,
            total.bytes as f64 / total.count as f64 / 1000.0
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fabric::{format_instance_ids, format_slot_functions, header};
    use tree::{tree, Tree};

    fn signal_message() -> Message {
        Message::new(
            tree! {
                header::SIGNAL_INSTANCE_ID => "motor/1",
                header::SIGNAL_FUNCTION => "signalChanged",
                header::SLOT_FUNCTIONS =>
                    format_slot_functions([("logger/1", "slotChanged"), ("gui/0", "slotChanged")]),
            },
            tree! { "a1" => 1i32 },
        )
    }

    #[test]
    fn classification_rules() {
        let (sender, receivers) = classify(&signal_message());
        assert_eq!(sender, "motor/1:signalChanged");
        assert_eq!(receivers, vec!["logger/1:slotChanged", "gui/0:slotChanged"]);

        // Replies credit the instance list.
        let reply = Message::new(
            tree! {
                header::SIGNAL_INSTANCE_ID => "motor/1",
                header::SLOT_INSTANCE_IDS => format_instance_ids(["client/1"]),
            },
            Tree::new(),
        );
        let (_, receivers) = classify(&reply);
        assert_eq!(receivers, vec!["client/1"]);

        // Log traffic gets the synthetic key on both sides.
        let log = Message::new(
            tree! { header::TARGET => header::TARGET_LOG },
            Tree::new(),
        );
        let (sender, receivers) = classify(&log);
        assert_eq!(sender, "?:log");
        assert_eq!(receivers, vec!["?:log".to_string()]);

        // A non-log message naming no receivers at all falls back to the
        // unrouted bucket.
        let unrouted = Message::new(
            tree! { header::SIGNAL_INSTANCE_ID => "motor/1" },
            Tree::new(),
        );
        let (_, receivers) = classify(&unrouted);
        assert_eq!(receivers, vec![UNROUTED_RECEIVER]);
    }

    #[test]
    fn report_accumulates_and_resets() {
        let mut accounting = RateAccounting::new();
        for _ in 0..10 {
            accounting.record(&signal_message());
        }
        let report = accounting.report(2.0);
        assert!(report.contains("motor/1:signalChanged"));
        assert!(report.contains("5.00"), "10 messages over 2 s:\n{report}");
        assert!(report.contains("logger/1:slotChanged"));
        assert!(report.contains("highest:"));
        assert!(accounting.is_empty());
    }
}
