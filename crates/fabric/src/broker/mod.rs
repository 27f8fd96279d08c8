//! Broker abstraction: topic-style exchanges with pattern subscriptions.
//!
//! Two transports are provided: an in-process hub for tests and
//! single-process deployments, and a minimal TCP topic broker for
//! inter-process traffic. Both speak the same `(header, body)` envelope.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;

use crate::envelope::Message;
use crate::{Error, Result};

pub mod mem;
pub mod tcp;

pub use mem::MemoryBroker;
pub use tcp::{serve, TcpBroker};

/// The three exchanges of the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exchange {
    /// Fan-out of emitted signals.
    Signals,
    /// Direct slot calls and their replies.
    Slots,
    /// Broadcast slots addressed to every instance.
    GlobalSlots,
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [Exchange::Signals, Exchange::Slots, Exchange::GlobalSlots];

    /// The exchange's topic name within a broker domain.
    pub fn topic(&self, domain: &str) -> String {
        match self {
            Exchange::Signals => format!("{domain}.Signals"),
            Exchange::Slots => format!("{domain}.Slots"),
            Exchange::GlobalSlots => format!("{domain}.Global_Slots"),
        }
    }

    pub(crate) fn wire_tag(&self) -> u8 {
        match self {
            Exchange::Signals => 0,
            Exchange::Slots => 1,
            Exchange::GlobalSlots => 2,
        }
    }

    pub(crate) fn from_wire_tag(tag: u8) -> Option<Exchange> {
        match tag {
            0 => Some(Exchange::Signals),
            1 => Some(Exchange::Slots),
            2 => Some(Exchange::GlobalSlots),
            _ => None,
        }
    }
}

/// Match a binding pattern against a routing key. Keys are dot-separated
/// words; `#` matches any number of words, including none.
pub fn key_matches(pattern: &str, key: &str) -> bool {
    fn words(s: &str) -> Vec<&str> {
        s.split('.').collect()
    }

    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                // '#' swallows zero or more words.
                matches(&pattern[1..], key)
                    || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&p), Some(&k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    matches(&words(pattern), &words(key))
}

/// One delivered message together with its routing key.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub exchange: Exchange,
    pub routing_key: String,
    pub message: Message,
}

pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// A broker connection shared by all instances of a process.
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Publish one message. Send-side failures are retried with bounded
    /// backoff inside the transport; a message beyond the retry budget is
    /// dropped with a structured log entry, not an error.
    async fn publish(&self, exchange: Exchange, routing_key: &str, message: Message)
        -> Result<()>;

    /// Subscribe with a binding pattern. The stream ends when the broker
    /// connection is gone for good.
    async fn subscribe(&self, exchange: Exchange, binding_key: &str) -> Result<DeliveryStream>;

    /// Detach cleanly.
    async fn disconnect(&self) -> Result<()>;

    /// Connection liveness. In-flight reply awaiters watch this to fail
    /// with `BrokerDisconnected` instead of waiting out their timeout.
    fn connection(&self) -> tokio::sync::watch::Receiver<bool>;

    /// The broker domain (topic namespace) this connection works in.
    fn domain(&self) -> &str;
}

/// Broker location, resolved from the environment.
///
/// `KARABO_BROKER` holds comma-separated URLs tried in order;
/// `KARABO_BROKER_TOPIC` the domain. Absent, they fall back to
/// `tcp://localhost:7777` and `$USER` (then `"lattice"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub urls: Vec<url::Url>,
    pub domain: String,
}

pub const BROKER_ENV: &str = "KARABO_BROKER";
pub const DOMAIN_ENV: &str = "KARABO_BROKER_TOPIC";
pub const DEFAULT_BROKER_URL: &str = "tcp://localhost:7777";

impl BrokerConfig {
    pub fn from_env() -> Result<Self> {
        let raw = std::env::var(BROKER_ENV).unwrap_or_else(|_| DEFAULT_BROKER_URL.to_string());
        let urls = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                url::Url::parse(s)
                    .map_err(|err| Error::Config(format!("invalid broker URL '{s}': {err}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if urls.is_empty() {
            return Err(Error::Config(format!("{BROKER_ENV} holds no URLs")));
        }
        let domain = std::env::var(DOMAIN_ENV)
            .ok()
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "lattice".to_string());
        Ok(BrokerConfig { urls, domain })
    }
}

/// Connect following the configured URL list: the first reachable broker
/// wins. `mem://` URLs yield the process-local hub, for tests and
/// single-process setups.
pub async fn connect(config: &BrokerConfig) -> Result<Arc<dyn Broker>> {
    let mut last_err = Error::Config("no broker URL to try".into());
    for url in &config.urls {
        match url.scheme() {
            "mem" => return Ok(MemoryBroker::process_hub(&config.domain)),
            "tcp" => match TcpBroker::connect(url, &config.domain).await {
                Ok(broker) => return Ok(Arc::new(broker)),
                Err(err) => {
                    tracing::warn!(%url, %err, "broker not reachable, trying the next URL");
                    last_err = err;
                }
            },
            other => {
                last_err = Error::Config(format!("unsupported broker scheme '{other}'"));
            }
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn topic_names() {
        assert_eq!(Exchange::Signals.topic("SPB"), "SPB.Signals");
        assert_eq!(Exchange::Slots.topic("SPB"), "SPB.Slots");
        assert_eq!(Exchange::GlobalSlots.topic("SPB"), "SPB.Global_Slots");
    }

    #[test]
    fn binding_patterns() {
        assert!(key_matches("#", "anything.at.all"));
        assert!(key_matches("#", "word"));
        assert!(key_matches("motor/1.#", "motor/1.signalChanged"));
        assert!(key_matches("motor/1.#", "motor/1"));
        assert!(!key_matches("motor/1.#", "motor/2.signalChanged"));
        assert!(key_matches("motor/1.signalChanged", "motor/1.signalChanged"));
        assert!(!key_matches("motor/1.signalChanged", "motor/1.other"));
        assert!(key_matches("#.signalChanged", "a.b.signalChanged"));
    }

    #[test]
    fn config_parses_comma_separated_urls() {
        let config = BrokerConfig {
            urls: vec![
                url::Url::parse("tcp://one:7777").unwrap(),
                url::Url::parse("tcp://two:7777").unwrap(),
            ],
            domain: "SPB".into(),
        };
        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.urls[0].host_str(), Some("one"));
    }
}
