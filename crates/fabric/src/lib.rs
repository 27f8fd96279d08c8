//! The signal/slot messaging fabric: broker-attached publish/subscribe and
//! targeted calls between instances.
//!
//! Every participant owns named outbound signals and named inbound slots.
//! Emitting a signal publishes an envelope to the broker without knowing
//! the subscribers; calling a slot routes an envelope to one instance and
//! awaits a typed reply by correlation id, with timeout and cancellation.
//! Heartbeats and lifecycle signals keep an eventually-consistent topology
//! of alive instances.

use std::time::Duration;

pub mod broker;
mod envelope;
mod instance;
mod topology;

pub use broker::{
    connect, key_matches, Broker, BrokerConfig, Delivery, DeliveryStream, Exchange, MemoryBroker,
    TcpBroker,
};
pub use envelope::{
    arg_key, format_instance_ids, format_slot_functions, header, parse_instance_ids,
    parse_slot_functions, Message,
};
pub use instance::{Instance, InstanceConfig, BROADCAST_ID, DEFAULT_HEARTBEAT_INTERVAL};
pub use topology::{
    Topology, DEFAULT_MISS_THRESHOLD, SIGNAL_HEARTBEAT, SIGNAL_INSTANCE_GONE, SIGNAL_INSTANCE_NEW,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("invalid broker configuration: {0}")]
    Config(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("broker disconnected")]
    BrokerDisconnected,

    #[error("cancelled")]
    Cancelled,

    /// A packaged failure of the remote slot handler.
    #[error("remote slot failed: {0}")]
    Remote(String),

    #[error("{0}")]
    Logic(String),

    #[error(transparent)]
    Tree(#[from] tree::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
