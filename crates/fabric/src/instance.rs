//! Participating instances: owners of signals and slots, wired to the
//! shared broker connection.
//!
//! Slot dispatch is serialized per instance: handlers run one after the
//! other on a dedicated task, so user code needs no fine-grained locking.
//! A slot handler must not block on another slot of the same instance;
//! doing so deadlocks the serial executor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tree::{Tree, Value, Variant};

use crate::broker::{Broker, Exchange};
use crate::envelope::{self, arg_key, header, Message};
use crate::topology::{SIGNAL_HEARTBEAT, SIGNAL_INSTANCE_GONE, SIGNAL_INSTANCE_NEW};
use crate::{Error, Result};

/// Header key flagging a packaged slot failure in a reply.
pub(crate) const HEADER_ERROR: &str = "error";

/// Receiver id addressing every instance on the global-slots exchange.
pub const BROADCAST_ID: &str = "*";

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

type SlotHandler = Arc<dyn Fn(&Tree) -> Result<Tree> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub instance_id: String,
    pub heartbeat_interval: Duration,
    /// Extra facts published with heartbeats and lifecycle events, e.g.
    /// the hosting server id.
    pub info: Tree,
}

impl InstanceConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        InstanceConfig {
            instance_id: instance_id.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            info: Tree::new(),
        }
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn info(mut self, info: Tree) -> Self {
        self.info = info;
        self
    }
}

struct Inner {
    id: String,
    broker: Arc<dyn Broker>,
    signals: Mutex<HashSet<String>>,
    slots: Mutex<HashMap<String, SlotHandler>>,
    global_slots: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Result<Tree>>>>,
    dispatch_tx: mpsc::UnboundedSender<(String, Message)>,
    correlation_counter: AtomicU64,
}

/// One addressable participant on the bus.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<Inner>,
    tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Instance {
    /// Attach to the broker: subscribes the instance's queues, starts the
    /// serial dispatcher and the heartbeat, and announces the instance.
    pub async fn start(config: InstanceConfig, broker: Arc<dyn Broker>) -> Result<Instance> {
        if config.instance_id.is_empty() {
            return Err(Error::Logic("an instance id must be non-empty".into()));
        }

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            id: config.instance_id.clone(),
            broker: broker.clone(),
            signals: Mutex::new(HashSet::new()),
            slots: Mutex::new(HashMap::new()),
            global_slots: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            dispatch_tx,
            correlation_counter: AtomicU64::new(0),
        });

        let mut tasks = Vec::new();

        // Inbound: the instance's own queue plus the broadcast exchange.
        let own = broker
            .subscribe(Exchange::Slots, &format!("{}.#", config.instance_id))
            .await?;
        let broadcast = broker.subscribe(Exchange::GlobalSlots, "#").await?;
        for mut stream in [own, broadcast] {
            let inner = inner.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(delivery) = stream.next().await {
                    inner.route_inbound(delivery.message);
                }
            }));
        }

        // Serial slot dispatcher.
        {
            let inner = inner.clone();
            tasks.push(tokio::spawn(dispatch_loop(inner, dispatch_rx)));
        }

        // Heartbeat and lifecycle announcements.
        let instance = Instance {
            inner: inner.clone(),
            tasks: Arc::new(Mutex::new(tasks)),
        };
        instance
            .publish_lifecycle(SIGNAL_INSTANCE_NEW, &config)
            .await?;
        {
            let inner = inner.clone();
            let config = config.clone();
            let beat_task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.heartbeat_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let mut body = Tree::new();
                    let _ = body.set("instanceId", inner.id.as_str());
                    let _ = body.set(
                        "heartbeatInterval",
                        config.heartbeat_interval.as_secs_f64(),
                    );
                    let _ = body.set("info", config.info.clone());
                    let message = Message::new(inner.signal_header(SIGNAL_HEARTBEAT), body);
                    let key = format!("{}.{}", inner.id, SIGNAL_HEARTBEAT);
                    let _ = inner.broker.publish(Exchange::Signals, &key, message).await;
                }
            });
            instance.tasks.lock().expect("instance tasks poisoned").push(beat_task);
        }

        Ok(instance)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Declare an outbound signal. Emitting an undeclared signal is an
    /// error, to catch typos at the call site.
    pub fn register_signal(&self, name: &str) {
        self.inner
            .signals
            .lock()
            .expect("signals poisoned")
            .insert(name.to_string());
    }

    /// Install a raw slot handler: body tree in, reply tree out.
    pub fn register_slot<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Tree) -> Result<Tree> + Send + Sync + 'static,
    {
        self.inner
            .slots
            .lock()
            .expect("slots poisoned")
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Install a broadcast slot: reachable through the global-slots
    /// exchange under the `*` receiver id as well as directly.
    pub fn register_global_slot<F>(&self, name: &str, handler: F)
    where
        F: Fn(&Tree) -> Result<Tree> + Send + Sync + 'static,
    {
        self.register_slot(name, handler);
        self.inner
            .global_slots
            .lock()
            .expect("global slots poisoned")
            .insert(name.to_string());
    }

    /// Typed sugar: a nullary slot returning one value.
    pub fn register_slot0<R, F>(&self, name: &str, handler: F)
    where
        R: Into<Value>,
        F: Fn() -> Result<R> + Send + Sync + 'static,
    {
        self.register_slot(name, move |_| {
            let reply = handler()?;
            let mut body = Tree::new();
            body.set(&arg_key(0), reply)?;
            Ok(body)
        });
    }

    /// Typed sugar: one argument, one reply value. The argument is taken
    /// from body key `a1` with conversion.
    pub fn register_slot1<A1, R, F>(&self, name: &str, handler: F)
    where
        A1: Variant,
        R: Into<Value>,
        F: Fn(A1) -> Result<R> + Send + Sync + 'static,
    {
        self.register_slot(name, move |body| {
            let a1 = body.get_as::<A1>(&arg_key(0))?;
            let reply = handler(a1)?;
            let mut out = Tree::new();
            out.set(&arg_key(0), reply)?;
            Ok(out)
        });
    }

    pub fn register_slot2<A1, A2, R, F>(&self, name: &str, handler: F)
    where
        A1: Variant,
        A2: Variant,
        R: Into<Value>,
        F: Fn(A1, A2) -> Result<R> + Send + Sync + 'static,
    {
        self.register_slot(name, move |body| {
            let a1 = body.get_as::<A1>(&arg_key(0))?;
            let a2 = body.get_as::<A2>(&arg_key(1))?;
            let reply = handler(a1, a2)?;
            let mut out = Tree::new();
            out.set(&arg_key(0), reply)?;
            Ok(out)
        });
    }

    /// Emit a declared signal. Subscribers receive it without the sender
    /// knowing them; per-task emission order is preserved end to end.
    pub async fn emit(&self, signal: &str, body: Tree) -> Result<()> {
        if !self
            .inner
            .signals
            .lock()
            .expect("signals poisoned")
            .contains(signal)
        {
            return Err(Error::Logic(format!(
                "signal '{signal}' is not registered on '{}'",
                self.inner.id
            )));
        }
        let message = Message::new(self.inner.signal_header(signal), body);
        let key = format!("{}.{signal}", self.inner.id);
        self.inner.broker.publish(Exchange::Signals, &key, message).await
    }

    /// Call a slot and await its typed reply body.
    ///
    /// Expiry yields `Timeout` without affecting the callee. Dropping the
    /// returned future cancels the wait; the eventual reply is discarded.
    pub async fn call(
        &self,
        target: &str,
        slot: &str,
        args: Tree,
        timeout: Duration,
    ) -> Result<Tree> {
        let correlation = self.inner.next_correlation();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending poisoned")
            .insert(correlation.clone(), tx);
        let _guard = PendingGuard {
            inner: self.inner.clone(),
            correlation: correlation.clone(),
        };

        let mut msg_header = self.inner.signal_header(slot);
        msg_header.set(
            header::SLOT_FUNCTIONS,
            envelope::format_slot_functions([(target, slot)]),
        )?;
        msg_header.set(header::REPLY_TO, correlation.as_str())?;
        let message = Message::new(msg_header, args);
        let key = format!("{target}.{slot}");
        self.inner.broker.publish(Exchange::Slots, &key, message).await?;

        let mut connection = self.inner.broker.connection();
        let disconnected = async {
            loop {
                if !*connection.borrow() {
                    return;
                }
                if connection.changed().await.is_err() {
                    return;
                }
            }
        };
        tokio::select! {
            outcome = tokio::time::timeout(timeout, rx) => match outcome {
                Ok(Ok(reply)) => reply,
                // The sender vanished; treat like a lost connection.
                Ok(Err(_)) => Err(Error::BrokerDisconnected),
                Err(_) => Err(Error::Timeout(timeout)),
            },
            _ = disconnected => Err(Error::BrokerDisconnected),
        }
    }

    /// Fire-and-forget slot call: no reply is requested.
    pub async fn notify(&self, target: &str, slot: &str, args: Tree) -> Result<()> {
        let mut msg_header = self.inner.signal_header(slot);
        msg_header.set(
            header::SLOT_FUNCTIONS,
            envelope::format_slot_functions([(target, slot)]),
        )?;
        let message = Message::new(msg_header, args);
        let key = format!("{target}.{slot}");
        self.inner.broker.publish(Exchange::Slots, &key, message).await
    }

    /// Invoke a broadcast slot on every instance that registered it.
    /// Failures are per-receiver and do not come back.
    pub async fn broadcast(&self, slot: &str, args: Tree) -> Result<()> {
        let mut msg_header = self.inner.signal_header(slot);
        msg_header.set(
            header::SLOT_FUNCTIONS,
            envelope::format_slot_functions([(BROADCAST_ID, slot)]),
        )?;
        let message = Message::new(msg_header, args);
        self.inner
            .broker
            .publish(Exchange::GlobalSlots, slot, message)
            .await
    }

    /// Abort the background tasks without announcing departure: the
    /// instance goes silent as if its process had died. Peers notice
    /// through missed heartbeats.
    pub fn stop_tasks(&self) {
        for task in self.tasks.lock().expect("instance tasks poisoned").drain(..) {
            task.abort();
        }
    }

    /// Announce departure and stop the instance's background tasks.
    pub async fn shutdown(self) -> Result<()> {
        let mut body = Tree::new();
        body.set("instanceId", self.inner.id.as_str())?;
        let message = Message::new(self.inner.signal_header(SIGNAL_INSTANCE_GONE), body);
        let key = format!("{}.{SIGNAL_INSTANCE_GONE}", self.inner.id);
        self.inner
            .broker
            .publish(Exchange::Signals, &key, message)
            .await?;
        for task in self.tasks.lock().expect("instance tasks poisoned").drain(..) {
            task.abort();
        }
        Ok(())
    }

    async fn publish_lifecycle(&self, signal: &str, config: &InstanceConfig) -> Result<()> {
        let mut body = Tree::new();
        body.set("instanceId", self.inner.id.as_str())?;
        body.set(
            "heartbeatInterval",
            config.heartbeat_interval.as_secs_f64(),
        )?;
        body.set("info", config.info.clone())?;
        let message = Message::new(self.inner.signal_header(signal), body);
        let key = format!("{}.{signal}", self.inner.id);
        self.inner.broker.publish(Exchange::Signals, &key, message).await
    }
}

/// Removes the pending entry when the awaiting future goes away, however
/// it goes away. A reply arriving later finds no entry and is discarded.
struct PendingGuard {
    inner: Arc<Inner>,
    correlation: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner
            .pending
            .lock()
            .expect("pending poisoned")
            .remove(&self.correlation);
    }
}

impl Inner {
    fn signal_header(&self, function: &str) -> Tree {
        let mut h = Tree::new();
        let _ = h.set(header::SIGNAL_INSTANCE_ID, self.id.as_str());
        let _ = h.set(header::SIGNAL_FUNCTION, function);
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let _ = h.set(header::TS, elapsed.as_secs());
        let _ = h.set(
            header::TS_FRAC,
            u64::from(elapsed.subsec_nanos()) * 1_000_000_000,
        );
        h
    }

    fn next_correlation(&self) -> String {
        let count = self.correlation_counter.fetch_add(1, Ordering::Relaxed);
        let noise: u64 = rand::thread_rng().gen();
        format!("{}-{count}-{noise:016x}", self.id)
    }

    /// Classify one inbound message and hand it to the right place. Runs on
    /// the broker reader task, so it must not block.
    fn route_inbound(&self, message: Message) {
        // Replies carry a correlation id and name sender instances rather
        // than slot functions.
        if message.header.has(header::SLOT_INSTANCE_IDS) {
            if let Some(correlation) = message.reply_to() {
                let waiter = self
                    .pending
                    .lock()
                    .expect("pending poisoned")
                    .remove(correlation);
                if let Some(waiter) = waiter {
                    let outcome = if message
                        .header
                        .get::<bool>(HEADER_ERROR)
                        .copied()
                        .unwrap_or(false)
                    {
                        let detail = message
                            .body
                            .get_as::<String>(&arg_key(0))
                            .unwrap_or_else(|_| "remote slot failed".to_string());
                        Err(Error::Remote(detail))
                    } else {
                        Ok(message.body)
                    };
                    let _ = waiter.send(outcome);
                }
                // An unknown correlation id is yesterday's timeout: dropped
                // without a trace.
            }
            return;
        }

        for (instance, slot) in message.slot_functions() {
            let for_me = instance == self.id
                || (instance == BROADCAST_ID
                    && self
                        .global_slots
                        .lock()
                        .expect("global slots poisoned")
                        .contains(&slot));
            if !for_me {
                continue;
            }
            let _ = self.dispatch_tx.send((slot, message.clone()));
        }
    }

    async fn reply_to_caller(&self, request: &Message, outcome: Result<Tree>) {
        let Some(correlation) = request.reply_to() else {
            if let Err(err) = &outcome {
                tracing::warn!(instance = %self.id, %err, "slot failed with nobody waiting");
            }
            return;
        };
        let Some(caller) = request.sender() else {
            return;
        };

        let mut reply_header = Tree::new();
        let _ = reply_header.set(header::SIGNAL_INSTANCE_ID, self.id.as_str());
        let _ = reply_header.set(
            header::SLOT_INSTANCE_IDS,
            envelope::format_instance_ids([caller]),
        );
        let _ = reply_header.set(header::REPLY_TO, correlation);
        let body = match outcome {
            Ok(body) => body,
            Err(err) => {
                let _ = reply_header.set(HEADER_ERROR, true);
                let mut body = Tree::new();
                let _ = body.set(&arg_key(0), err.to_string());
                body
            }
        };
        let message = Message::new(reply_header, body);
        let _ = self
            .broker
            .publish(Exchange::Slots, caller, message)
            .await;
    }
}

/// The per-instance serial executor: slots run strictly one at a time, and
/// a handler failure is packaged for the awaiter instead of reaching the
/// broker task.
async fn dispatch_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<(String, Message)>) {
    while let Some((slot, message)) = rx.recv().await {
        let handler = inner
            .slots
            .lock()
            .expect("slots poisoned")
            .get(&slot)
            .cloned();
        let outcome = match handler {
            Some(handler) => handler(&message.body),
            None => Err(Error::Logic(format!(
                "no slot '{slot}' on instance '{}'",
                inner.id
            ))),
        };
        inner.reply_to_caller(&message, outcome).await;
    }
}
