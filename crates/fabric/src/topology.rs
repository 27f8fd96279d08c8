//! The eventually-consistent map of alive instances, maintained from
//! heartbeats and lifecycle signals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tree::Tree;

use crate::broker::{Broker, Exchange};
use crate::envelope::header;
use crate::Result;

pub const SIGNAL_HEARTBEAT: &str = "signalHeartbeat";
pub const SIGNAL_INSTANCE_NEW: &str = "signalInstanceNew";
pub const SIGNAL_INSTANCE_GONE: &str = "signalInstanceGone";

/// Beats an instance may miss before it is considered gone.
pub const DEFAULT_MISS_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
struct Entry {
    last_seen: Instant,
    interval: Duration,
    info: Tree,
    alive: bool,
}

struct Inner {
    instances: Mutex<HashMap<String, Entry>>,
    miss_threshold: u32,
}

/// Tracks which instances are alive. No ordering is guaranteed between
/// topology events and application signals; the view converges, it is
/// never exact.
#[derive(Clone)]
pub struct Topology {
    inner: Arc<Inner>,
    tasks: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl Topology {
    pub async fn track(broker: Arc<dyn Broker>) -> Result<Topology> {
        Self::track_with_threshold(broker, DEFAULT_MISS_THRESHOLD).await
    }

    pub async fn track_with_threshold(
        broker: Arc<dyn Broker>,
        miss_threshold: u32,
    ) -> Result<Topology> {
        let inner = Arc::new(Inner {
            instances: Mutex::new(HashMap::new()),
            miss_threshold,
        });

        let mut stream = broker.subscribe(Exchange::Signals, "#").await?;
        let listener = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(delivery) = stream.next().await {
                    let function = delivery
                        .message
                        .header
                        .get::<String>(header::SIGNAL_FUNCTION)
                        .cloned()
                        .unwrap_or_default();
                    let Ok(instance_id) =
                        delivery.message.body.get_as::<String>("instanceId")
                    else {
                        continue;
                    };
                    match function.as_str() {
                        SIGNAL_HEARTBEAT | SIGNAL_INSTANCE_NEW => {
                            let interval = delivery
                                .message
                                .body
                                .get_as::<f64>("heartbeatInterval")
                                .unwrap_or(3.0);
                            let info = delivery
                                .message
                                .body
                                .get::<Tree>("info")
                                .cloned()
                                .unwrap_or_default();
                            let mut instances =
                                inner.instances.lock().expect("topology poisoned");
                            instances.insert(
                                instance_id,
                                Entry {
                                    last_seen: Instant::now(),
                                    interval: Duration::from_secs_f64(interval.max(0.001)),
                                    info,
                                    alive: true,
                                },
                            );
                        }
                        SIGNAL_INSTANCE_GONE => {
                            inner
                                .instances
                                .lock()
                                .expect("topology poisoned")
                                .remove(&instance_id);
                        }
                        _ => {}
                    }
                }
            })
        };

        // Sweep for silent instances on a coarse tick.
        let sweeper = {
            let inner = inner.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(500));
                loop {
                    ticker.tick().await;
                    let now = Instant::now();
                    let mut instances = inner.instances.lock().expect("topology poisoned");
                    for entry in instances.values_mut() {
                        let silence = now.saturating_duration_since(entry.last_seen);
                        if silence > entry.interval * inner.miss_threshold {
                            entry.alive = false;
                        }
                    }
                }
            })
        };

        Ok(Topology {
            inner,
            tasks: Arc::new(Mutex::new(vec![listener, sweeper])),
        })
    }

    /// Ids currently considered alive, sorted for stable output.
    pub fn alive(&self) -> Vec<String> {
        let instances = self.inner.instances.lock().expect("topology poisoned");
        let mut ids: Vec<String> = instances
            .iter()
            .filter(|(_, e)| e.alive)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_alive(&self, instance_id: &str) -> bool {
        self.inner
            .instances
            .lock()
            .expect("topology poisoned")
            .get(instance_id)
            .map(|e| e.alive)
            .unwrap_or(false)
    }

    /// The info tree an instance last published with its heartbeat.
    pub fn info(&self, instance_id: &str) -> Option<Tree> {
        self.inner
            .instances
            .lock()
            .expect("topology poisoned")
            .get(instance_id)
            .map(|e| e.info.clone())
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().expect("topology tasks poisoned").drain(..) {
            task.abort();
        }
    }
}
