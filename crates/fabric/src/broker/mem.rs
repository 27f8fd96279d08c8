//! In-process broker hub. Used by tests and by single-process deployments;
//! semantics match the TCP transport, minus the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{key_matches, Broker, Delivery, DeliveryStream, Exchange};
use crate::envelope::Message;
use crate::Result;

struct Subscription {
    exchange: Exchange,
    pattern: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

pub struct MemoryBroker {
    domain: String,
    subscriptions: Mutex<Vec<Subscription>>,
    connected: tokio::sync::watch::Sender<bool>,
}

impl MemoryBroker {
    pub fn new(domain: &str) -> Arc<Self> {
        let (connected, _) = tokio::sync::watch::channel(true);
        Arc::new(MemoryBroker {
            domain: domain.to_string(),
            subscriptions: Mutex::new(Vec::new()),
            connected,
        })
    }

    /// The shared per-domain hub of this process, for `mem://` URLs.
    pub fn process_hub(domain: &str) -> Arc<dyn Broker> {
        static HUBS: Mutex<Option<HashMap<String, Arc<MemoryBroker>>>> = Mutex::new(None);
        let mut hubs = HUBS.lock().expect("memory broker hubs poisoned");
        let hubs = hubs.get_or_insert_with(HashMap::new);
        hubs.entry(domain.to_string())
            .or_insert_with(|| MemoryBroker::new(domain))
            .clone()
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn publish(
        &self,
        exchange: Exchange,
        routing_key: &str,
        message: Message,
    ) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().expect("subscriptions poisoned");
        // Fan out to matching bindings, dropping closed ones on the way.
        subscriptions.retain(|sub| {
            if sub.exchange != exchange || !key_matches(&sub.pattern, routing_key) {
                return !sub.tx.is_closed();
            }
            sub.tx
                .send(Delivery {
                    exchange,
                    routing_key: routing_key.to_string(),
                    message: message.clone(),
                })
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self, exchange: Exchange, binding_key: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .push(Subscription {
                exchange,
                pattern: binding_key.to_string(),
                tx,
            });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .clear();
        let _ = self.connected.send(false);
        Ok(())
    }

    fn connection(&self) -> tokio::sync::watch::Receiver<bool> {
        self.connected.subscribe()
    }

    fn domain(&self) -> &str {
        &self.domain
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::StreamExt;
    use tree::tree;

    #[tokio::test]
    async fn routes_by_exchange_and_pattern() {
        let broker = MemoryBroker::new("T");
        let mut on_signals = broker.subscribe(Exchange::Signals, "motor/1.#").await.unwrap();
        let mut on_all = broker.subscribe(Exchange::Signals, "#").await.unwrap();
        let mut on_slots = broker.subscribe(Exchange::Slots, "#").await.unwrap();

        let msg = Message::new(tree! { "k" => 1i32 }, tree::Tree::new());
        broker
            .publish(Exchange::Signals, "motor/1.signalChanged", msg.clone())
            .await
            .unwrap();
        broker
            .publish(Exchange::Signals, "motor/2.signalChanged", msg.clone())
            .await
            .unwrap();

        let got = on_signals.next().await.unwrap();
        assert_eq!(got.routing_key, "motor/1.signalChanged");
        assert_eq!(on_all.next().await.unwrap().routing_key, "motor/1.signalChanged");
        assert_eq!(on_all.next().await.unwrap().routing_key, "motor/2.signalChanged");

        // Nothing crossed exchanges.
        broker
            .publish(Exchange::Slots, "motor/1.slotStart", msg)
            .await
            .unwrap();
        assert_eq!(on_slots.next().await.unwrap().routing_key, "motor/1.slotStart");
    }

    #[tokio::test]
    async fn per_publisher_order_is_preserved() {
        let broker = MemoryBroker::new("T");
        let mut sub = broker.subscribe(Exchange::Signals, "#").await.unwrap();
        for i in 0..100i32 {
            let msg = Message::new(tree::Tree::new(), tree! { "i" => i });
            broker.publish(Exchange::Signals, "s.k", msg).await.unwrap();
        }
        for i in 0..100i32 {
            let got = sub.next().await.unwrap();
            assert_eq!(*got.message.body.get::<i32>("i").unwrap(), i);
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_cleaned_up() {
        let broker = MemoryBroker::new("T");
        let sub = broker.subscribe(Exchange::Signals, "#").await.unwrap();
        drop(sub);
        broker
            .publish(
                Exchange::Signals,
                "s.k",
                Message::new(tree::Tree::new(), tree::Tree::new()),
            )
            .await
            .unwrap();
        assert!(broker.subscriptions.lock().unwrap().is_empty());
    }
}
