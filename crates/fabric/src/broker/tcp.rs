//! Minimal topic broker over TCP, for brokers-less deployments and tests
//! across process boundaries.
//!
//! Framing: u32 length prefix, then a verb byte (`S`ubscribe, `P`ublish,
//! `D`elivery), the exchange tag, a u16-prefixed routing/binding key, and
//! for publish/delivery the encoded message. The server fans published
//! messages out to every connection whose binding matches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use super::{key_matches, Broker, Delivery, DeliveryStream, Exchange};
use crate::envelope::Message;
use crate::{Error, Result};

const VERB_SUBSCRIBE: u8 = b'S';
const VERB_PUBLISH: u8 = b'P';
const VERB_DELIVERY: u8 = b'D';

/// Send-side retry budget while the connection is down.
const PUBLISH_RETRIES: u32 = 6;
const PUBLISH_BACKOFF_MIN: Duration = Duration::from_millis(50);
const PUBLISH_BACKOFF_MAX: Duration = Duration::from_secs(2);

const RECONNECT_MIN: Duration = Duration::from_millis(100);
const RECONNECT_MAX: Duration = Duration::from_secs(10);

fn encode_frame(verb: u8, exchange: Exchange, key: &str, message: Option<&Bytes>) -> Bytes {
    let message_len = message.map(Bytes::len).unwrap_or(0);
    let payload_len = 1 + 1 + 2 + key.len() + message_len;
    let mut buf = BytesMut::with_capacity(4 + payload_len);
    buf.put_u32_le(payload_len as u32);
    buf.put_u8(verb);
    buf.put_u8(exchange.wire_tag());
    buf.put_u16_le(key.len() as u16);
    buf.put_slice(key.as_bytes());
    if let Some(message) = message {
        buf.put_slice(message);
    }
    buf.freeze()
}

struct Frame {
    verb: u8,
    exchange: Exchange,
    key: String,
    message: Bytes,
}

fn decode_frame(mut payload: Bytes) -> Result<Frame> {
    if payload.len() < 4 {
        return Err(Error::Frame("frame header incomplete".into()));
    }
    let verb = payload.get_u8();
    let exchange = Exchange::from_wire_tag(payload.get_u8())
        .ok_or_else(|| Error::Frame("unknown exchange tag".into()))?;
    let key_len = payload.get_u16_le() as usize;
    if payload.len() < key_len {
        return Err(Error::Frame("truncated routing key".into()));
    }
    let key = String::from_utf8(payload.split_to(key_len).to_vec())
        .map_err(|_| Error::Frame("routing key is not valid UTF-8".into()))?;
    Ok(Frame {
        verb,
        exchange,
        key,
        message: payload,
    })
}

async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> std::io::Result<Bytes> {
    let len = stream.read_u32_le().await? as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Bytes::from(payload))
}

// ---- server ----

struct ServerClient {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
    bindings: Vec<(Exchange, String)>,
}

#[derive(Default)]
struct ServerState {
    clients: Mutex<Vec<ServerClient>>,
}

/// Run the broker side: accept connections and fan published messages out
/// to matching bindings. Runs until the task is aborted.
pub async fn serve(listener: TcpListener) -> Result<()> {
    let state = Arc::new(ServerState::default());
    let ids = AtomicU64::new(0);
    loop {
        let (stream, peer) = listener.accept().await?;
        let id = ids.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%peer, id, "broker client connected");
        tokio::spawn(serve_client(stream, id, state.clone()));
    }
}

async fn serve_client(stream: TcpStream, id: u64, state: Arc<ServerState>) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    state.clients.lock().expect("broker clients poisoned").push(ServerClient {
        id,
        tx,
        bindings: Vec::new(),
    });

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let payload = match read_frame(&mut reader).await {
            Ok(payload) => payload,
            Err(_) => break,
        };
        let frame = match decode_frame(payload) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(id, %err, "dropping malformed frame");
                continue;
            }
        };
        match frame.verb {
            VERB_SUBSCRIBE => {
                let mut clients = state.clients.lock().expect("broker clients poisoned");
                if let Some(client) = clients.iter_mut().find(|c| c.id == id) {
                    client.bindings.push((frame.exchange, frame.key));
                }
            }
            VERB_PUBLISH => {
                let delivery =
                    encode_frame(VERB_DELIVERY, frame.exchange, &frame.key, Some(&frame.message));
                let mut clients = state.clients.lock().expect("broker clients poisoned");
                clients.retain(|client| {
                    let wants = client.bindings.iter().any(|(exchange, pattern)| {
                        *exchange == frame.exchange && key_matches(pattern, &frame.key)
                    });
                    if !wants {
                        return true;
                    }
                    client.tx.send(delivery.clone()).is_ok()
                });
            }
            other => tracing::warn!(id, verb = other, "unknown frame verb"),
        }
    }

    state
        .clients
        .lock()
        .expect("broker clients poisoned")
        .retain(|c| c.id != id);
    writer_task.abort();
    tracing::debug!(id, "broker client disconnected");
}

// ---- client ----

struct LocalSub {
    exchange: Exchange,
    pattern: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct ClientInner {
    address: String,
    outbound_tx: mpsc::UnboundedSender<Bytes>,
    subs: Mutex<Vec<LocalSub>>,
    connected: watch::Sender<bool>,
    shutdown: CancellationToken,
}

/// Client side of the TCP topic broker. One connection is shared by every
/// instance in the process; a lost connection is re-dialed with capped
/// backoff and subscriptions are replayed.
pub struct TcpBroker {
    domain: String,
    inner: Arc<ClientInner>,
}

impl TcpBroker {
    pub async fn connect(url: &url::Url, domain: &str) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| Error::Config(format!("broker URL '{url}' lacks a host")))?;
        let port = url.port().unwrap_or(7777);
        let address = format!("{host}:{port}");

        // Dial eagerly so a dead address fails the caller, not a log line.
        let stream = TcpStream::connect(&address)
            .await
            .map_err(|err| Error::Network(format!("cannot reach broker at {address}: {err}")))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (connected, _) = watch::channel(true);
        let inner = Arc::new(ClientInner {
            address,
            outbound_tx,
            subs: Mutex::new(Vec::new()),
            connected,
            shutdown: CancellationToken::new(),
        });
        tokio::spawn(run_connection(inner.clone(), stream, outbound_rx));
        Ok(TcpBroker {
            domain: domain.to_string(),
            inner,
        })
    }

}

async fn run_connection(
    inner: Arc<ClientInner>,
    mut stream: TcpStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
) {
    loop {
        let lost = drive_stream(&inner, &mut stream, &mut outbound_rx).await;
        let _ = inner.connected.send(false);
        if !lost || inner.shutdown.is_cancelled() {
            return;
        }
        tracing::warn!(address = %inner.address, "broker connection lost, re-dialing");

        // Re-dial with capped doubling until the broker is back.
        let mut delay = RECONNECT_MIN;
        stream = loop {
            if inner.shutdown.is_cancelled() {
                return;
            }
            match TcpStream::connect(&inner.address).await {
                Ok(fresh) => break fresh,
                Err(_) => {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_MAX);
                }
            }
        };

        // Replay bindings so the new connection sees the same world.
        {
            let subs = inner.subs.lock().expect("local subscriptions poisoned");
            for sub in subs.iter() {
                let frame = encode_frame(VERB_SUBSCRIBE, sub.exchange, &sub.pattern, None);
                let _ = inner.outbound_tx.send(frame);
            }
        }
        let _ = inner.connected.send(true);
        tracing::info!(address = %inner.address, "broker connection restored");
    }
}

/// Pump one live connection. Returns true if the link was lost (and a
/// reconnect should follow), false on shutdown.
async fn drive_stream(
    inner: &Arc<ClientInner>,
    stream: &mut TcpStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<Bytes>,
) -> bool {
    let (mut reader, mut writer) = stream.split();
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return false,
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if writer.write_all(&frame).await.is_err() {
                            return true;
                        }
                    }
                    None => return false,
                }
            }
            inbound = read_frame(&mut reader) => {
                let payload = match inbound {
                    Ok(payload) => payload,
                    Err(_) => return true,
                };
                let frame = match decode_frame(payload) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::warn!(%err, "dropping malformed delivery");
                        continue;
                    }
                };
                if frame.verb != VERB_DELIVERY {
                    continue;
                }
                let message = match Message::decode(&frame.message) {
                    Ok(message) => message,
                    Err(err) => {
                        tracing::warn!(%err, "dropping undecodable message");
                        continue;
                    }
                };
                let mut subs = inner.subs.lock().expect("local subscriptions poisoned");
                subs.retain(|sub| {
                    if sub.exchange != frame.exchange || !key_matches(&sub.pattern, &frame.key) {
                        return !sub.tx.is_closed();
                    }
                    sub.tx
                        .send(Delivery {
                            exchange: frame.exchange,
                            routing_key: frame.key.clone(),
                            message: message.clone(),
                        })
                        .is_ok()
                });
            }
        }
    }
}

#[async_trait::async_trait]
impl Broker for TcpBroker {
    async fn publish(
        &self,
        exchange: Exchange,
        routing_key: &str,
        message: Message,
    ) -> Result<()> {
        let encoded = message.encode()?;
        let frame = encode_frame(VERB_PUBLISH, exchange, routing_key, Some(&encoded));

        let backoff =
            exponential_backoff::Backoff::new(PUBLISH_RETRIES, PUBLISH_BACKOFF_MIN, PUBLISH_BACKOFF_MAX);
        for delay in &backoff {
            if *self.inner.connected.borrow() {
                // The writer task owns the socket; enqueueing is the send.
                if self.inner.outbound_tx.send(frame.clone()).is_ok() {
                    return Ok(());
                }
            }
            tokio::time::sleep(delay).await;
        }

        // Beyond the retry budget the message is dropped, loudly.
        tracing::warn!(
            exchange = ?exchange,
            routing_key,
            "dropping message after exhausting the send retry budget"
        );
        Ok(())
    }

    async fn subscribe(&self, exchange: Exchange, binding_key: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subs
            .lock()
            .expect("local subscriptions poisoned")
            .push(LocalSub {
                exchange,
                pattern: binding_key.to_string(),
                tx,
            });
        let frame = encode_frame(VERB_SUBSCRIBE, exchange, binding_key, None);
        self.inner
            .outbound_tx
            .send(frame)
            .map_err(|_| Error::BrokerDisconnected)?;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn disconnect(&self) -> Result<()> {
        self.inner.shutdown.cancel();
        let _ = self.inner.connected.send(false);
        Ok(())
    }

    fn connection(&self) -> watch::Receiver<bool> {
        self.inner.connected.subscribe()
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

    async fn broker_pair() -> (TcpBroker, TcpBroker) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(serve(listener));

        let url = url::Url::parse(&format!("tcp://{address}")).unwrap();
        let a = TcpBroker::connect(&url, "T").await.unwrap();
        let b = TcpBroker::connect(&url, "T").await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn publish_crosses_connections() {
        let (a, b) = broker_pair().await;
        let mut sub = b.subscribe(Exchange::Signals, "dev.#").await.unwrap();

        let msg = Message::new(tree! { "h" => 1i32 }, tree! { "a1" => "payload" });
        a.publish(Exchange::Signals, "dev.signalChanged", msg.clone())
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("delivery within the timeout")
            .expect("stream alive");
        assert_eq!(got.routing_key, "dev.signalChanged");
        assert_eq!(got.message, msg);
    }

    #[tokio::test]
    async fn non_matching_bindings_stay_silent() {
        let (a, b) = broker_pair().await;
        let mut other = b.subscribe(Exchange::Signals, "other.#").await.unwrap();
        let mut own = b.subscribe(Exchange::Signals, "dev.#").await.unwrap();

        a.publish(
            Exchange::Signals,
            "dev.signalChanged",
            Message::new(tree::Tree::new(), tree::Tree::new()),
        )
        .await
        .unwrap();

        // The matching binding sees it; the other does not.
        tokio::time::timeout(Duration::from_secs(5), own.next())
            .await
            .expect("delivery")
            .expect("stream alive");
        assert!(
            tokio::time::timeout(Duration::from_millis(200), other.next())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn connect_to_a_dead_address_fails() {
        let url = url::Url::parse("tcp://127.0.0.1:1").unwrap();
        assert!(TcpBroker::connect(&url, "T").await.is_err());
    }
}
