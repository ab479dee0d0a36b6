//! EventBus: durable append plus in-memory fan-out.
//!
//! Each topic owns a dispatcher task that drains the topic outbox and hands
//! every event to each subscriber's bounded queue in publish order. Handing
//! an event to the outbox never waits: a full subscriber queue stalls only
//! the dispatcher of that topic, and later events wait in the outbox.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowgate_core::config::EventsConfig;
use flowgate_state::{StateRead, StateStore, StoreTxn};

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::registry::DecoderRegistry;

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Capacity of every subscriber queue.
    pub queue_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { queue_capacity: 100 }
    }
}

impl From<&EventsConfig> for BusConfig {
    fn from(config: &EventsConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
        }
    }
}

/// How long a publisher waits on delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// Return once the event is handed to the topic dispatcher.
    #[default]
    Detached,
    /// Return once every current subscriber's handler has finished with it.
    AwaitAck,
}

/// An event as received by a subscriber.
#[derive(Debug)]
pub struct Delivery {
    pub event: Event,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    /// Signal that processing finished. Dropping a delivery without
    /// completing it also releases a waiting publisher.
    pub fn complete(self) {
        if let Some(ack) = self.ack {
            let _ = ack.send(());
        }
    }
}

/// A persisted, not yet published event.
#[derive(Debug, Clone)]
pub struct EventHandle {
    topic: String,
    event: Event,
}

impl EventHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn event(&self) -> &Event {
        &self.event
    }
}

/// Reacts to events delivered on a subscription.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Event) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// A registered delivery queue on one topic.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next delivery, or `None` once the bus is closed and the queue drained.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Run the supervised consumption loop on a new task.
    pub fn spawn<H: EventHandler>(self, handler: Arc<H>) -> JoinHandle<()> {
        tokio::spawn(self.run(handler))
    }

    /// Feed every delivery to `handler` until the queue closes.
    ///
    /// Each message is handled on its own task so a panic is contained to
    /// that message; failures are logged and the loop moves on.
    pub async fn run<H: EventHandler>(mut self, handler: Arc<H>) {
        debug!(topic = %self.topic, "subscription loop started");
        while let Some(Delivery { event, ack }) = self.rx.recv().await {
            let event_id = event.event_id;
            let event_type = event.event_type.as_str();
            let handler = Arc::clone(&handler);
            let outcome = tokio::spawn(async move { handler.handle(event).await }).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(topic = %self.topic, %event_id, event_type, error = %e, "event handler failed, message dropped");
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(topic = %self.topic, %event_id, event_type, "event handler panicked, message dropped");
                }
                Err(join_err) => {
                    warn!(topic = %self.topic, %event_id, event_type, error = %join_err, "event handler cancelled");
                }
            }
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        debug!(topic = %self.topic, "subscription loop finished");
    }
}

struct Outbound {
    event: Event,
    ack: Option<oneshot::Sender<()>>,
}

type Subscribers = Arc<Mutex<Vec<mpsc::Sender<Delivery>>>>;

struct Topic {
    outbox: mpsc::UnboundedSender<Outbound>,
    subscribers: Subscribers,
}

struct BusInner {
    config: BusConfig,
    registry: DecoderRegistry,
    closed: AtomicBool,
    topics: Mutex<HashMap<String, Topic>>,
}

/// Cheaply cloneable handle to the process-wide event bus.
///
/// Topic channels are created on first use and spawn their dispatcher on the
/// current Tokio runtime, so `subscribe` and the publish methods must be
/// called from within one.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self::with_registry(config, DecoderRegistry::standard())
    }

    pub fn with_registry(config: BusConfig, registry: DecoderRegistry) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                registry,
                closed: AtomicBool::new(false),
                topics: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> EventResult<()> {
        if self.is_closed() {
            return Err(EventError::Closed);
        }
        Ok(())
    }

    /// Outbox and subscriber list of `topic`, creating the channel and its
    /// dispatcher on first use.
    fn topic(&self, topic: &str) -> EventResult<(mpsc::UnboundedSender<Outbound>, Subscribers)> {
        let mut topics = self.inner.topics.lock().expect("topics lock");
        // Checked under the lock so close() cannot race a new channel in.
        self.ensure_open()?;
        let entry = topics.entry(topic.to_string()).or_insert_with(|| {
            let (outbox, rx) = mpsc::unbounded_channel();
            let subscribers: Subscribers = Arc::new(Mutex::new(Vec::new()));
            tokio::spawn(dispatch(topic.to_string(), rx, Arc::clone(&subscribers)));
            debug!(topic, "topic channel created");
            Topic { outbox, subscribers }
        });
        Ok((entry.outbox.clone(), Arc::clone(&entry.subscribers)))
    }

    /// Register a new delivery queue on `topic`.
    pub fn subscribe(&self, topic: &str) -> EventResult<Subscription> {
        let (_, subscribers) = self.topic(topic)?;
        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        subscribers.lock().expect("subscribers lock").push(tx);
        debug!(topic, "subscriber registered");
        Ok(Subscription {
            topic: topic.to_string(),
            rx,
        })
    }

    /// Number of live subscriber queues on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.inner.topics.lock().expect("topics lock");
        topics.get(topic).map_or(0, |t| {
            let subscribers = t.subscribers.lock().expect("subscribers lock");
            subscribers.iter().filter(|s| !s.is_closed()).count()
        })
    }

    /// Append `event` to the durable log inside the caller's transaction.
    ///
    /// Nothing is delivered until the returned handle is published, which
    /// must only happen after the transaction committed.
    pub fn persist(&self, txn: &StoreTxn, topic: &str, event: Event) -> EventResult<EventHandle> {
        self.ensure_open()?;
        let record = event.to_record(topic)?;
        let key = txn.append_event(&record)?;
        debug!(topic, %key, event_type = event.event_type.as_str(), "event appended");
        Ok(EventHandle {
            topic: topic.to_string(),
            event,
        })
    }

    /// Hand committed events to their dispatchers in order and return
    /// immediately. Slow subscribers never hold up the caller.
    pub fn publish_all(&self, handles: Vec<EventHandle>) -> EventResult<()> {
        for EventHandle { topic, event } in handles {
            self.send(&topic, event, None)?;
        }
        Ok(())
    }

    /// Deliver committed events in order, waiting as `mode` dictates.
    pub async fn publish_with(&self, handles: Vec<EventHandle>, mode: PublishMode) -> EventResult<()> {
        if mode == PublishMode::Detached {
            return self.publish_all(handles);
        }
        for EventHandle { topic, event } in handles {
            let (ack, done) = oneshot::channel();
            self.send(&topic, event, Some(ack))?;
            // A dropped sender means the dispatcher went away; nothing is left to wait for.
            let _ = done.await;
        }
        Ok(())
    }

    fn send(&self, topic: &str, event: Event, ack: Option<oneshot::Sender<()>>) -> EventResult<()> {
        let (outbox, _) = self.topic(topic)?;
        outbox
            .send(Outbound { event, ack })
            .map_err(|_| EventError::Closed)
    }

    /// Redeliver durable events to the current subscribers of their topics,
    /// in event-time order, without appending them again.
    ///
    /// Every record is decoded before the first delivery, so an unsupported
    /// event type aborts the replay without side effects. Each event is
    /// handled by all subscribers before the next one is sent. Returns the
    /// number of events replayed.
    pub async fn replay(&self, store: &StateStore, topic: Option<&str>, since: Option<u64>) -> EventResult<usize> {
        self.ensure_open()?;
        let records = store.view()?.events(topic, since)?;
        let mut decoded = Vec::with_capacity(records.len());
        for record in &records {
            decoded.push((record.topic.clone(), self.inner.registry.decode(record)?));
        }

        info!(topic = topic.unwrap_or("*"), ?since, count = decoded.len(), "replaying events");
        let count = decoded.len();
        for (topic, event) in decoded {
            let (ack, done) = oneshot::channel();
            self.send(&topic, event, Some(ack))?;
            let _ = done.await;
        }
        Ok(count)
    }

    /// Stop accepting subscriptions and publishes and close every
    /// subscriber queue. Queued deliveries are still drained by their loops.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let topics = std::mem::take(&mut *self.inner.topics.lock().expect("topics lock"));
        for topic in topics.values() {
            topic.subscribers.lock().expect("subscribers lock").clear();
        }
        info!(topics = topics.len(), "event bus closed");
    }
}

/// Per-topic dispatcher: fans each outbound event out to every subscriber
/// queue, then resolves the publisher's ack once all handlers acked.
async fn dispatch(topic: String, mut outbox: mpsc::UnboundedReceiver<Outbound>, subscribers: Subscribers) {
    while let Some(Outbound { event, ack }) = outbox.recv().await {
        let targets: Vec<_> = subscribers.lock().expect("subscribers lock").clone();
        let mut pending = Vec::new();
        let mut gone = false;

        for target in targets {
            let (sub_ack, waiter) = if ack.is_some() {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            let delivery = Delivery {
                event: event.clone(),
                ack: sub_ack,
            };
            if target.send(delivery).await.is_err() {
                gone = true;
                continue;
            }
            pending.extend(waiter);
        }

        if gone {
            subscribers
                .lock()
                .expect("subscribers lock")
                .retain(|s| !s.is_closed());
            debug!(%topic, "pruned closed subscribers");
        }

        if let Some(ack) = ack {
            tokio::spawn(async move {
                for waiter in pending {
                    let _ = waiter.await;
                }
                let _ = ack.send(());
            });
        }
    }
    debug!(%topic, "dispatcher stopped");
}
