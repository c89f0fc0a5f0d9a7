//! Message bus
//!
//! Synchronous, in-process pub/sub. `emit` records the event in a bounded
//! history and then invokes every matching subscription, highest priority
//! first, registration order among equals. Handler failures (returned errors
//! and panics) are logged and never reach the emitter.
//!
//! Request/response runs on top of the same dispatch: `request` publishes an
//! event carrying a fresh correlation id and waits for the first responder
//! registered with `respond` to reply.

mod error;
mod event;
mod pattern;

pub use error::{BusError, BusResult, IntoBusReport};
pub use event::{BusEvent, EventSource, SourceKind, SubscriptionFilter};
pub use pattern::{Pattern, PatternKind};

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn};

use crate::config::BusConfig;
use crate::global::GlobalSlot;
use crate::plugin::panic_message;

/// Subscriber callback. Returning `Err` is logged and isolated.
pub type EventHandler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

/// Identifier of a registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Options for [`MessageBus::subscribe`]
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Higher fires first
    pub priority: i32,
    /// Remove the subscription after its first match
    pub once: bool,
    pub filter: Option<SubscriptionFilter>,
    /// Tag used by [`MessageBus::off_all`]
    pub owner: Option<String>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn with_filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Options for [`MessageBus::replay`]
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Replay at most this many of the most recent matches
    pub limit: Option<usize>,
    pub filter: Option<SubscriptionFilter>,
}

impl ReplayOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            filter: None,
        }
    }
}

/// Diagnostic counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub exact: usize,
    /// Glob and regex subscriptions
    pub pattern: usize,
    pub wildcard: usize,
    pub total: usize,
    pub history_size: usize,
    pub emitted: u64,
}

/// Per-topic counters from [`MessageBus::topic_stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    pub topic: String,
    /// Subscriptions whose pattern matches the topic
    pub subscriber_count: usize,
    /// Events published under this exact type
    pub message_count: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct TopicCounter {
    messages: u64,
    last_message_at: Option<DateTime<Utc>>,
}

type Reply = Result<Value, String>;

struct Entry {
    id: SubscriptionId,
    pattern: Pattern,
    handler: EventHandler,
    priority: i32,
    once: bool,
    filter: Option<SubscriptionFilter>,
    owner: Option<String>,
    responder: bool,
}

impl Entry {
    fn accepts(&self, event: &BusEvent) -> bool {
        self.pattern.matches(&event.event_type)
            && self.filter.as_ref().is_none_or(|f| f.matches(event))
    }
}

#[derive(Default)]
struct Registry {
    /// Insertion-ordered; ties in priority resolve by position here
    entries: Vec<Entry>,
    history: VecDeque<Arc<BusEvent>>,
    emitted: u64,
    counters: HashMap<String, TopicCounter>,
    /// Open requests by correlation id
    pending: HashMap<String, oneshot::Sender<Reply>>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        before != self.entries.len()
    }
}

/// Disposer returned by every subscribe call.
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.lock().remove(self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// The message bus. Cloning yields another handle onto the same registry.
#[derive(Clone)]
pub struct MessageBus {
    config: BusConfig,
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Mutex::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Register a handler for events matching `pattern`.
    pub fn subscribe<F>(
        &self,
        pattern: impl Into<Pattern>,
        handler: F,
        options: SubscribeOptions,
    ) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_arc(pattern.into(), Arc::new(handler), options, false)
    }

    fn subscribe_arc(
        &self,
        pattern: Pattern,
        handler: EventHandler,
        options: SubscribeOptions,
        responder: bool,
    ) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));

        debug!(
            subscription = %id,
            pattern = %pattern,
            priority = options.priority,
            once = options.once,
            responder,
            "Registering bus subscription"
        );

        self.registry.lock().entries.push(Entry {
            id,
            pattern,
            handler,
            priority: options.priority,
            once: options.once,
            filter: options.filter,
            owner: options.owner,
            responder,
        });

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Subscribe with default options.
    pub fn on<F>(&self, pattern: impl Into<Pattern>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, handler, SubscribeOptions::default())
    }

    /// Subscribe for a single matching event.
    pub fn once<F>(&self, pattern: impl Into<Pattern>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, handler, SubscribeOptions::default().once())
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry.lock().remove(id)
    }

    /// Remove every subscription registered with `owner`.
    pub fn off_all(&self, owner: &str) -> usize {
        let mut registry = self.registry.lock();
        let before = registry.entries.len();
        registry
            .entries
            .retain(|e| e.owner.as_deref() != Some(owner));
        let removed = before - registry.entries.len();
        if removed > 0 {
            debug!(owner, removed, "Removed owner subscriptions");
        }
        removed
    }

    /// Build and dispatch an event without metadata.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        source: EventSource,
    ) -> Arc<BusEvent> {
        self.publish(BusEvent::new(event_type, payload, source, HashMap::new()))
    }

    pub fn emit_with_metadata(
        &self,
        event_type: impl Into<String>,
        payload: Value,
        source: EventSource,
        metadata: HashMap<String, Value>,
    ) -> Arc<BusEvent> {
        self.publish(BusEvent::new(event_type, payload, source, metadata))
    }

    /// Record `event` and dispatch it synchronously. All matching handlers
    /// have run (or failed in isolation) when this returns.
    pub fn publish(&self, event: BusEvent) -> Arc<BusEvent> {
        let event = Arc::new(event);

        let mut targets: Vec<(SubscriptionId, i32, EventHandler)> = {
            let mut registry = self.registry.lock();

            registry.history.push_back(event.clone());
            while registry.history.len() > self.config.history_limit {
                registry.history.pop_front();
            }
            registry.emitted += 1;
            let counter = registry.counters.entry(event.event_type.clone()).or_default();
            counter.messages += 1;
            counter.last_message_at = Some(event.timestamp);

            let targets = registry
                .entries
                .iter()
                .filter(|e| e.accepts(&event))
                .map(|e| (e.id, e.priority, e.handler.clone()))
                .collect::<Vec<_>>();

            // `once` subscriptions leave the registry before their handler runs,
            // so re-entrant emits from inside a handler cannot fire them again.
            registry
                .entries
                .retain(|e| !(e.once && targets.iter().any(|(id, _, _)| *id == e.id)));

            targets
        };

        // Stable: equal priorities keep registration order.
        targets.sort_by(|a, b| b.1.cmp(&a.1));

        trace!(
            event_type = %event.event_type,
            handlers = targets.len(),
            "Dispatching bus event"
        );

        for (id, _, handler) in targets {
            invoke(id, &handler, &event);
        }

        event
    }

    /// Answer requests published on topics matching `pattern`.
    ///
    /// The handler runs on the current tokio runtime for every event that
    /// carries a correlation id; plain emits on the topic are ignored. When
    /// several responders match, the first to finish answers and later
    /// replies are dropped.
    pub fn respond<F, Fut>(&self, pattern: impl Into<Pattern>, handler: F) -> Subscription
    where
        F: Fn(Arc<BusEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.respond_with(pattern.into(), handler, SubscribeOptions::default())
    }

    fn respond_with<F, Fut>(&self, pattern: Pattern, handler: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(Arc<BusEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let registry = Arc::downgrade(&self.registry);

        let wrapped: EventHandler = Arc::new(move |event: &BusEvent| {
            let Some(correlation_id) = event.correlation_id.clone() else {
                return Ok(());
            };
            let runtime = match Handle::try_current() {
                Ok(runtime) => runtime,
                Err(e) => {
                    reply(&registry, &correlation_id, Err(format!("no tokio runtime: {e}")));
                    return Ok(());
                }
            };

            let handler = handler.clone();
            let registry = registry.clone();
            let event = Arc::new(event.clone());
            runtime.spawn(async move {
                let outcome = match AssertUnwindSafe(async { handler(event).await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(panic) => Err(format!("panicked: {}", panic_message(&*panic))),
                };
                reply(&registry, &correlation_id, outcome);
            });
            Ok(())
        });

        self.subscribe_arc(pattern, wrapped, options, true)
    }

    /// Publish `payload` on `topic` as a request and wait for a responder.
    ///
    /// `timeout` defaults to the bus's configured request timeout. Fails with
    /// [`BusError::NoResponder`] before publishing when nothing answers the
    /// topic.
    pub async fn request(
        &self,
        topic: impl Into<String>,
        payload: Value,
        source: EventSource,
        timeout: Option<Duration>,
    ) -> BusResult<Value> {
        let topic = topic.into();
        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let (sender, receiver) = oneshot::channel();
        {
            let mut registry = self.registry.lock();
            if !registry
                .entries
                .iter()
                .any(|e| e.responder && e.pattern.matches(&topic))
            {
                return Err(Report::new(BusError::NoResponder { topic }));
            }
            registry.pending.insert(correlation_id.clone(), sender);
        }

        debug!(topic = %topic, correlation_id = %correlation_id, "Sending bus request");
        self.publish(
            BusEvent::new(topic.clone(), payload, source, HashMap::new())
                .with_correlation_id(correlation_id.clone()),
        );

        let outcome = tokio::time::timeout(timeout, receiver).await;
        self.registry.lock().pending.remove(&correlation_id);

        match outcome {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(Report::new(BusError::ResponderFailed { topic, message })),
            Ok(Err(_)) => Err(Report::new(BusError::ResponderFailed {
                topic,
                message: "reply channel closed".to_string(),
            })),
            Err(_) => Err(Report::new(BusError::RequestTimeout {
                topic,
                timeout_ms: timeout.as_millis() as u64,
            })),
        }
    }

    /// Re-run `handler` against recent history without re-emitting.
    ///
    /// Returns the number of events replayed. Other subscribers and the
    /// history itself are untouched.
    pub fn replay<F>(&self, pattern: impl Into<Pattern>, handler: F, options: ReplayOptions) -> usize
    where
        F: Fn(&BusEvent) -> anyhow::Result<()>,
    {
        let pattern = pattern.into();
        let history: Vec<Arc<BusEvent>> = self.registry.lock().history.iter().cloned().collect();

        let matching: Vec<Arc<BusEvent>> = history
            .into_iter()
            .filter(|e| pattern.matches(&e.event_type))
            .filter(|e| options.filter.as_ref().is_none_or(|f| f.matches(e)))
            .collect();

        let skip = options
            .limit
            .map(|limit| matching.len().saturating_sub(limit))
            .unwrap_or(0);

        let mut replayed = 0;
        for event in matching.into_iter().skip(skip) {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event_type = %event.event_type, "Replay handler failed: {e:#}"),
                Err(_) => error!(event_type = %event.event_type, "Replay handler panicked"),
            }
            replayed += 1;
        }
        replayed
    }

    /// Most recent `limit` events, oldest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<Arc<BusEvent>> {
        let registry = self.registry.lock();
        let skip = limit
            .map(|l| registry.history.len().saturating_sub(l))
            .unwrap_or(0);
        registry.history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.registry.lock().history.clear();
    }

    pub fn has_subscribers(&self, event_type: &str) -> bool {
        self.registry
            .lock()
            .entries
            .iter()
            .any(|e| e.pattern.matches(event_type))
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.registry
            .lock()
            .entries
            .iter()
            .filter(|e| e.pattern.matches(event_type))
            .count()
    }

    /// Counters for one exact topic; `None` if it was never published and
    /// nothing subscribes to it.
    pub fn topic_stats(&self, topic: &str) -> Option<TopicStats> {
        let registry = self.registry.lock();
        let subscriber_count = registry
            .entries
            .iter()
            .filter(|e| e.pattern.matches(topic))
            .count();
        let counter = registry.counters.get(topic);
        if counter.is_none() && subscriber_count == 0 {
            return None;
        }
        Some(TopicStats {
            topic: topic.to_string(),
            subscriber_count,
            message_count: counter.map_or(0, |c| c.messages),
            last_message_at: counter.and_then(|c| c.last_message_at),
        })
    }

    /// Distinct pattern sources, in first-registration order.
    pub fn topics(&self) -> Vec<String> {
        let registry = self.registry.lock();
        let mut topics: Vec<String> = Vec::new();
        for entry in &registry.entries {
            let topic = entry.pattern.to_string();
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }

    pub fn stats(&self) -> BusStats {
        let registry = self.registry.lock();
        let mut stats = BusStats {
            total: registry.entries.len(),
            history_size: registry.history.len(),
            emitted: registry.emitted,
            ..Default::default()
        };
        for entry in &registry.entries {
            match entry.pattern.kind() {
                PatternKind::Exact => stats.exact += 1,
                PatternKind::Pattern => stats.pattern += 1,
                PatternKind::Wildcard => stats.wildcard += 1,
            }
        }
        stats
    }

    /// A view that prefixes event types with `"<prefix>:"` and tags every
    /// subscription with `source.id` as owner.
    pub fn scope(&self, prefix: impl Into<String>, source: EventSource) -> ScopedBus {
        ScopedBus {
            bus: self.clone(),
            prefix: prefix.into(),
            source,
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

fn reply(registry: &Weak<Mutex<Registry>>, correlation_id: &str, outcome: Reply) {
    let sender = registry
        .upgrade()
        .and_then(|registry| registry.lock().pending.remove(correlation_id));
    match sender {
        Some(sender) => {
            let _ = sender.send(outcome);
        }
        None => debug!(correlation_id, "Dropping reply to a closed request"),
    }
}

fn invoke(id: SubscriptionId, handler: &EventHandler, event: &BusEvent) {
    match catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(
                subscription = %id,
                event_type = %event.event_type,
                "Bus handler failed: {e:#}"
            );
        }
        Err(_) => {
            error!(
                subscription = %id,
                event_type = %event.event_type,
                "Bus handler panicked"
            );
        }
    }
}

/// Prefixed view over a [`MessageBus`]
#[derive(Clone)]
pub struct ScopedBus {
    bus: MessageBus,
    prefix: String,
    source: EventSource,
}

impl ScopedBus {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn topic(&self, event_type: &str) -> String {
        format!("{}:{}", self.prefix, event_type)
    }

    pub fn emit(&self, event_type: &str, payload: Value) -> Arc<BusEvent> {
        self.bus
            .emit(self.topic(event_type), payload, self.source.clone())
    }

    pub fn emit_with_metadata(
        &self,
        event_type: &str,
        payload: Value,
        metadata: HashMap<String, Value>,
    ) -> Arc<BusEvent> {
        self.bus.emit_with_metadata(
            self.topic(event_type),
            payload,
            self.source.clone(),
            metadata,
        )
    }

    pub fn subscribe<F>(
        &self,
        pattern: impl Into<Pattern>,
        handler: F,
        options: SubscribeOptions,
    ) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let pattern: Pattern = pattern.into();
        let options = SubscribeOptions {
            owner: Some(self.source.id.clone()),
            ..options
        };
        self.bus
            .subscribe_arc(pattern.scoped(&self.prefix), Arc::new(handler), options, false)
    }

    /// Answer requests on `"<prefix>:<pattern>"`.
    pub fn respond<F, Fut>(&self, pattern: impl Into<Pattern>, handler: F) -> Subscription
    where
        F: Fn(Arc<BusEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let pattern: Pattern = pattern.into();
        let options = SubscribeOptions::default().with_owner(self.source.id.clone());
        self.bus
            .respond_with(pattern.scoped(&self.prefix), handler, options)
    }

    pub async fn request(
        &self,
        event_type: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> BusResult<Value> {
        self.bus
            .request(self.topic(event_type), payload, self.source.clone(), timeout)
            .await
    }

    pub fn on<F>(&self, pattern: impl Into<Pattern>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, handler, SubscribeOptions::default())
    }

    pub fn once<F>(&self, pattern: impl Into<Pattern>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(pattern, handler, SubscribeOptions::default().once())
    }

    /// Drop every subscription this scope's owner registered.
    pub fn clear(&self) -> usize {
        self.bus.off_all(&self.source.id)
    }
}

static DEFAULT_BUS: GlobalSlot<MessageBus> = GlobalSlot::new();

/// Process-wide bus, created on first use.
pub fn default_bus() -> Arc<MessageBus> {
    DEFAULT_BUS.get_or_init(MessageBus::new)
}

/// Replace the process-wide bus, e.g. with one built from loaded config.
pub fn install_default_bus(bus: MessageBus) {
    DEFAULT_BUS.install(Arc::new(bus));
}

/// Drop the process-wide bus; the next [`default_bus`] call builds a new one.
pub fn reset_default_bus() {
    DEFAULT_BUS.reset();
}
