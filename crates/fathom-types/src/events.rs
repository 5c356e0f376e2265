//! Type-safe event bus for in-process pub/sub.
//!
//! The [`EventBus`] lets the health registry, the standby manager and the
//! repair services publish typed events that the recovery listener and the
//! rebalance service react to, without direct coupling.
//!
//! Internally, the bus maintains a `HashMap<TypeId, Box<dyn Any>>` where each
//! value is a `tokio::sync::broadcast::Sender<E>`. Channels are created lazily
//! on the first `subscribe()` for a given type.
//!
//! # Example
//!
//! ```rust
//! use fathom_types::events::{EventBus, NodeTopologyChanged, TopologyChange};
//! use fathom_types::{DomainName, NodeName};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<NodeTopologyChanged>();
//!
//! bus.emit(NodeTopologyChanged::new(
//!     NodeName::from("node-a1"),
//!     Some(DomainName::from("zone-a")),
//!     TopologyChange::NodeOnline,
//! ));
//!
//! let event = rx.recv().await.unwrap();
//! assert_eq!(event.change, TopologyChange::NodeOnline);
//! # });
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::{ContentHash, DomainName, NodeName};

// ---------------------------------------------------------------------------
// Event trait
// ---------------------------------------------------------------------------

/// Marker trait for all events that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Kind of topology change carried by [`NodeTopologyChanged`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyChange {
    /// A node joined a ring (configured or re-enabled).
    NodeAdded,
    /// A node was removed from its ring (disabled).
    NodeRemoved,
    /// The health oracle saw a node come back.
    NodeOnline,
    /// The health oracle lost a node.
    NodeOffline,
    /// A node moved to another domain (standby promotion).
    NodeDomainChanged,
}

/// A node's membership or liveness changed.
#[derive(Clone, Debug)]
pub struct NodeTopologyChanged {
    /// Node concerned.
    pub node: NodeName,
    /// Domain the node belongs to after the change, if known.
    pub domain: Option<DomainName>,
    /// Domain before the change, set for `NodeDomainChanged`.
    pub previous_domain: Option<DomainName>,
    /// What happened.
    pub change: TopologyChange,
}
impl Event for NodeTopologyChanged {}

impl NodeTopologyChanged {
    /// Build an event without a previous domain.
    pub fn new(node: NodeName, domain: Option<DomainName>, change: TopologyChange) -> Self {
        Self {
            node,
            domain,
            previous_domain: None,
            change,
        }
    }
}

/// An object was copied between nodes by a repair.
#[derive(Clone, Debug)]
pub struct ObjectRepaired {
    /// Object key that was copied.
    pub key: String,
    /// Node the bytes were read from.
    pub source: NodeName,
    /// Node the bytes were written to.
    pub target: NodeName,
}
impl Event for ObjectRepaired {}

/// A write was accepted below the configured replication factor.
#[derive(Clone, Debug)]
pub struct DegradedWriteRecorded {
    /// Hash of the under-replicated object.
    pub hash: ContentHash,
    /// Active domains that did not receive a copy.
    pub missing_domains: Vec<DomainName>,
}
impl Event for DegradedWriteRecorded {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// A type-safe event bus.
///
/// Clonable (`Arc` inside). Thread-safe. Non-blocking emits. Each event type
/// gets its own independent `tokio::broadcast` channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Create a new empty event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    ///
    /// Events with no subscribers are dropped.
    pub fn emit<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let inner = self.inner.lock().expect("event bus lock poisoned");

        if let Some(sender) = inner
            .channels
            .get(&type_id)
            .and_then(|boxed| boxed.downcast_ref::<broadcast::Sender<E>>())
        {
            // No active receivers is fine.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let type_id = TypeId::of::<E>();
        let mut inner = self.inner.lock().expect("event bus lock poisoned");

        let sender = inner
            .channels
            .entry(type_id)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
                Box::new(tx)
            })
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("type mismatch in event bus");

        EventReceiver {
            rx: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("channel_count", &inner.channels.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventReceiver
// ---------------------------------------------------------------------------

/// Typed receiver for a specific event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped. Lagged events are
    /// skipped with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
