use crate::utils::math::AxisBox;
use crate::world::terrain::{TerrainIndex, TerrainLayerDefinition};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Events raised by the terrain handler
#[derive(Debug, Clone, PartialEq)]
pub enum TerrainEvent {
    /// Heights changed inside `areas`; `pages` are the loaded pages touching them
    AfterTerrainUpdate {
        areas: Vec<AxisBox>,
        pages: BTreeSet<TerrainIndex>,
    },
    /// A material layer was registered for the first time
    ShaderCreated {
        shader_index: usize,
        layer: TerrainLayerDefinition,
    },
    /// The terrain's extent became known
    WorldSizeChanged { bounds: AxisBox },
    /// The material of a page was rebuilt
    MaterialRecompiled { page: TerrainIndex },
}

/// Events raised by the terrain manager for the rest of the client
#[derive(Debug, Clone, PartialEq)]
pub enum TerrainManagerEvent {
    PageGeometryUpdated { page: TerrainIndex },
    TerrainShown { areas: Vec<AxisBox> },
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback<E> = Rc<dyn Fn(&E)>;

struct Subscribers<E> {
    next_id: u64,
    callbacks: BTreeMap<SubscriptionId, Callback<E>>,
}

/// Broadcasts events to subscribers in subscription order.
///
/// Subscribing and unsubscribing from inside a callback is allowed: a callback
/// added during an emit first sees the next event, and one removed during an
/// emit is not called again, even for the event in progress.
pub struct EventBus<E> {
    subscribers: RefCell<Subscribers<E>>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: RefCell::new(Subscribers {
                next_id: 0,
                callbacks: BTreeMap::new(),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&E) + 'static) -> SubscriptionId {
        let mut subscribers = self.subscribers.borrow_mut();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, Rc::new(callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.borrow_mut().callbacks.remove(&id).is_some()
    }

    pub fn emit(&self, event: &E) {
        let targets: Vec<(SubscriptionId, Callback<E>)> = self
            .subscribers
            .borrow()
            .callbacks
            .iter()
            .map(|(id, callback)| (*id, Rc::clone(callback)))
            .collect();

        for (id, callback) in targets {
            let still_subscribed = self.subscribers.borrow().callbacks.contains_key(&id);
            if still_subscribed {
                callback(event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().callbacks.len()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
