//! Cache store
//!
//! Owns the key to entity mapping and routes requests to entities,
//! constructing them lazily on a miss. Every event fired by an owned entity is
//! re-broadcast on the store's channel so global observers need no
//! per-entity subscription.
//!
//! # Identity
//!
//! Lookup and construction happen under one lock, so concurrent requests for
//! the same key always resolve to the same entity. A key holds at most one
//! live entity; releasing an entity removes exactly that entity.

pub mod observer;

pub use observer::spawn_event_logger;

use crate::entity::{Entity, EntityOptions, DEFAULT_LIFE, DEFAULT_MAX_LIFE};
use crate::error::LifecacheResult;
use crate::hooks::HookEvent;
use crate::lock::mutex_lock;
use crate::resource::ResourceFactory;
use crate::scheduler::{Scheduler, TokioScheduler};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default capacity of the store event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Tunables shared by every entity of a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    /// Name used to tag this store in logs
    pub label: String,

    /// Life budget of a new entity, in life units
    pub initial_life: f64,

    /// Ceiling of any life budget, in life units
    pub max_life: f64,

    /// Wall-clock length of one life unit
    pub life_unit: Duration,

    /// Options used by `get` when none are given
    pub default_options: EntityOptions,

    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            label: "lifecache".to_string(),
            initial_life: DEFAULT_LIFE,
            max_life: DEFAULT_MAX_LIFE,
            life_unit: Duration::from_secs(1),
            default_options: EntityOptions::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// An entity event re-broadcast by its store.
///
/// Buffered events hold the entity weakly, so a lagging subscriber never
/// keeps released entities alive.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Key of the entity that fired the event
    pub key: String,

    /// Id of the entity that fired the event
    pub entity_id: Uuid,

    /// The event itself
    pub event: HookEvent,

    entity: Weak<Entity>,
}

impl StoreEvent {
    pub(crate) fn new(entity: &Arc<Entity>, event: HookEvent) -> Self {
        Self {
            key: entity.key().to_string(),
            entity_id: entity.id(),
            event,
            entity: Arc::downgrade(entity),
        }
    }

    pub fn name(&self) -> &'static str {
        self.event.name()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entity that fired the event, while it is still alive
    pub fn entity(&self) -> Option<Arc<Entity>> {
        self.entity.upgrade()
    }
}

/// State shared between a store and its entities
pub(crate) struct StoreShared {
    entities: Mutex<HashMap<String, Arc<Entity>>>,
    factory: Box<dyn ResourceFactory>,
    scheduler: Arc<dyn Scheduler>,
    settings: StoreSettings,
    events: broadcast::Sender<StoreEvent>,
}

impl StoreShared {
    pub(crate) fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub(crate) fn factory(&self) -> &dyn ResourceFactory {
        self.factory.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Re-emit an entity event; dropped when nobody listens
    pub(crate) fn broadcast(&self, entity: &Arc<Entity>, event: HookEvent) {
        let _ = self.events.send(StoreEvent::new(entity, event));
    }

    /// Make a ready entity discoverable, unless another entity owns the key
    pub(crate) fn register(&self, entity: &Arc<Entity>) {
        let mut entities = mutex_lock(&self.entities, "store.register");
        entities
            .entry(entity.key().to_string())
            .or_insert_with(|| Arc::clone(entity));
    }

    /// Drop `entity` from the mapping if it still owns its key
    pub(crate) fn remove(&self, entity: &Entity) {
        let mut entities = mutex_lock(&self.entities, "store.remove");
        let owned = entities
            .get(entity.key())
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), entity));
        if owned {
            entities.remove(entity.key());
            debug!("Removed {} from {}", entity.key(), self.settings.label);
        }
    }

    /// Atomic look-up-or-construct. The flag is true when the entity was
    /// just constructed and still has to be started.
    fn lookup_or_insert(self: &Arc<Self>, key: &str, options: EntityOptions) -> (Arc<Entity>, bool) {
        let mut entities = mutex_lock(&self.entities, "store.lookup");
        if let Some(entity) = entities.get(key) {
            return (Arc::clone(entity), false);
        }

        let entity = Entity::new(self, key, options);
        entities.insert(key.to_string(), Arc::clone(&entity));
        (entity, true)
    }
}

/// Registry of lazily constructed entities
#[derive(Clone)]
pub struct CacheStore {
    shared: Arc<StoreShared>,
}

impl CacheStore {
    /// Create a store with default settings on tokio timers
    pub fn new(factory: impl ResourceFactory + 'static) -> Self {
        Self::builder(factory).build()
    }

    pub fn builder(factory: impl ResourceFactory + 'static) -> CacheStoreBuilder {
        CacheStoreBuilder {
            factory: Box::new(factory),
            scheduler: None,
            settings: StoreSettings::default(),
        }
    }

    /// Get the entity for `key`, constructing it with the default options
    pub async fn get(&self, key: &str) -> LifecacheResult<Arc<Entity>> {
        self.get_with(key, self.shared.settings.default_options)
            .await
    }

    /// Get the entity for `key`, constructing it with `options` on a miss.
    ///
    /// Returns as soon as the entity exists; a readiness check may still be
    /// running. When `options.create` is set the create capability receives a
    /// null payload; use [`CacheStore::create`] to supply data.
    pub async fn get_with(&self, key: &str, options: EntityOptions) -> LifecacheResult<Arc<Entity>> {
        let (entity, fresh) = self.shared.lookup_or_insert(key, options);
        if fresh {
            let seed = options.create.then_some(Value::Null);
            self.start(&entity, seed).await?;
        }
        Ok(entity)
    }

    /// Replace the payload stored under `key`
    pub async fn set(&self, key: &str, value: Value) -> LifecacheResult<()> {
        self.get(key).await?.set_data(value).await
    }

    /// Create the resource under `key` from `data`, skipping the readiness
    /// check. An entity already cached for `key` is reused.
    pub async fn create(&self, key: &str, data: Value) -> LifecacheResult<Arc<Entity>> {
        let options = self
            .shared
            .settings
            .default_options
            .with_check(false)
            .with_create(true);

        let (entity, fresh) = self.shared.lookup_or_insert(key, options);
        if fresh {
            self.start(&entity, Some(data)).await?;
        } else {
            entity.create(data).await?;
        }
        Ok(entity)
    }

    /// Ensure `key` is absent. A missing key is constructed and released
    /// straight away.
    pub async fn release(&self, key: &str) -> LifecacheResult<()> {
        self.get(key).await?.release().await
    }

    /// Receive every event fired by any entity of this store
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }

    /// Cached entity for `key`, without constructing one
    pub fn peek(&self, key: &str) -> Option<Arc<Entity>> {
        mutex_lock(&self.shared.entities, "store.peek")
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        mutex_lock(&self.shared.entities, "store.contains").contains_key(key)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.shared.entities, "store.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = mutex_lock(&self.shared.entities, "store.keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.shared.settings
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.shared.scheduler
    }

    /// Start a freshly constructed entity; one that fails to start is
    /// released so it never lingers in the mapping
    async fn start(&self, entity: &Arc<Entity>, seed: Option<Value>) -> LifecacheResult<()> {
        if let Err(e) = entity.start(seed).await {
            warn!("Failed to construct {}: {}", entity.key(), e);
            if let Err(release_err) = entity.release().await {
                warn!("Failed to release {}: {}", entity.key(), release_err);
            }
            return Err(e);
        }
        Ok(())
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("label", &self.shared.settings.label)
            .field("entities", &self.len())
            .finish()
    }
}

/// Builder for [`CacheStore`]
pub struct CacheStoreBuilder {
    factory: Box<dyn ResourceFactory>,
    scheduler: Option<Arc<dyn Scheduler>>,
    settings: StoreSettings,
}

impl CacheStoreBuilder {
    pub fn settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn default_options(mut self, options: EntityOptions) -> Self {
        self.settings.default_options = options;
        self
    }

    pub fn build(self) -> CacheStore {
        let (events, _) = broadcast::channel(self.settings.event_capacity.max(1));
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()));

        CacheStore {
            shared: Arc::new(StoreShared {
                entities: Mutex::new(HashMap::new()),
                factory: self.factory,
                scheduler,
                settings: self.settings,
                events,
            }),
        }
    }
}
