//! Cached entity state machine
//!
//! An [`Entity`] is one lazily-resolved value of a [`CacheStore`]. It starts
//! `pending`, runs its readiness check (when asked to), and then serves the
//! hooked capability surface. Every hooked operation fires a before and an
//! after event on the entity's [`HookBus`]; with `keep` enabled those events
//! feed the life budget, which keeps rescheduling the eviction timer.
//!
//! # Ready States
//!
//! | State | Reached by |
//! |-------|------------|
//! | pending | construction |
//! | ready | successful check, or construction without a check |
//! | failed | rejected check; the entity is then released |
//!
//! An entity released while still pending stays `pending`: its check result
//! is dropped and `ready()` reports [`LifecacheError::Released`].
//!
//! [`CacheStore`]: crate::store::CacheStore

pub mod life;
pub mod stream;

pub use life::{payload_size, LifeBudget, DEFAULT_LIFE, DEFAULT_MAX_LIFE};
pub use stream::{HookedReader, HookedWriter};

use crate::error::{LifecacheError, LifecacheResult};
use crate::hooks::{HookBus, HookEvent};
use crate::lock::mutex_lock;
use crate::resource::{ProviderChain, StreamOptions};
use crate::scheduler::{Scheduler, TimerId};
use crate::store::StoreShared;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest eviction delay ever scheduled
const MAX_EVICTION_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Readiness of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadyState::Pending => "pending",
            ReadyState::Ready => "ready",
            ReadyState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Construction options, fixed for the life of the entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityOptions {
    /// Run the readiness check before becoming ready
    pub check: bool,

    /// Invoke the create capability at construction
    pub create: bool,

    /// Extend life on every data operation
    pub keep: bool,
}

impl Default for EntityOptions {
    fn default() -> Self {
        Self {
            check: true,
            create: false,
            keep: false,
        }
    }
}

impl EntityOptions {
    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }
}

struct EntityState {
    data: Option<Value>,
    life: LifeBudget,
    timer: Option<TimerId>,
    // Bumped by every reschedule; a fired timer only evicts if it matches
    generation: u64,
    expires_at: Duration,
    failure: Option<Arc<LifecacheError>>,
    released: bool,
}

/// One cached value and its lifecycle
pub struct Entity {
    id: Uuid,
    key: String,
    options: EntityOptions,
    providers: ProviderChain,
    store: Weak<StoreShared>,
    scheduler: Arc<dyn Scheduler>,
    life_unit: Duration,
    me: Weak<Entity>,
    hooks: HookBus,
    ready: watch::Sender<ReadyState>,
    state: Mutex<EntityState>,
    // Serializes primitives on this entity
    op_lock: tokio::sync::Mutex<()>,
}

impl Entity {
    pub(crate) fn new(store: &Arc<StoreShared>, key: &str, options: EntityOptions) -> Arc<Self> {
        let settings = store.settings();
        let (ready, _) = watch::channel(ReadyState::Pending);

        let entity = Arc::new_cyclic(|me| Entity {
            id: Uuid::new_v4(),
            key: key.to_string(),
            options,
            providers: store.factory().build(key),
            store: Arc::downgrade(store),
            scheduler: Arc::clone(store.scheduler()),
            life_unit: settings.life_unit,
            me: me.clone(),
            hooks: HookBus::new(),
            ready,
            state: Mutex::new(EntityState {
                data: None,
                life: LifeBudget::new(settings.initial_life, settings.max_life),
                timer: None,
                generation: 0,
                expires_at: Duration::ZERO,
                failure: None,
                released: false,
            }),
            op_lock: tokio::sync::Mutex::new(()),
        });

        entity.install_hooks();
        debug!("Constructed entity {} ({})", entity.key, entity.id);
        entity
    }

    /// Forward every event to the store, then let the life engine score it.
    /// Forwarding first means observers see an operation before the life
    /// extension it causes.
    fn install_hooks(&self) {
        let me = self.me.clone();
        let store = self.store.clone();
        self.hooks.on_any(move |event| {
            if let (Some(entity), Some(store)) = (me.upgrade(), store.upgrade()) {
                store.broadcast(&entity, event.clone());
            }
        });

        if self.options.keep {
            let me = self.me.clone();
            self.hooks.on_any(move |event| {
                if let Some(entity) = me.upgrade() {
                    entity.observe_life(event);
                }
            });
        }
    }

    /// Arm the eviction timer, run the creation seed and start readiness.
    pub(crate) async fn start(&self, seed: Option<Value>) -> LifecacheResult<()> {
        self.reschedule();

        if let Some(data) = seed {
            self.create(data).await?;
        }

        if self.options.check {
            let me = self.me.clone();
            tokio::spawn(async move {
                if let Some(entity) = me.upgrade() {
                    entity.run_check().await;
                }
            });
        } else {
            self.mark_ready();
        }

        Ok(())
    }

    async fn run_check(&self) {
        if self.is_released() {
            debug!("Skipping readiness check of released {}", self.key);
            return;
        }

        let outcome = self.providers.primary().check(&self.key).await;
        if self.is_released() {
            debug!("Dropping readiness check result of released {}", self.key);
            return;
        }

        match outcome {
            Ok(()) => self.mark_ready(),
            Err(e) => {
                let cause = Arc::new(e);
                warn!("Readiness check failed for {}: {}", self.key, cause);

                self.state().failure = Some(Arc::clone(&cause));
                self.ready.send_replace(ReadyState::Failed);
                self.emit(HookEvent::CheckFail(Arc::clone(&cause)));
                self.emit(HookEvent::Error(cause));

                if let Err(e) = self.release().await {
                    warn!("Failed to release {} after check failure: {}", self.key, e);
                }
            }
        }
    }

    fn mark_ready(&self) {
        if self.is_released() {
            return;
        }
        self.ready.send_replace(ReadyState::Ready);
        if let (Some(me), Some(store)) = (self.me.upgrade(), self.store.upgrade()) {
            store.register(&me);
        }
        debug!("Entity {} is ready", self.key);
        self.emit(HookEvent::Ready);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn options(&self) -> EntityOptions {
        self.options
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.ready.borrow()
    }

    /// Remaining life budget, in life units
    pub fn life(&self) -> f64 {
        self.state().life.life()
    }

    /// Scheduler time at which the eviction timer fires
    pub fn expires_at(&self) -> Duration {
        self.state().expires_at
    }

    /// Locally materialized payload, if any
    pub fn data(&self) -> Option<Value> {
        self.state().data.clone()
    }

    /// Cause of a failed readiness check
    pub fn failure_reason(&self) -> Option<Arc<LifecacheError>> {
        self.state().failure.clone()
    }

    pub fn is_released(&self) -> bool {
        self.state().released
    }

    /// The entity's hook bus, for per-entity subscribers
    pub fn hooks(&self) -> &HookBus {
        &self.hooks
    }

    /// Wait until the entity leaves `pending`, or is released while pending
    pub async fn ready(&self) -> LifecacheResult<()> {
        let mut rx = self.ready.subscribe();
        let state = *rx
            .wait_for(|s| *s != ReadyState::Pending || self.is_released())
            .await
            .map_err(|_| LifecacheError::Internal("readiness channel closed".to_string()))?;

        match state {
            ReadyState::Ready => Ok(()),
            ReadyState::Pending => Err(LifecacheError::Released {
                key: self.key.clone(),
            }),
            ReadyState::Failed => Err(LifecacheError::CheckFailed {
                key: self.key.clone(),
                source: self.failure_reason().unwrap_or_else(|| {
                    Arc::new(LifecacheError::Internal("check failed".to_string()))
                }),
            }),
        }
    }

    /// Read the payload, serving the local copy when one is materialized
    pub async fn get_data(&self) -> LifecacheResult<Value> {
        self.read_data(false).await
    }

    /// Read the payload from the resource, replacing any local copy
    pub async fn refresh_data(&self) -> LifecacheResult<Value> {
        self.read_data(true).await
    }

    async fn read_data(&self, force: bool) -> LifecacheResult<Value> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeGetData { force },
            self.fetch_data(force),
            |data| HookEvent::AfterGetData(data.clone()),
        )
        .await
    }

    /// Replace the payload. The local copy is dropped and re-read on demand.
    pub async fn set_data(&self, value: Value) -> LifecacheResult<()> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeSetData(value.clone()),
            self.write_data(&value),
            |_| HookEvent::AfterSetData(value.clone()),
        )
        .await
    }

    /// Look up a child; children already materialized locally are returned
    /// without touching the resource or firing hooks
    pub async fn get_child(&self, name: &str) -> LifecacheResult<Value> {
        if let Some(child) = self.local_child(name) {
            return Ok(child);
        }

        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeGetChild {
                name: name.to_string(),
            },
            self.providers.primary().get_child(&self.key, name),
            |child| HookEvent::AfterGetChild {
                name: name.to_string(),
                child: child.clone(),
            },
        )
        .await
    }

    pub async fn set_child(&self, name: &str, value: Value) -> LifecacheResult<()> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeSetChild {
                name: name.to_string(),
                value: value.clone(),
            },
            self.write_child(name, &value),
            |_| HookEvent::AfterSetChild {
                name: name.to_string(),
                value: value.clone(),
            },
        )
        .await
    }

    /// Open a pull stream; `afterGetStream` fires when it reaches end of data
    pub async fn get_stream(&self, options: StreamOptions) -> LifecacheResult<HookedReader> {
        let _op = self.op_lock.lock().await;
        self.emit(HookEvent::BeforeGetStream(options));
        let inner = self
            .providers
            .primary()
            .get_stream(&self.key, &options)
            .await?;
        Ok(HookedReader::new(
            inner,
            self.me.clone(),
            HookEvent::AfterGetStream(options),
        ))
    }

    /// Open a push stream; `afterSetStream` fires when it is shut down
    pub async fn set_stream(&self, options: StreamOptions) -> LifecacheResult<HookedWriter> {
        let _op = self.op_lock.lock().await;
        self.emit(HookEvent::BeforeSetStream(options));
        let inner = self
            .providers
            .primary()
            .set_stream(&self.key, &options)
            .await?;
        Ok(HookedWriter::new(
            inner,
            self.me.clone(),
            HookEvent::AfterSetStream(options),
        ))
    }

    /// Create the backing resource and materialize `data` locally
    pub async fn create(&self, data: Value) -> LifecacheResult<()> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeCreate(data.clone()),
            self.create_local(&data),
            |_| HookEvent::AfterCreate(data.clone()),
        )
        .await
    }

    /// Run the execute capability, falling back through the provider chain
    pub async fn execute(&self, context: Value) -> LifecacheResult<Value> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeExecute(context.clone()),
            self.providers.execute(&self.key, &context),
            |result| HookEvent::AfterExecute(result.clone()),
        )
        .await
    }

    /// Visit every child of the resource
    pub async fn scan<F>(&self, mut visit: F) -> LifecacheResult<usize>
    where
        F: FnMut(&str, &Value) + Send,
    {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeScan,
            self.providers.primary().scan(&self.key, &mut visit),
            |visited| HookEvent::AfterScan { visited: *visited },
        )
        .await
    }

    /// Destroy the backing resource, then release the entity
    pub async fn destroy(&self) -> LifecacheResult<()> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeDestroy,
            self.providers.primary().destroy(&self.key),
            |_| HookEvent::AfterDestroy,
        )
        .await?;
        self.release_locked().await
    }

    /// Move the backing resource to `dest`, then release the entity; the
    /// resource is reachable again through the store under `dest`
    pub async fn move_to(&self, dest: &str) -> LifecacheResult<()> {
        let _op = self.op_lock.lock().await;
        self.hooked(
            HookEvent::BeforeMove {
                dest: dest.to_string(),
            },
            self.providers.primary().move_to(&self.key, dest),
            |_| HookEvent::AfterMove {
                dest: dest.to_string(),
            },
        )
        .await?;
        self.release_locked().await
    }

    /// Tear the entity down and remove it from its store.
    ///
    /// Releasing an already released entity is a no-op.
    pub async fn release(&self) -> LifecacheResult<()> {
        if self.is_released() {
            return Ok(());
        }
        let _op = self.op_lock.lock().await;
        self.release_locked().await
    }

    async fn release_locked(&self) -> LifecacheResult<()> {
        if self.is_released() {
            return Ok(());
        }

        self.emit(HookEvent::BeforeRelease);
        let result = self.providers.primary().release(&self.key).await;
        self.detach();
        result?;

        info!("Released {} (life {:.2})", self.key, self.life());
        self.emit(HookEvent::AfterRelease);
        Ok(())
    }

    /// Mark released, stop the timer and leave the store mapping
    fn detach(&self) {
        let timer = {
            let mut state = self.state();
            if state.released {
                return;
            }
            state.released = true;
            state.data = None;
            state.timer.take()
        };

        if let Some(id) = timer {
            self.scheduler.cancel(id);
        }
        if let Some(store) = self.store.upgrade() {
            store.remove(self);
        }
        // Wake `ready()` waiters of an entity released while pending
        self.ready.send_modify(|_| {});
    }

    /// Fire an event on this entity's hook bus
    pub(crate) fn emit(&self, event: HookEvent) {
        self.hooks.emit(&event);
    }

    /// Emit `before`, run the primitive, then emit the event built from its
    /// result. A failed primitive suppresses the after event.
    async fn hooked<T, Fut, A>(&self, before: HookEvent, primitive: Fut, after: A) -> LifecacheResult<T>
    where
        Fut: Future<Output = LifecacheResult<T>>,
        A: FnOnce(&T) -> HookEvent,
    {
        let name = before.name();
        self.emit(before);

        match primitive.await {
            Ok(result) => {
                self.emit(after(&result));
                Ok(result)
            }
            Err(e) => {
                debug!("{} on {} failed: {}", name, self.key, e);
                Err(e)
            }
        }
    }

    // Unhooked primitives: the hooked wrappers above call these, never
    // each other.

    async fn fetch_data(&self, force: bool) -> LifecacheResult<Value> {
        if !force {
            if let Some(data) = self.data() {
                return Ok(data);
            }
        }
        let data = self.providers.primary().get_data(&self.key).await?;
        self.state().data = Some(data.clone());
        Ok(data)
    }

    async fn write_data(&self, value: &Value) -> LifecacheResult<()> {
        self.providers.primary().set_data(&self.key, value).await?;
        self.state().data = None;
        Ok(())
    }

    async fn write_child(&self, name: &str, value: &Value) -> LifecacheResult<()> {
        self.providers
            .primary()
            .set_child(&self.key, name, value)
            .await?;
        if let Some(Value::Object(map)) = self.state().data.as_mut() {
            map.insert(name.to_string(), value.clone());
        }
        Ok(())
    }

    async fn create_local(&self, data: &Value) -> LifecacheResult<()> {
        self.providers.primary().create(&self.key, data).await?;
        self.state().data = Some(data.clone());
        Ok(())
    }

    fn local_child(&self, name: &str) -> Option<Value> {
        match &self.state().data {
            Some(Value::Object(map)) => map.get(name).cloned(),
            _ => None,
        }
    }

    fn observe_life(&self, event: &HookEvent) {
        let change = {
            let mut state = self.state();
            if state.released {
                return;
            }
            state.life.bonus(event).map(|by| {
                let from = state.life.life();
                state.life.extend(by);
                (from, by)
            })
        };

        if let Some((from, by)) = change {
            debug!("Extending life of {} from {:.2} by {:.2}", self.key, from, by);
            self.emit(HookEvent::ExtendLife { from, by });
            self.reschedule();
        }
    }

    /// Replace the eviction timer with one firing `life` units from now
    fn reschedule(&self) {
        let delay = self.eviction_delay();
        let generation = {
            let mut state = self.state();
            state.generation += 1;
            state.generation
        };
        let me = self.me.clone();
        let key = self.key.clone();

        let id = self.scheduler.schedule(
            delay,
            Box::pin(async move {
                if let Some(entity) = me.upgrade() {
                    if let Err(e) = entity.expire(generation).await {
                        warn!("Failed to evict {}: {}", key, e);
                    }
                }
            }),
        );

        let previous = {
            let mut state = self.state();
            if state.released || state.generation != generation {
                None
            } else {
                state.expires_at = self.scheduler.now().saturating_add(delay);
                Some(state.timer.replace(id))
            }
        };

        match previous {
            Some(Some(old)) => self.scheduler.cancel(old),
            Some(None) => {}
            None => self.scheduler.cancel(id),
        }
    }

    /// Evict on behalf of the timer armed at `generation`. A timer that fired
    /// while an operation held the op lock is stale once that operation has
    /// rescheduled, and leaves the entity alone.
    async fn expire(&self, generation: u64) -> LifecacheResult<()> {
        let _op = self.op_lock.lock().await;
        {
            let state = self.state();
            if state.released {
                return Ok(());
            }
            if state.generation != generation {
                debug!(
                    "Skipping stale eviction of {} (timer {}, current {})",
                    self.key, generation, state.generation
                );
                return Ok(());
            }
        }

        debug!("Life of {} exhausted, evicting", self.key);
        self.release_locked().await
    }

    fn eviction_delay(&self) -> Duration {
        let state = self.state();
        if state.life.is_exhausted() {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(state.life.life() * self.life_unit.as_secs_f64())
            .map_or(MAX_EVICTION_DELAY, |delay| delay.min(MAX_EVICTION_DELAY))
    }

    fn state(&self) -> MutexGuard<'_, EntityState> {
        mutex_lock(&self.state, "entity.state")
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("ready_state", &self.ready_state())
            .field("life", &self.life())
            .field("options", &self.options)
            .field("providers", &self.providers)
            .finish()
    }
}
