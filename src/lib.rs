//! lifecache - lazily resolved entity cache
//!
//! A [`CacheStore`] maps keys to [`Entity`] instances that are constructed
//! on first access, announce every operation on a hook bus, and are evicted
//! once their usage-weighted life budget runs out.

pub mod audit;
pub mod cli;
pub mod config;
pub mod entity;
pub mod error;
pub mod hooks;
pub(crate) mod lock;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod ui;

pub use entity::{Entity, EntityOptions, ReadyState};
pub use error::{LifecacheError, LifecacheResult};
pub use hooks::{HookBus, HookEvent, HookKind};
pub use resource::{Capability, MemoryResource, ProviderChain, Resource, ResourceFactory};
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler};
pub use store::{CacheStore, StoreEvent, StoreSettings};
