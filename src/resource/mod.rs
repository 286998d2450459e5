//! Resource capability contract
//!
//! A concrete resource type (files, records, remote objects) plugs into the
//! cache by implementing [`Resource`]. Every primitive has a default that
//! fails with `NotImplemented`, except `release`, so a resource only supplies
//! the capabilities it actually has.

pub mod memory;

pub use memory::MemoryResource;

use crate::error::{LifecacheError, LifecacheResult};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Pull side of a byte stream handed out by a resource
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Push side of a byte stream handed out by a resource
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Primitive capabilities a resource may supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    GetData,
    SetData,
    GetChild,
    SetChild,
    GetStream,
    SetStream,
    Create,
    Destroy,
    Move,
    Check,
    Scan,
    Execute,
    Release,
}

impl Capability {
    /// The twelve primitives that fail by default
    pub const REQUIRED: [Capability; 12] = [
        Capability::GetData,
        Capability::SetData,
        Capability::GetChild,
        Capability::SetChild,
        Capability::GetStream,
        Capability::SetStream,
        Capability::Create,
        Capability::Destroy,
        Capability::Move,
        Capability::Check,
        Capability::Scan,
        Capability::Execute,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Capability::GetData => "getData",
            Capability::SetData => "setData",
            Capability::GetChild => "getChild",
            Capability::SetChild => "setChild",
            Capability::GetStream => "getStream",
            Capability::SetStream => "setStream",
            Capability::Create => "create",
            Capability::Destroy => "destroy",
            Capability::Move => "move",
            Capability::Check => "check",
            Capability::Scan => "scan",
            Capability::Execute => "execute",
            Capability::Release => "release",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte range requested from a stream primitive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// First byte offset
    pub start: u64,
    /// Exclusive end offset, `None` for end of data
    pub end: Option<u64>,
}

/// Primitive capability surface of a cached resource
///
/// Implementations never see hooks or life budgets; the entity wraps each
/// call. Every method receives the entity key it is acting for.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Human-readable resource name for diagnostics
    fn name(&self) -> &'static str {
        "resource"
    }

    async fn get_data(&self, _key: &str) -> LifecacheResult<Value> {
        Err(LifecacheError::not_implemented(Capability::GetData))
    }

    async fn set_data(&self, _key: &str, _value: &Value) -> LifecacheResult<()> {
        Err(LifecacheError::not_implemented(Capability::SetData))
    }

    async fn get_child(&self, _key: &str, _name: &str) -> LifecacheResult<Value> {
        Err(LifecacheError::not_implemented(Capability::GetChild))
    }

    async fn set_child(&self, _key: &str, _name: &str, _value: &Value) -> LifecacheResult<()> {
        Err(LifecacheError::not_implemented(Capability::SetChild))
    }

    async fn get_stream(&self, _key: &str, _options: &StreamOptions) -> LifecacheResult<ReadStream> {
        Err(LifecacheError::not_implemented(Capability::GetStream))
    }

    async fn set_stream(
        &self,
        _key: &str,
        _options: &StreamOptions,
    ) -> LifecacheResult<WriteStream> {
        Err(LifecacheError::not_implemented(Capability::SetStream))
    }

    async fn create(&self, _key: &str, _data: &Value) -> LifecacheResult<()> {
        Err(LifecacheError::not_implemented(Capability::Create))
    }

    async fn destroy(&self, _key: &str) -> LifecacheResult<()> {
        Err(LifecacheError::not_implemented(Capability::Destroy))
    }

    async fn move_to(&self, _key: &str, _dest: &str) -> LifecacheResult<()> {
        Err(LifecacheError::not_implemented(Capability::Move))
    }

    /// Readiness check run once when the entity is constructed
    async fn check(&self, _key: &str) -> LifecacheResult<()> {
        Err(LifecacheError::not_implemented(Capability::Check))
    }

    /// Visit every child of the resource, returning how many were visited
    async fn scan(
        &self,
        _key: &str,
        _visit: &mut (dyn for<'n, 'v> FnMut(&'n str, &'v Value) + Send),
    ) -> LifecacheResult<usize> {
        Err(LifecacheError::not_implemented(Capability::Scan))
    }

    async fn execute(&self, _key: &str, _context: &Value) -> LifecacheResult<Value> {
        Err(LifecacheError::not_implemented(Capability::Execute))
    }

    /// Backend cleanup when the entity leaves the cache.
    ///
    /// The entity removes itself from the store regardless of what this does.
    async fn release(&self, _key: &str) -> LifecacheResult<()> {
        Ok(())
    }
}

/// Ordered list of capability providers backing one entity
///
/// The primary provider serves every primitive. `execute` additionally
/// consults the fallbacks in priority order when a provider rejects.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn Resource>>,
}

impl ProviderChain {
    pub fn new(primary: Arc<dyn Resource>) -> Self {
        Self {
            providers: vec![primary],
        }
    }

    /// Append a lower-priority provider
    pub fn with_fallback(mut self, provider: Arc<dyn Resource>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn primary(&self) -> &dyn Resource {
        self.providers[0].as_ref()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run `execute` on each provider until one succeeds.
    ///
    /// When every provider fails, the first real failure is returned; if all
    /// of them merely lack the capability the result is `NotImplemented`.
    pub async fn execute(&self, key: &str, context: &Value) -> LifecacheResult<Value> {
        let mut first_failure: Option<LifecacheError> = None;

        for provider in &self.providers {
            match provider.execute(key, context).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    debug!("{} could not execute {}: {}", provider.name(), key, e);
                    match &first_failure {
                        Some(prev) if !prev.is_not_implemented() => {}
                        Some(_) if e.is_not_implemented() => {}
                        _ => first_failure = Some(e),
                    }
                }
            }
        }

        Err(first_failure.unwrap_or_else(|| LifecacheError::not_implemented(Capability::Execute)))
    }
}

impl fmt::Debug for ProviderChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|p| p.name()))
            .finish()
    }
}

/// Builds the providers of a new entity on a cache miss
pub trait ResourceFactory: Send + Sync {
    fn build(&self, key: &str) -> ProviderChain;
}

impl<F> ResourceFactory for F
where
    F: Fn(&str) -> ProviderChain + Send + Sync,
{
    fn build(&self, key: &str) -> ProviderChain {
        self(key)
    }
}

/// Factory handing every key the same shared provider chain
pub struct SharedFactory {
    chain: ProviderChain,
}

impl SharedFactory {
    pub fn new(chain: ProviderChain) -> Self {
        Self { chain }
    }
}

impl ResourceFactory for SharedFactory {
    fn build(&self, _key: &str) -> ProviderChain {
        self.chain.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Bare;

    #[async_trait]
    impl Resource for Bare {}

    struct Failing;

    #[async_trait]
    impl Resource for Failing {
        async fn execute(&self, key: &str, _context: &Value) -> LifecacheResult<Value> {
            Err(LifecacheError::operation(Capability::Execute, key, "boom"))
        }
    }

    struct Echo;

    #[async_trait]
    impl Resource for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(&self, _key: &str, context: &Value) -> LifecacheResult<Value> {
            Ok(context.clone())
        }
    }

    #[tokio::test]
    async fn every_primitive_defaults_to_not_implemented() {
        let r = Bare;
        let opts = StreamOptions::default();
        let v = json!(1);
        let mut visit = |_: &str, _: &Value| {};

        let results: Vec<(Capability, Option<LifecacheError>)> = vec![
            (Capability::GetData, r.get_data("k").await.err()),
            (Capability::SetData, r.set_data("k", &v).await.err()),
            (Capability::GetChild, r.get_child("k", "c").await.err()),
            (Capability::SetChild, r.set_child("k", "c", &v).await.err()),
            (Capability::GetStream, r.get_stream("k", &opts).await.err()),
            (Capability::SetStream, r.set_stream("k", &opts).await.err()),
            (Capability::Create, r.create("k", &v).await.err()),
            (Capability::Destroy, r.destroy("k").await.err()),
            (Capability::Move, r.move_to("k", "j").await.err()),
            (Capability::Check, r.check("k").await.err()),
            (Capability::Scan, r.scan("k", &mut visit).await.err()),
            (Capability::Execute, r.execute("k", &v).await.err()),
        ];

        assert_eq!(results.len(), Capability::REQUIRED.len());
        for (capability, err) in results {
            match err {
                Some(LifecacheError::NotImplemented { capability: c }) => assert_eq!(c, capability),
                other => panic!("expected NotImplemented for {capability}, got {other:?}"),
            }
        }
        assert!(r.release("k").await.is_ok());
    }

    #[tokio::test]
    async fn execute_falls_back_in_priority_order() {
        let chain = ProviderChain::new(Arc::new(Bare))
            .with_fallback(Arc::new(Failing))
            .with_fallback(Arc::new(Echo));
        let out = chain.execute("k", &json!({"x": 1})).await.unwrap();
        assert_eq!(out, json!({"x": 1}));
    }

    #[tokio::test]
    async fn execute_reports_first_real_failure() {
        let chain = ProviderChain::new(Arc::new(Bare)).with_fallback(Arc::new(Failing));
        let err = chain.execute("k", &json!(null)).await.unwrap_err();
        assert!(matches!(err, LifecacheError::OperationFailed { .. }));

        let chain = ProviderChain::new(Arc::new(Bare));
        let err = chain.execute("k", &json!(null)).await.unwrap_err();
        assert!(err.is_not_implemented());
    }

    #[test]
    fn closures_are_factories() {
        let factory = |_: &str| ProviderChain::new(Arc::new(Echo));
        let chain = factory.build("k");
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.primary().name(), "echo");
    }
}
