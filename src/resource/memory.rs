//! In-memory resource backend
//!
//! Keeps values in a shared map. Useful as a reference resource for the CLI
//! simulation and for tests; it supplies every primitive except `execute`.

use crate::error::{LifecacheError, LifecacheResult};
use crate::lock::{rw_read, rw_write};
use crate::resource::{Capability, ReadStream, Resource, StreamOptions, WriteStream};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

type Values = Arc<RwLock<BTreeMap<String, Value>>>;

/// Map-backed resource shared by every key of a store
#[derive(Clone, Default)]
pub struct MemoryResource {
    values: Values,
}

impl MemoryResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend with initial values
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let map = values.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            values: Arc::new(RwLock::new(map)),
        }
    }

    /// Insert a value directly, bypassing any cache
    pub fn insert(&self, key: impl Into<String>, value: Value) {
        rw_write(&self.values, "memory.insert").insert(key.into(), value);
    }

    /// Read a value directly, bypassing any cache
    pub fn value(&self, key: &str) -> Option<Value> {
        rw_read(&self.values, "memory.value").get(key).cloned()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.values, "memory.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, capability: Capability, key: &str) -> LifecacheResult<Value> {
        self.value(key)
            .ok_or_else(|| LifecacheError::operation(capability, key, "no such key"))
    }
}

/// Raw bytes of a value as exposed through streams
fn value_bytes(value: &Value) -> LifecacheResult<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other)?),
    }
}

#[async_trait]
impl Resource for MemoryResource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_data(&self, key: &str) -> LifecacheResult<Value> {
        self.lookup(Capability::GetData, key)
    }

    async fn set_data(&self, key: &str, value: &Value) -> LifecacheResult<()> {
        self.insert(key, value.clone());
        Ok(())
    }

    async fn get_child(&self, key: &str, name: &str) -> LifecacheResult<Value> {
        match self.lookup(Capability::GetChild, key)? {
            Value::Object(map) => map.get(name).cloned().ok_or_else(|| {
                LifecacheError::operation(Capability::GetChild, key, format!("no child {name}"))
            }),
            _ => Err(LifecacheError::operation(
                Capability::GetChild,
                key,
                "value is not a namespace",
            )),
        }
    }

    async fn set_child(&self, key: &str, name: &str, value: &Value) -> LifecacheResult<()> {
        let mut values = rw_write(&self.values, "memory.set_child");
        let entry = values
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        match entry {
            Value::Object(map) => {
                map.insert(name.to_string(), value.clone());
                Ok(())
            }
            _ => Err(LifecacheError::operation(
                Capability::SetChild,
                key,
                "value is not a namespace",
            )),
        }
    }

    async fn get_stream(&self, key: &str, options: &StreamOptions) -> LifecacheResult<ReadStream> {
        let bytes = value_bytes(&self.lookup(Capability::GetStream, key)?)?;
        let len = bytes.len() as u64;
        let start = options.start.min(len) as usize;
        let end = options.end.unwrap_or(len).clamp(start as u64, len) as usize;

        Ok(Box::new(io::Cursor::new(bytes[start..end].to_vec())))
    }

    async fn set_stream(&self, key: &str, options: &StreamOptions) -> LifecacheResult<WriteStream> {
        // Bytes before `start` are kept from the current value
        let mut prefix = match self.value(key) {
            Some(value) => value_bytes(&value)?,
            None => Vec::new(),
        };
        prefix.truncate(options.start as usize);

        Ok(Box::new(MemoryWriter {
            key: key.to_string(),
            buf: prefix,
            values: Arc::clone(&self.values),
        }))
    }

    async fn create(&self, key: &str, data: &Value) -> LifecacheResult<()> {
        let mut values = rw_write(&self.values, "memory.create");
        if values.contains_key(key) {
            return Err(LifecacheError::operation(
                Capability::Create,
                key,
                "already exists",
            ));
        }
        values.insert(key.to_string(), data.clone());
        Ok(())
    }

    async fn destroy(&self, key: &str) -> LifecacheResult<()> {
        rw_write(&self.values, "memory.destroy")
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| LifecacheError::operation(Capability::Destroy, key, "no such key"))
    }

    async fn move_to(&self, key: &str, dest: &str) -> LifecacheResult<()> {
        let mut values = rw_write(&self.values, "memory.move");
        if values.contains_key(dest) {
            return Err(LifecacheError::operation(
                Capability::Move,
                key,
                format!("destination {dest} already exists"),
            ));
        }
        let value = values
            .remove(key)
            .ok_or_else(|| LifecacheError::operation(Capability::Move, key, "no such key"))?;
        values.insert(dest.to_string(), value);
        Ok(())
    }

    async fn check(&self, key: &str) -> LifecacheResult<()> {
        self.lookup(Capability::Check, key).map(|_| ())
    }

    async fn scan(
        &self,
        key: &str,
        visit: &mut (dyn for<'n, 'v> FnMut(&'n str, &'v Value) + Send),
    ) -> LifecacheResult<usize> {
        match self.lookup(Capability::Scan, key)? {
            Value::Object(map) => {
                for (name, child) in &map {
                    visit(name, child);
                }
                Ok(map.len())
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    visit(&i.to_string(), child);
                }
                Ok(items.len())
            }
            scalar => {
                visit(key, &scalar);
                Ok(1)
            }
        }
    }
}

/// Buffers written bytes and commits them as a string value on shutdown
struct MemoryWriter {
    key: String,
    buf: Vec<u8>,
    values: Values,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        rw_write(&self.values, "memory.commit").insert(self.key.clone(), Value::String(text));
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn data_and_children() {
        let mem = MemoryResource::new();
        mem.set_data("a", &json!("hello")).await.unwrap();
        assert_eq!(mem.get_data("a").await.unwrap(), json!("hello"));

        mem.set_child("dir", "x", &json!(1)).await.unwrap();
        assert_eq!(mem.get_child("dir", "x").await.unwrap(), json!(1));
        assert!(mem.get_child("a", "x").await.is_err());
    }

    #[tokio::test]
    async fn check_fails_for_missing_key() {
        let mem = MemoryResource::new();
        let err = mem.check("missing").await.unwrap_err();
        assert!(matches!(
            err,
            LifecacheError::OperationFailed {
                capability: Capability::Check,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn streams_read_ranges_and_commit_writes() {
        let mem = MemoryResource::with_values([("a", json!("abcdef"))]);

        let mut reader = mem
            .get_stream(
                "a",
                &StreamOptions {
                    start: 1,
                    end: Some(4),
                },
            )
            .await
            .unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "bcd");

        let mut writer = mem
            .set_stream("a", &StreamOptions { start: 2, end: None })
            .await
            .unwrap();
        writer.write_all(b"XY").await.unwrap();
        writer.shutdown().await.unwrap();
        assert_eq!(mem.value("a"), Some(json!("abXY")));
    }

    #[tokio::test]
    async fn create_destroy_and_move() {
        let mem = MemoryResource::new();
        mem.create("a", &json!({"k": "v"})).await.unwrap();
        assert!(mem.create("a", &json!(null)).await.is_err());

        mem.move_to("a", "b").await.unwrap();
        assert!(mem.value("a").is_none());
        assert_eq!(mem.value("b"), Some(json!({"k": "v"})));

        mem.destroy("b").await.unwrap();
        assert!(mem.is_empty());
        assert!(mem.destroy("b").await.is_err());
    }

    #[tokio::test]
    async fn scan_visits_children() {
        let mem = MemoryResource::with_values([("dir", json!({"x": 1, "y": 2}))]);
        let mut seen = Vec::new();
        let count = mem
            .scan("dir", &mut |name: &str, _: &Value| seen.push(name.to_string()))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(seen, vec!["x", "y"]);
    }
}
