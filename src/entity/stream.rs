//! Stream handles that fire their "after" hook at end of data

use crate::entity::Entity;
use crate::hooks::HookEvent;
use crate::resource::{ReadStream, WriteStream};
use std::io;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Emits the pending event on the entity, at most once
fn fire(entity: &Weak<Entity>, after: &mut Option<HookEvent>) {
    if let Some(event) = after.take() {
        if let Some(entity) = entity.upgrade() {
            entity.emit(event);
        }
    }
}

/// Pull handle returned by [`Entity::get_stream`]; emits `afterGetStream`
/// when the underlying stream reports end of data
pub struct HookedReader {
    inner: ReadStream,
    entity: Weak<Entity>,
    after: Option<HookEvent>,
}

impl HookedReader {
    pub(crate) fn new(inner: ReadStream, entity: Weak<Entity>, after: HookEvent) -> Self {
        Self {
            inner,
            entity,
            after: Some(after),
        }
    }
}

impl AsyncRead for HookedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let filled = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);

        // A successful read that adds nothing to a non-full buffer is EOF
        if matches!(poll, Poll::Ready(Ok(()))) && buf.filled().len() == filled && buf.remaining() > 0
        {
            let this = &mut *self;
            fire(&this.entity, &mut this.after);
        }

        poll
    }
}

/// Push handle returned by [`Entity::set_stream`]; emits `afterSetStream`
/// once the writer is shut down
pub struct HookedWriter {
    inner: WriteStream,
    entity: Weak<Entity>,
    after: Option<HookEvent>,
}

impl HookedWriter {
    pub(crate) fn new(inner: WriteStream, entity: Weak<Entity>, after: HookEvent) -> Self {
        Self {
            inner,
            entity,
            after: Some(after),
        }
    }
}

impl AsyncWrite for HookedWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = Pin::new(&mut self.inner).poll_shutdown(cx);
        if matches!(poll, Poll::Ready(Ok(()))) {
            let this = &mut *self;
            fire(&this.entity, &mut this.after);
        }
        poll
    }
}
