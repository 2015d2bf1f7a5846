//! Byte relay between the host-facing wayland connection and a channel.
//!
//! In relay mode the host connection talks to one end of a local socket
//! pair. The [`Relay`] owns the other end: whatever the connection writes is
//! cut into batches of whole wayland messages and handed to
//! [`WaylandChannel::send`], and whatever arrives on the channel stream is
//! written back into the pair. Neither direction ever blocks the loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use log::{debug, trace};

use super::{recv_with_fds, SendQueue, WaylandChannel, DEFAULT_BUFFER_SIZE, MAX_SEND_FDS};
use crate::context::Context;
use crate::error::{ProxyError, Result};

/// Size of the fixed wayland message header.
pub const HEADER_SIZE: usize = 8;

/// Size announced by the wayland header at the start of `bytes`.
pub fn message_size(bytes: &[u8]) -> Option<usize> {
    let word: [u8; 4] = bytes.get(4..HEADER_SIZE)?.try_into().ok()?;
    Some((u32::from_ne_bytes(word) >> 16) as usize)
}

/// Accumulates outgoing bytes and cuts them into channel-sized batches.
///
/// A batch only ever contains whole messages. Messages are never split, so
/// one that alone exceeds the limit cannot be sent at all.
#[derive(Debug)]
pub struct MessageBatcher {
    pending: Vec<u8>,
    fds: VecDeque<OwnedFd>,
    max: usize,
}

impl MessageBatcher {
    pub fn new(max: usize) -> Self {
        Self {
            pending: Vec::with_capacity(max),
            fds: VecDeque::new(),
            max,
        }
    }

    pub fn push(&mut self, bytes: &[u8], fds: impl IntoIterator<Item = OwnedFd>) {
        self.pending.extend_from_slice(bytes);
        self.fds.extend(fds);
    }

    /// Bytes waiting for the rest of their message or for the next batch.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_fds(&self) -> usize {
        self.fds.len()
    }

    /// Take the next batch of complete messages, if any.
    ///
    /// Descriptors ride along with the first batch after they were pushed,
    /// at most [`MAX_SEND_FDS`] at a time.
    pub fn next_batch(&mut self) -> Result<Option<(Vec<u8>, Vec<OwnedFd>)>> {
        let mut end = 0;
        while let Some(size) = message_size(&self.pending[end..]) {
            if size < HEADER_SIZE || size % 4 != 0 {
                return Err(ProxyError::MalformedMessage { size });
            }
            if size > self.max {
                return Err(ProxyError::MessageTooLarge {
                    len: size,
                    max: self.max,
                });
            }
            if end + size > self.pending.len() || end + size > self.max {
                break;
            }
            end += size;
        }

        if end == 0 {
            return Ok(None);
        }

        let bytes: Vec<u8> = self.pending.drain(..end).collect();
        let count = self.fds.len().min(MAX_SEND_FDS);
        let fds = self.fds.drain(..count).collect();
        Ok(Some((bytes, fds)))
    }
}

/// Moves traffic between the local socket pair and a [`WaylandChannel`].
///
/// Both streams are non-blocking. When one side cannot keep up the relay
/// stops reading from the other and waits for the slow side to become
/// writable again.
pub struct Relay {
    local: UnixStream,
    channel_stream: UnixStream,
    channel: Rc<RefCell<dyn WaylandChannel>>,
    batcher: MessageBatcher,
    incoming: SendQueue,
    buf: Vec<u8>,
    local_closed: bool,
    channel_blocked: bool,
    sources: Option<RelaySources>,
}

/// The relay's event sources.
#[derive(Debug, Clone, Copy)]
enum Source {
    /// Host connection wrote something.
    Outgoing,
    /// Host sent something through the channel.
    Incoming,
    /// The local pair accepts writes again.
    LocalWritable,
    /// The channel accepts writes again.
    ChannelWritable,
}

struct RelaySources {
    handle: LoopHandle<'static, Context>,
    outgoing: RegistrationToken,
    incoming: RegistrationToken,
    local_writable: RegistrationToken,
    channel_writable: RegistrationToken,
}

impl Relay {
    /// Create the relay and return the stream the host connection should use.
    pub fn new(
        channel: Rc<RefCell<dyn WaylandChannel>>,
        channel_stream: UnixStream,
    ) -> Result<(Self, UnixStream)> {
        let (local, connection_end) = UnixStream::pair()?;
        local.set_nonblocking(true)?;
        channel_stream.set_nonblocking(true)?;
        let max = channel.borrow().max_send_size();
        let relay = Self {
            local,
            channel_stream,
            channel,
            batcher: MessageBatcher::new(max),
            incoming: SendQueue::default(),
            buf: vec![0; DEFAULT_BUFFER_SIZE],
            local_closed: false,
            channel_blocked: false,
            sources: None,
        };
        Ok((relay, connection_end))
    }

    /// Read what the host connection wrote and send every complete batch
    /// through the channel. Returns the number of bytes read.
    pub fn forward_outgoing(&mut self) -> Result<usize> {
        let mut fds = Vec::new();
        let read = match recv_with_fds(&self.local, &mut self.buf, &mut fds) {
            Ok(0) => {
                self.local_closed = true;
                return Ok(0);
            }
            Ok(read) => read,
            Err(err) if err.is_would_block() => return Ok(0),
            Err(err) => return Err(err),
        };
        self.batcher.push(&self.buf[..read], fds);

        let mut channel = self.channel.borrow_mut();
        while let Some((bytes, fds)) = self.batcher.next_batch()? {
            trace!("Relaying {} bytes, {} fds to host", bytes.len(), fds.len());
            channel.send(&bytes, fds)?;
        }
        self.channel_blocked = !channel.flush()?;
        Ok(read)
    }

    /// Retry output the channel had to queue. Returns `true` once it caught
    /// up.
    pub fn retry_outgoing(&mut self) -> Result<bool> {
        let flushed = self.channel.borrow_mut().flush()?;
        self.channel_blocked = !flushed;
        Ok(flushed)
    }

    /// Read what the host sent through the channel and hand it to the host
    /// connection. Returns the number of bytes read.
    ///
    /// Bytes the local pair cannot take yet are queued, and nothing more is
    /// read until that queue is drained.
    pub fn forward_incoming(&mut self) -> Result<usize> {
        if !self.incoming.flush(&self.local)? {
            return Ok(0);
        }

        let mut fds = Vec::new();
        let read = match recv_with_fds(&self.channel_stream, &mut self.buf, &mut fds) {
            Ok(0) => return Err(ProxyError::HostDisconnected),
            Ok(read) => read,
            Err(err) if err.is_would_block() => return Ok(0),
            Err(err) => return Err(err),
        };

        self.incoming.push(self.buf[..read].to_vec(), fds);
        self.incoming.flush(&self.local)?;
        trace!("Relayed {} bytes from host", read);
        Ok(read)
    }

    /// Write queued host bytes into the local pair. Returns `true` once the
    /// queue is empty.
    pub fn flush_incoming(&mut self) -> Result<bool> {
        self.incoming.flush(&self.local)
    }

    /// Host bytes waiting for the local pair.
    pub fn incoming_backlog(&self) -> usize {
        self.incoming.len()
    }

    /// Register the relay with the event loop.
    ///
    /// On failure every source registered so far is removed again.
    pub fn insert(self, handle: &LoopHandle<'static, Context>) -> Result<()> {
        let relay = Rc::new(RefCell::new(self));
        let mut tokens = Vec::new();
        match Self::register(&relay, handle, &mut tokens) {
            Ok(sources) => {
                relay.borrow_mut().sources = Some(sources);
                Ok(())
            }
            Err(err) => {
                for token in tokens {
                    handle.remove(token);
                }
                Err(err)
            }
        }
    }

    fn register(
        relay: &Rc<RefCell<Self>>,
        handle: &LoopHandle<'static, Context>,
        tokens: &mut Vec<RegistrationToken>,
    ) -> Result<RelaySources> {
        let (local, channel_stream) = {
            let relay = relay.borrow();
            (relay.local.try_clone()?, relay.channel_stream.try_clone()?)
        };
        let local_writable = local.try_clone()?;
        let channel_writable = channel_stream.try_clone()?;

        let outgoing = relay.clone();
        let outgoing = watch(handle, local, Interest::READ, move || {
            let mut relay = outgoing.borrow_mut();
            relay.forward_outgoing()?;
            if relay.local_closed {
                debug!("Host connection closed its relay end");
                return Ok(PostAction::Remove);
            }
            if relay.channel_blocked {
                relay.enable(Source::ChannelWritable)?;
                return Ok(PostAction::Disable);
            }
            Ok(PostAction::Continue)
        })?;
        tokens.push(outgoing);

        let drain = relay.clone();
        let local_writable = watch(handle, local_writable, Interest::WRITE, move || {
            let mut relay = drain.borrow_mut();
            if !relay.flush_incoming()? {
                return Ok(PostAction::Continue);
            }
            relay.enable(Source::Incoming)?;
            Ok(PostAction::Disable)
        })?;
        tokens.push(local_writable);

        let incoming = relay.clone();
        let incoming = watch(handle, channel_stream, Interest::READ, move || {
            let mut relay = incoming.borrow_mut();
            relay.forward_incoming()?;
            if relay.incoming_backlog() == 0 {
                return Ok(PostAction::Continue);
            }
            trace!("Local pair full, {} bytes queued", relay.incoming_backlog());
            relay.enable(Source::LocalWritable)?;
            Ok(PostAction::Disable)
        })?;
        tokens.push(incoming);

        let retry = relay.clone();
        let channel_writable = watch(handle, channel_writable, Interest::WRITE, move || {
            let mut relay = retry.borrow_mut();
            if !relay.retry_outgoing()? {
                return Ok(PostAction::Continue);
            }
            relay.enable(Source::Outgoing)?;
            Ok(PostAction::Disable)
        })?;
        tokens.push(channel_writable);

        // Write interest only while something is queued.
        for token in [&local_writable, &channel_writable] {
            handle
                .disable(token)
                .map_err(|e| ProxyError::EventLoop(e.to_string()))?;
        }

        Ok(RelaySources {
            handle: handle.clone(),
            outgoing,
            incoming,
            local_writable,
            channel_writable,
        })
    }

    fn enable(&self, source: Source) -> Result<()> {
        let Some(sources) = &self.sources else {
            return Ok(());
        };
        let token = match source {
            Source::Outgoing => &sources.outgoing,
            Source::Incoming => &sources.incoming,
            Source::LocalWritable => &sources.local_writable,
            Source::ChannelWritable => &sources.channel_writable,
        };
        sources
            .handle
            .enable(token)
            .map_err(|e| ProxyError::EventLoop(e.to_string()))
    }
}

/// Run `step` whenever `stream` is ready for `interest`. Errors are
/// recorded on the context.
fn watch<F>(
    handle: &LoopHandle<'static, Context>,
    stream: UnixStream,
    interest: Interest,
    mut step: F,
) -> Result<RegistrationToken>
where
    F: FnMut() -> Result<PostAction> + 'static,
{
    handle
        .insert_source(
            Generic::new(OwnedFd::from(stream), interest, Mode::Level),
            move |_, _, ctx| step().map_err(|err| ctx.fail(err)),
        )
        .map_err(|e| ProxyError::EventLoop(e.error.to_string()))
}
