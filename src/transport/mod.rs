//! Transport channels between the proxy and the host compositor.
//!
//! When guest and host share a kernel the host connection is an ordinary
//! unix socket. Across a VM boundary it is whatever the hypervisor offers,
//! so the proxy only relies on the small [`WaylandChannel`] contract and
//! moves bytes through it with the [`relay`].

pub mod relay;
pub mod socket;

use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;

use rustix::io::{IoSlice, IoSliceMut};
use rustix::net::{
    RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags,
};

use crate::error::{ProxyError, Result};

pub use relay::{MessageBatcher, Relay};
pub use socket::SocketChannel;

/// Buffer size used for a single channel read or send.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Most descriptors carried by one send, matching libwayland's limit.
pub const MAX_SEND_FDS: usize = 28;

/// Moves serialized wayland traffic and descriptors to the host.
///
/// Implementations report failures synchronously and never reconnect. They
/// must not block: output the host is not ready for is queued and retried
/// from [`flush`](Self::flush) once the context stream is writable.
#[cfg_attr(test, mockall::automock)]
pub trait WaylandChannel {
    /// Prepare the channel. Called exactly once, before anything else.
    fn init(&mut self) -> Result<()>;

    /// Open a host connection and return the local end of it.
    ///
    /// In direct mode the stream carries the wayland protocol itself. In
    /// relay mode the proxy reads the host's replies from it.
    fn create_context(&mut self) -> Result<UnixStream>;

    /// Largest number of bytes [`send`](Self::send) accepts in one call.
    fn max_send_size(&self) -> usize;

    /// Deliver whole wayland messages with the descriptors they carry.
    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> Result<()>;

    /// Retry output an earlier [`send`](Self::send) had to queue. Returns
    /// `true` once nothing is left.
    fn flush(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// One queued write, possibly partially sent.
#[derive(Debug)]
struct PendingWrite {
    bytes: Vec<u8>,
    fds: Vec<OwnedFd>,
    offset: usize,
}

/// Bytes and descriptors waiting for a non-blocking stream to take them.
#[derive(Debug, Default)]
pub struct SendQueue {
    pending: VecDeque<PendingWrite>,
}

impl SendQueue {
    pub fn push(&mut self, bytes: Vec<u8>, fds: Vec<OwnedFd>) {
        if !bytes.is_empty() {
            self.pending.push_back(PendingWrite {
                bytes,
                fds,
                offset: 0,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Bytes not written yet.
    pub fn len(&self) -> usize {
        self.pending
            .iter()
            .map(|write| write.bytes.len() - write.offset)
            .sum()
    }

    /// Write as much as `stream` accepts without blocking. Returns `true`
    /// once the queue is empty.
    pub fn flush(&mut self, stream: &UnixStream) -> Result<bool> {
        while let Some(front) = self.pending.front_mut() {
            match send_with_fds(stream, &front.bytes[front.offset..], &front.fds) {
                Ok(0) => return Err(ProxyError::HostDisconnected),
                Ok(sent) => {
                    // Descriptors leave with the first bytes of their write.
                    front.fds.clear();
                    front.offset += sent;
                    if front.offset == front.bytes.len() {
                        self.pending.pop_front();
                    }
                }
                Err(err) if err.is_would_block() => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }
}

/// Write `bytes` and `fds` to a stream in one `sendmsg` call.
pub fn send_with_fds(stream: &UnixStream, bytes: &[u8], fds: &[OwnedFd]) -> Result<usize> {
    if fds.len() > MAX_SEND_FDS {
        return Err(ProxyError::TooManyFds {
            count: fds.len(),
            max: MAX_SEND_FDS,
        });
    }

    let borrowed: Vec<BorrowedFd<'_>> = fds.iter().map(|fd| fd.as_fd()).collect();
    let mut space = [0u8; rustix::cmsg_space!(ScmRights(MAX_SEND_FDS))];
    let mut control = SendAncillaryBuffer::new(&mut space);
    if !borrowed.is_empty() && !control.push(SendAncillaryMessage::ScmRights(&borrowed)) {
        return Err(ProxyError::TooManyFds {
            count: fds.len(),
            max: MAX_SEND_FDS,
        });
    }

    let sent = rustix::net::sendmsg(
        stream,
        &[IoSlice::new(bytes)],
        &mut control,
        SendFlags::NOSIGNAL,
    )
    .map_err(|errno| ProxyError::ChannelSend(errno.into()))?;
    Ok(sent)
}

/// Read once from a stream, appending data to `buf` and received
/// descriptors to `fds`. Returns the number of bytes read; zero means the
/// peer hung up.
pub fn recv_with_fds(stream: &UnixStream, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> Result<usize> {
    let mut space = [0u8; rustix::cmsg_space!(ScmRights(MAX_SEND_FDS))];
    let mut control = RecvAncillaryBuffer::new(&mut space);

    let msg = rustix::net::recvmsg(
        stream,
        &mut [IoSliceMut::new(buf)],
        &mut control,
        RecvFlags::CMSG_CLOEXEC,
    )
    .map_err(std::io::Error::from)?;

    for message in control.drain() {
        if let RecvAncillaryMessage::ScmRights(received) = message {
            fds.extend(received);
        }
    }

    Ok(msg.bytes)
}
