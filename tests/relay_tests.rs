//! Relay behaviour against a channel that records what it is given.

use std::cell::RefCell;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use anyhow::Result;
use wlbridge::transport::{recv_with_fds, send_with_fds, MessageBatcher, Relay, WaylandChannel};
use wlbridge::ProxyError;

/// Everything a [`RecordingChannel`] was asked to send.
#[derive(Default)]
struct Sent {
    batches: Vec<Vec<u8>>,
    fds: Vec<OwnedFd>,
}

struct RecordingChannel {
    max: usize,
    sent: Rc<RefCell<Sent>>,
}

impl WaylandChannel for RecordingChannel {
    fn init(&mut self) -> wlbridge::Result<()> {
        Ok(())
    }

    fn create_context(&mut self) -> wlbridge::Result<UnixStream> {
        Ok(UnixStream::pair()?.0)
    }

    fn max_send_size(&self) -> usize {
        self.max
    }

    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> wlbridge::Result<()> {
        if bytes.len() > self.max {
            return Err(ProxyError::MessageTooLarge {
                len: bytes.len(),
                max: self.max,
            });
        }
        let mut sent = self.sent.borrow_mut();
        sent.batches.push(bytes.to_vec());
        sent.fds.extend(fds);
        Ok(())
    }
}

fn recording_channel(max: usize) -> (Rc<RefCell<dyn WaylandChannel>>, Rc<RefCell<Sent>>) {
    let sent = Rc::new(RefCell::new(Sent::default()));
    let channel = RecordingChannel {
        max,
        sent: sent.clone(),
    };
    (Rc::new(RefCell::new(channel)), sent)
}

/// A wayland message on object 3 with the given opcode and size.
fn message(opcode: u16, size: usize) -> Vec<u8> {
    let mut bytes = vec![opcode as u8; size];
    bytes[..4].copy_from_slice(&3u32.to_ne_bytes());
    let word = ((size as u32) << 16) | opcode as u32;
    bytes[4..8].copy_from_slice(&word.to_ne_bytes());
    bytes
}

#[test]
fn test_outgoing_messages_keep_their_order() -> Result<()> {
    let (channel, sent) = recording_channel(4096);
    let (_host, channel_stream) = UnixStream::pair()?;
    let (mut relay, mut connection_end) = Relay::new(channel, channel_stream)?;

    let mut payload = Vec::new();
    for opcode in 0..5 {
        payload.extend(message(opcode, 8 + 4 * opcode as usize));
    }
    connection_end.write_all(&payload)?;

    relay.forward_outgoing()?;

    let sent = sent.borrow();
    assert_eq!(sent.batches.concat(), payload);
    Ok(())
}

#[test]
fn test_descriptors_reach_the_channel() -> Result<()> {
    let (channel, sent) = recording_channel(4096);
    let (_host, channel_stream) = UnixStream::pair()?;
    let (mut relay, connection_end) = Relay::new(channel, channel_stream)?;

    let (carried, mut carried_peer) = UnixStream::pair()?;
    send_with_fds(&connection_end, &message(1, 12), &[OwnedFd::from(carried)])?;
    relay.forward_outgoing()?;

    let mut sent = sent.borrow_mut();
    assert_eq!(sent.batches.len(), 1);
    assert_eq!(sent.fds.len(), 1);

    let mut received = UnixStream::from(sent.fds.pop().unwrap());
    received.write_all(b"ok")?;
    let mut reply = [0u8; 2];
    carried_peer.read_exact(&mut reply)?;
    assert_eq!(&reply, b"ok");
    Ok(())
}

#[test]
fn test_oversized_message_is_a_capacity_error() -> Result<()> {
    let (channel, sent) = recording_channel(64);
    let (_host, channel_stream) = UnixStream::pair()?;
    let (mut relay, mut connection_end) = Relay::new(channel, channel_stream)?;

    connection_end.write_all(&message(0, 128))?;
    let err = relay.forward_outgoing().unwrap_err();

    assert!(matches!(err, ProxyError::MessageTooLarge { len: 128, max: 64 }));
    assert!(sent.borrow().batches.is_empty());
    Ok(())
}

#[test]
fn test_host_replies_pass_through_unchanged() -> Result<()> {
    let (channel, _sent) = recording_channel(4096);
    let (host, channel_stream) = UnixStream::pair()?;
    let (mut relay, connection_end) = Relay::new(channel, channel_stream)?;

    let (carried, _carried_peer) = UnixStream::pair()?;
    let reply = message(7, 20);
    send_with_fds(&host, &reply, &[OwnedFd::from(carried)])?;
    assert_eq!(relay.forward_incoming()?, reply.len());

    let mut buf = [0u8; 64];
    let mut fds = Vec::new();
    let read = recv_with_fds(&connection_end, &mut buf, &mut fds)?;
    assert_eq!(&buf[..read], reply.as_slice());
    assert_eq!(fds.len(), 1);
    Ok(())
}

#[test]
fn test_full_connection_end_does_not_stall_incoming() -> Result<()> {
    let (channel, _sent) = recording_channel(4096);
    let (host, channel_stream) = UnixStream::pair()?;
    let (mut relay, connection_end) = Relay::new(channel, channel_stream)?;
    host.set_nonblocking(true)?;
    connection_end.set_nonblocking(true)?;

    // The host keeps talking while nothing reads the connection end.
    let chunk = message(3, 4096);
    let mut written = 0;
    for _ in 0..4096 {
        match (&host).write(&chunk) {
            Ok(n) => written += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }
        relay.forward_incoming()?;
        if relay.incoming_backlog() > 0 {
            break;
        }
    }
    assert!(relay.incoming_backlog() > 0);

    // Still returns while the backlog is stuck.
    assert_eq!(relay.forward_incoming()?, 0);
    assert!(!relay.flush_incoming()?);

    let mut received = 0;
    let mut buf = vec![0u8; 65536];
    for _ in 0..100_000 {
        match (&connection_end).read(&mut buf) {
            Ok(n) => received += n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }
        relay.forward_incoming()?;
        if received == written && relay.incoming_backlog() == 0 {
            break;
        }
    }
    assert_eq!(received, written);
    assert!(relay.flush_incoming()?);
    Ok(())
}

#[test]
fn test_batcher_holds_partial_tail() {
    let mut batcher = MessageBatcher::new(4096);
    let first = message(0, 16);
    let second = message(1, 24);

    let mut stream = first.clone();
    stream.extend_from_slice(&second[..10]);
    batcher.push(&stream, Vec::new());

    let (bytes, _) = batcher.next_batch().unwrap().unwrap();
    assert_eq!(bytes, first);
    assert_eq!(batcher.pending_len(), 10);
    assert!(batcher.next_batch().unwrap().is_none());

    batcher.push(&second[10..], Vec::new());
    let (bytes, _) = batcher.next_batch().unwrap().unwrap();
    assert_eq!(bytes, second);
}
