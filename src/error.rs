//! Error taxonomy for the proxy
//!
//! Every failure the core can detect is a [`ProxyError`]. They fall into
//! four groups:
//!
//! - **Startup**: the transport channel, the host connection or the guest
//!   display could not be set up. Startup aborts.
//! - **Protocol sequence**: the host addressed an object the proxy does not
//!   know (never bound, or already removed), or sent a value that cannot be
//!   translated. Continuing would let guest and host state diverge.
//! - **Capacity**: a message does not fit through the transport channel.
//!   The core never fragments messages on its own.
//! - **Transport**: the channel or the host connection failed while running.
//!
//! None of these are retried. The binary exits and restart is left to
//! whatever supervises the process.

use std::io;

use thiserror::Error;

use crate::output::OutputId;

/// Errors raised by the proxy core.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The transport channel refused to initialize.
    #[error("transport channel initialization failed: {0}")]
    ChannelInit(String),

    /// The transport channel failed to deliver a message.
    #[error("transport channel send failed: {0}")]
    ChannelSend(#[source] io::Error),

    /// A single message is larger than the channel can carry in one send.
    #[error("message of {len} bytes exceeds the channel limit of {max} bytes")]
    MessageTooLarge { len: usize, max: usize },

    /// More descriptors were queued for one send than the channel accepts.
    #[error("{count} descriptors exceed the channel limit of {max}")]
    TooManyFds { count: usize, max: usize },

    /// A wire header announced an impossible message size.
    #[error("malformed wayland message header (size {size})")]
    MalformedMessage { size: usize },

    /// The host end of the channel closed.
    #[error("host connection closed")]
    HostDisconnected,

    /// Connecting to the host compositor failed.
    #[error("failed to connect to host compositor: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    /// The guest-facing display could not be created.
    #[error("failed to create guest display: {0}")]
    Display(#[from] wayland_server::backend::InitError),

    /// The guest listening socket could not be bound.
    #[error("failed to bind guest socket: {0}")]
    Bind(#[from] wayland_server::BindError),

    /// A source could not be inserted into the event loop.
    #[error("event loop registration failed: {0}")]
    EventLoop(String),

    /// An operation needs a connection that has not been set up yet.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// The host sent an event for an output that is not bound.
    #[error("{interface} event for output {id} which is not bound")]
    UnknownOutput {
        id: OutputId,
        interface: &'static str,
    },

    /// The host sent an enum value the guest protocol cannot express.
    #[error("host sent invalid {name} value {value} on {interface}")]
    InvalidEnum {
        interface: &'static str,
        name: &'static str,
        value: u32,
    },

    /// The reserved id range for proxy-allocated objects is used up.
    #[error("proxy object id range exhausted")]
    IdsExhausted,

    /// The host-facing wayland connection reported an error.
    #[error("host wayland connection error: {0}")]
    Wayland(#[from] wayland_client::backend::WaylandError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Whether this error is part of the protocol-sequence group.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            ProxyError::UnknownOutput { .. }
                | ProxyError::InvalidEnum { .. }
                | ProxyError::MalformedMessage { .. }
        )
    }

    /// Whether a non-blocking socket refused the operation for now.
    pub fn is_would_block(&self) -> bool {
        match self {
            ProxyError::ChannelSend(err) | ProxyError::Io(err) => {
                err.kind() == io::ErrorKind::WouldBlock
            }
            _ => false,
        }
    }

    /// Whether this error happened while setting the proxy up.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            ProxyError::ChannelInit(_)
                | ProxyError::Connect(_)
                | ProxyError::Display(_)
                | ProxyError::Bind(_)
                | ProxyError::EventLoop(_)
        )
    }
}

pub type Result<T, E = ProxyError> = std::result::Result<T, E>;
