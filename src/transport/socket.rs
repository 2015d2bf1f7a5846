//! Channel over a local unix socket.
//!
//! Used when the host compositor socket is reachable from the proxy, and as
//! the reference implementation of [`WaylandChannel`].

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::{SendQueue, WaylandChannel, DEFAULT_BUFFER_SIZE};
use crate::error::{ProxyError, Result};

pub struct SocketChannel {
    path: PathBuf,
    max_send_size: usize,
    stream: Option<UnixStream>,
    queue: SendQueue,
}

impl SocketChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_send_size: DEFAULT_BUFFER_SIZE,
            stream: None,
            queue: SendQueue::default(),
        }
    }

    /// Resolve a display the way wayland clients do: absolute paths are
    /// used as is, names are looked up in `$XDG_RUNTIME_DIR`.
    pub fn for_display(display: &str) -> Result<Self> {
        let path = Path::new(display);
        if path.is_absolute() {
            return Ok(Self::new(path));
        }

        let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR").ok_or_else(|| {
            ProxyError::ChannelInit("XDG_RUNTIME_DIR is not set".to_string())
        })?;
        Ok(Self::new(PathBuf::from(runtime_dir).join(display)))
    }

    pub fn with_max_send_size(mut self, max_send_size: usize) -> Self {
        self.max_send_size = max_send_size;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WaylandChannel for SocketChannel {
    fn init(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Err(ProxyError::ChannelInit(format!(
                "host socket {} does not exist",
                self.path.display()
            )));
        }
        info!("🔌 Host socket: {}", self.path.display());
        Ok(())
    }

    fn create_context(&mut self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.path).map_err(|e| {
            ProxyError::ChannelInit(format!("connect to {}: {}", self.path.display(), e))
        })?;
        stream.set_nonblocking(true)?;
        self.stream = Some(stream.try_clone()?);
        debug!("Connected to host socket {}", self.path.display());
        Ok(stream)
    }

    fn max_send_size(&self) -> usize {
        self.max_send_size
    }

    fn send(&mut self, bytes: &[u8], fds: Vec<OwnedFd>) -> Result<()> {
        if bytes.len() > self.max_send_size {
            return Err(ProxyError::MessageTooLarge {
                len: bytes.len(),
                max: self.max_send_size,
            });
        }
        if self.stream.is_none() {
            return Err(ProxyError::NotInitialized("socket channel"));
        }

        self.queue.push(bytes.to_vec(), fds);
        if !self.flush()? {
            debug!("Host socket full, {} bytes queued", self.queue.len());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<bool> {
        match &self.stream {
            Some(stream) => self.queue.flush(stream),
            None => Ok(self.queue.is_empty()),
        }
    }
}
