//! # wlbridge
//!
//! A Wayland proxy that lets applications inside a virtual machine render
//! through the host's compositor. To guest applications it is an ordinary
//! Wayland server, to the host compositor an ordinary Wayland client.
//!
//! ## Architecture
//!
//! - `context`: process-wide state, registry handling and host output routing
//! - `registry`: allow-list of mirrored interfaces and the accepted host globals
//! - `output`: per-output state mirrored from host to guest
//! - `mirror`: request/event forwarding for every mirrored interface
//! - `transport`: the channel to the host, plus the byte relay for VM boundaries
//! - `server`: guest client data and listening socket
//! - `protocol`: generated aura-shell bindings
//! - `config`: configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use calloop::EventLoop;
//! use wlbridge::transport::{SocketChannel, WaylandChannel};
//! use wlbridge::{Context, ProxyConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ProxyConfig::default();
//!     let mut event_loop = EventLoop::try_new()?;
//!     let mut ctx = Context::new(&config);
//!
//!     ctx.init_guest_display(&event_loop.handle())?;
//!     let socket = wlbridge::server::bind_socket(None)?;
//!     wlbridge::server::insert_socket(&event_loop.handle(), socket)?;
//!
//!     let channel: Rc<RefCell<dyn WaylandChannel>> =
//!         Rc::new(RefCell::new(SocketChannel::for_display("wayland-0")?));
//!     ctx.init_transport(&event_loop.handle(), channel, true)?;
//!
//!     event_loop.run(None, &mut ctx, |_| {})?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod mirror;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for easy access
pub use config::ProxyConfig;
pub use context::{Context, HostEvent};
pub use error::{ProxyError, Result};
pub use output::{HostOutput, OutputId};
pub use registry::{Global, MirroredInterface};
pub use transport::WaylandChannel;

/// Crate version, as reported by `wlbridge --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
