//! Guest-facing server plumbing: client data and the listening socket.

use std::ffi::OsString;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use log::{info, warn};
use wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use wayland_server::ListeningSocket;

use crate::context::Context;
use crate::error::{ProxyError, Result};

/// Client data attached to every guest connection.
#[derive(Debug, Default)]
pub struct GuestClientData;

impl ClientData for GuestClientData {
    fn initialized(&self, client_id: ClientId) {
        info!("👋 Guest client connected: {:?}", client_id);
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        if let DisconnectReason::ProtocolError(err) = reason {
            warn!("Guest client {:?} killed: {}", client_id, err);
        } else {
            info!("Guest client {:?} disconnected", client_id);
        }
    }
}

/// Bind the guest listening socket. Without a name the first free
/// `wayland-N` in `$XDG_RUNTIME_DIR` is used.
pub fn bind_socket(name: Option<&str>) -> Result<ListeningSocket> {
    let socket = match name {
        Some(name) => ListeningSocket::bind(name),
        None => ListeningSocket::bind_auto("wayland", 1..33),
    }?;

    info!(
        "✅ Guest socket: {}",
        socket
            .socket_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    Ok(socket)
}

/// Accept guest connections from `socket` on the event loop. Returns the
/// socket name guests should use as `WAYLAND_DISPLAY`.
pub fn insert_socket(
    handle: &LoopHandle<'static, Context>,
    socket: ListeningSocket,
) -> Result<OsString> {
    let name = socket
        .socket_name()
        .map(|name| name.to_os_string())
        .ok_or(ProxyError::NotInitialized("guest socket name"))?;

    handle
        .insert_source(
            Generic::new(socket, Interest::READ, Mode::Level),
            |_, socket, ctx| {
                while let Some(stream) = socket.accept()? {
                    if let Err(err) = ctx.install_guest_display_implementation(stream) {
                        warn!("Failed to attach guest client: {}", err);
                    }
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|e| ProxyError::EventLoop(e.error.to_string()))?;

    Ok(name)
}
