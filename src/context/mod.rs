//! Process-wide proxy state
//!
//! [`Context`] is the dispatch state of both wayland-rs queues: the guest
//! facing [`Display`] and the host facing [`Connection`]. Every handler gets
//! it by `&mut`, so all mirrored state lives here and nowhere else.
//!
//! # Startup
//!
//! ```no_run
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use calloop::EventLoop;
//! use wlbridge::transport::{SocketChannel, WaylandChannel};
//! use wlbridge::Context;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut event_loop: EventLoop<'static, Context> = EventLoop::try_new()?;
//! let mut ctx = Context::default();
//! ctx.init_guest_display(&event_loop.handle())?;
//!
//! let channel: Rc<RefCell<dyn WaylandChannel>> =
//!     Rc::new(RefCell::new(SocketChannel::for_display("wayland-0")?));
//! ctx.init_transport(&event_loop.handle(), channel, true)?;
//!
//! loop {
//!     event_loop.dispatch(None, &mut ctx)?;
//! }
//! # }
//! ```

use std::cell::RefCell;
use std::io;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::Arc;

use calloop::generic::Generic;
use calloop::{Interest, LoopHandle, Mode, PostAction};
use calloop_wayland_source::WaylandSource;
use log::{debug, error, info, trace, warn};
use wayland_client::backend::WaylandError;
use wayland_client::protocol::{
    wl_compositor as host_wl_compositor, wl_output as host_wl_output, wl_registry,
    wl_subcompositor as host_wl_subcompositor,
};
use wayland_client::{Connection, DispatchError, Proxy, QueueHandle};
use wayland_protocols::xdg::shell::client::xdg_wm_base as host_xdg_wm_base;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::{
    wl_compositor as guest_wl_compositor, wl_output as guest_wl_output,
    wl_subcompositor as guest_wl_subcompositor,
};
use wayland_server::{Client, DataInit, Display, DisplayHandle, New};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::output::{HostOutput, HostOutputs, OutputId, OutputIdAllocator};
use crate::protocol::aura_shell::{client as aura_client, server as aura_server};
use crate::registry::{Global, GlobalRegistry, MirroredInterface};
use crate::server::GuestClientData;
use crate::transport::{Relay, WaylandChannel};
use wayland_protocols::xdg::shell::server::xdg_wm_base as guest_xdg_wm_base;


/// Host event routed through [`Context::dispatch_host_event`].
#[derive(Debug)]
pub enum HostEvent {
    Registry(wl_registry::Event),
    Output {
        id: OutputId,
        event: host_wl_output::Event,
    },
    AuraOutput {
        id: OutputId,
        event: aura_client::zaura_output::Event,
    },
}

/// The host connection and its registry.
#[derive(Debug)]
pub struct HostConnection {
    pub conn: Connection,
    pub qh: QueueHandle<Context>,
    pub registry: wl_registry::WlRegistry,
}

/// Host objects bound for singleton globals.
#[derive(Debug, Default)]
pub struct HostSingletons {
    pub compositor: Option<host_wl_compositor::WlCompositor>,
    pub subcompositor: Option<host_wl_subcompositor::WlSubcompositor>,
    pub xdg_wm_base: Option<host_xdg_wm_base::XdgWmBase>,
    pub aura_shell: Option<aura_client::zaura_shell::ZauraShell>,
}

impl HostSingletons {
    fn clear(&mut self, interface: MirroredInterface) {
        match interface {
            MirroredInterface::Compositor => self.compositor = None,
            MirroredInterface::Subcompositor => self.subcompositor = None,
            MirroredInterface::XdgWmBase => self.xdg_wm_base = None,
            MirroredInterface::AuraShell => self.aura_shell = None,
            MirroredInterface::Output => {}
        }
    }
}

/// Ask the host for the aura output of `output`, once.
fn request_host_aura(
    output: &mut HostOutput,
    shell: &aura_client::zaura_shell::ZauraShell,
    qh: &QueueHandle<Context>,
) {
    if output.host_aura.is_none() && shell.version() >= 2 {
        output.host_aura = Some(shell.get_aura_output(&output.host, qh, output.id));
    }
}

/// Process-wide proxy state.
pub struct Context {
    disabled: Vec<MirroredInterface>,
    host: Option<HostConnection>,
    guest: Option<DisplayHandle>,
    channel: Option<Rc<RefCell<dyn WaylandChannel>>>,
    globals: GlobalRegistry<GlobalId>,
    outputs: HostOutputs,
    output_ids: OutputIdAllocator,
    pub(crate) singletons: HostSingletons,
    fatal: Option<ProxyError>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            host: None,
            guest: None,
            channel: None,
            globals: GlobalRegistry::new(),
            outputs: HostOutputs::default(),
            output_ids: OutputIdAllocator::default(),
            singletons: HostSingletons::default(),
            fatal: None,
        }
    }
}

impl Context {
    /// Build a context honoring the configured allow-list restrictions.
    /// Performs no I/O.
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            disabled: config.mirror.disabled(),
            ..Self::default()
        }
    }

    /// Create the guest-facing display and register it with the event loop.
    pub fn init_guest_display(&mut self, handle: &LoopHandle<'static, Context>) -> Result<()> {
        let mut display: Display<Context> = Display::new()?;
        let poll_fd = display.backend().poll_fd().try_clone_to_owned()?;
        let dh = display.handle();

        handle
            .insert_source(
                Generic::new(poll_fd, Interest::READ, Mode::Level),
                move |_, _, ctx| {
                    display.dispatch_clients(ctx)?;
                    if let Err(err) = ctx.flush() {
                        return Err(ctx.fail(err));
                    }
                    ctx.check()?;
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| ProxyError::EventLoop(e.error.to_string()))?;

        self.guest = Some(dh);
        info!("🖥️  Guest display ready");
        Ok(())
    }

    /// Connect to the host through `channel` and start listening for its
    /// globals.
    ///
    /// On failure nothing is registered and the context is unchanged.
    pub fn init_transport(
        &mut self,
        handle: &LoopHandle<'static, Context>,
        channel: Rc<RefCell<dyn WaylandChannel>>,
        direct_socket_mode: bool,
    ) -> Result<()> {
        channel.borrow_mut().init().map_err(|err| match err {
            ProxyError::ChannelInit(_) => err,
            other => ProxyError::ChannelInit(other.to_string()),
        })?;
        let stream = channel.borrow_mut().create_context()?;

        let (stream, relay) = if direct_socket_mode {
            (stream, None)
        } else {
            let (relay, connection_end) = Relay::new(channel.clone(), stream)?;
            (connection_end, Some(relay))
        };

        let conn = Connection::from_socket(stream)?;
        let queue = conn.new_event_queue::<Context>();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());

        let token = handle
            .insert_source(
                WaylandSource::new(conn.clone(), queue),
                |_, queue, ctx| {
                    let dispatched = queue.dispatch_pending(ctx)?;
                    if let Err(err) = ctx.flush() {
                        ctx.record_error(err);
                    }
                    if let Err(err) = ctx.check() {
                        return Err(DispatchError::Backend(WaylandError::Io(err)));
                    }
                    Ok(dispatched)
                },
            )
            .map_err(|e| ProxyError::EventLoop(e.error.to_string()))?;

        if let Some(relay) = relay {
            if let Err(err) = relay.insert(handle) {
                handle.remove(token);
                return Err(err);
            }
            debug!("Relaying host traffic through the channel");
        }

        self.host = Some(HostConnection { conn, qh, registry });
        self.channel = Some(channel);
        info!(
            "🔗 Host transport ready ({} mode)",
            if direct_socket_mode { "direct" } else { "relay" }
        );
        Ok(())
    }

    /// Attach a guest connection to the guest display.
    pub fn install_guest_display_implementation(&mut self, stream: UnixStream) -> Result<Client> {
        let dh = self
            .guest
            .as_mut()
            .ok_or(ProxyError::NotInitialized("guest display"))?;
        let client = dh.insert_client(stream, Arc::new(GuestClientData::default()))?;
        debug!("Guest client {:?} attached", client.id());
        Ok(client)
    }

    /// React to one host global advertisement.
    pub fn registry_handler(
        &mut self,
        registry: &wl_registry::WlRegistry,
        name: u32,
        interface: &str,
        version: u32,
    ) -> Result<()> {
        let Some(kind) = MirroredInterface::from_name(interface) else {
            trace!("Ignoring host global {} ({} v{})", name, interface, version);
            return Ok(());
        };
        if self.disabled.contains(&kind) {
            debug!("Not mirroring disabled interface {}", kind);
            return Ok(());
        }
        if !self.globals.accepts(name, kind) {
            debug!("Ignoring repeated advertisement of {} (name {})", kind, name);
            return Ok(());
        }

        let global = Global::negotiate(name, kind, version);
        let qh = self
            .host
            .as_ref()
            .map(|host| host.qh.clone())
            .ok_or(ProxyError::NotInitialized("host connection"))?;
        let dh = self
            .guest
            .clone()
            .ok_or(ProxyError::NotInitialized("guest display"))?;

        let advertisement = match kind {
            MirroredInterface::Compositor => {
                self.singletons.compositor =
                    Some(registry.bind(name, global.version, &qh, ()));
                dh.create_global::<Context, guest_wl_compositor::WlCompositor, ()>(
                    global.version,
                    (),
                )
            }
            MirroredInterface::Subcompositor => {
                self.singletons.subcompositor =
                    Some(registry.bind(name, global.version, &qh, ()));
                dh.create_global::<Context, guest_wl_subcompositor::WlSubcompositor, ()>(
                    global.version,
                    (),
                )
            }
            MirroredInterface::XdgWmBase => {
                self.singletons.xdg_wm_base = Some(registry.bind(name, global.version, &qh, ()));
                dh.create_global::<Context, guest_xdg_wm_base::XdgWmBase, ()>(global.version, ())
            }
            MirroredInterface::AuraShell => {
                let shell: aura_client::zaura_shell::ZauraShell =
                    registry.bind(name, global.version, &qh, ());
                // Outputs bound before the shell showed up get their aura
                // output now.
                for output in self.outputs.iter_mut() {
                    request_host_aura(output, &shell, &qh);
                }
                self.singletons.aura_shell = Some(shell);
                dh.create_global::<Context, aura_server::zaura_shell::ZauraShell, ()>(
                    global.version,
                    (),
                )
            }
            MirroredInterface::Output => {
                dh.create_global::<Context, guest_wl_output::WlOutput, u32>(global.version, name)
            }
        };

        self.globals.insert(global, advertisement);
        info!("🪞 Mirroring {} v{} (host name {})", kind, global.version, name);
        Ok(())
    }

    /// React to the host withdrawing a global.
    pub fn handle_global_remove(&mut self, name: u32) {
        let Some((global, advertisement)) = self.globals.remove(name) else {
            trace!("Host removed unmirrored global {}", name);
            return;
        };

        if let Some(dh) = &self.guest {
            dh.remove_global::<Context>(advertisement);
        }

        match global.interface {
            MirroredInterface::Output => {
                for id in self.outputs.bound_from(name) {
                    self.release_output(id);
                }
            }
            MirroredInterface::AuraShell => {
                self.singletons.clear(MirroredInterface::AuraShell);
                for output in self.outputs.iter_mut() {
                    output.host_aura = None;
                }
            }
            singleton => self.singletons.clear(singleton),
        }
        info!("🗑️  Host removed {} (name {})", global.interface, name);
    }

    /// Route one host event to the state it updates.
    pub fn dispatch_host_event(&mut self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::Registry(wl_registry::Event::Global {
                name,
                interface,
                version,
            }) => {
                let registry = self.host_registry()?.clone();
                self.registry_handler(&registry, name, &interface, version)
            }
            HostEvent::Registry(wl_registry::Event::GlobalRemove { name }) => {
                self.handle_global_remove(name);
                Ok(())
            }
            HostEvent::Registry(_) => Ok(()),
            HostEvent::Output { id, event } => match self.outputs.get_mut(id) {
                Some(output) => output.handle_event(event),
                None => {
                    if self.outputs.lingering(id).output {
                        trace!("Dropping wl_output event for released output {}", id);
                        Ok(())
                    } else {
                        Err(ProxyError::UnknownOutput {
                            id,
                            interface: "wl_output",
                        })
                    }
                }
            },
            HostEvent::AuraOutput { id, event } => match self.outputs.get_mut(id) {
                Some(output) => output.handle_aura_event(event),
                None => {
                    if self.outputs.lingering(id).aura {
                        trace!("Dropping zaura_output event for released output {}", id);
                        Ok(())
                    } else {
                        Err(ProxyError::UnknownOutput {
                            id,
                            interface: "zaura_output",
                        })
                    }
                }
            },
        }
    }

    /// Bind the host output behind a guest `wl_output` binding.
    pub(crate) fn bind_output(
        &mut self,
        resource: New<guest_wl_output::WlOutput>,
        global_name: u32,
        data_init: &mut DataInit<'_, Context>,
    ) -> Result<OutputId> {
        let prepared = self.prepare_output(global_name);
        let (id, global_version, qh, registry) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                data_init.post_error(resource, 0u32, err.to_string());
                return Err(err);
            }
        };

        // The host side always uses the negotiated version so `release` is
        // available whenever the host has it. Guests only see events their
        // own version allows.
        let guest = data_init.init(resource, id);
        let host: host_wl_output::WlOutput = registry.bind(global_name, global_version, &qh, id);

        let mut output = HostOutput::new(id, global_name, host, guest);
        if let Some(shell) = &self.singletons.aura_shell {
            request_host_aura(&mut output, shell, &qh);
        }
        self.outputs.insert(output);
        debug!(
            "Bound output {} from host global {} at v{}",
            id, global_name, global_version
        );
        Ok(id)
    }

    fn prepare_output(
        &mut self,
        global_name: u32,
    ) -> Result<(OutputId, u32, QueueHandle<Context>, wl_registry::WlRegistry)> {
        let host = self
            .host
            .as_ref()
            .ok_or(ProxyError::NotInitialized("host connection"))?;
        let global = self
            .globals
            .get(global_name)
            .copied()
            .ok_or(ProxyError::NotInitialized("wl_output global"))?;
        let qh = host.qh.clone();
        let registry = host.registry.clone();
        let id = self.output_ids.allocate()?;
        Ok((id, global.version, qh, registry))
    }

    /// Destroy a mirrored output. Unknown ids are ignored.
    ///
    /// Host objects that have no destructor stay bound, and their late
    /// events are dropped instead of treated as fatal.
    pub fn release_output(&mut self, id: OutputId) {
        if let Some(lingering) = self.outputs.release(id) {
            debug!("Released output {} ({:?})", id, lingering);
        }
    }

    /// Flush pending traffic toward the host and every guest.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(host) = &self.host {
            match host.conn.flush() {
                Ok(()) => {}
                Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        if let Some(dh) = self.guest.as_mut() {
            dh.flush_clients()?;
        }
        Ok(())
    }

    /// Remember the first fatal error raised inside a dispatch callback.
    pub fn record_error(&mut self, err: ProxyError) {
        error!("❌ {}", err);
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }

    /// Record `err` and turn it into something an event source can return.
    pub(crate) fn fail(&mut self, err: ProxyError) -> io::Error {
        let io_err = io::Error::new(io::ErrorKind::Other, err.to_string());
        self.record_error(err);
        io_err
    }

    /// Fails if a fatal error has been recorded.
    pub(crate) fn check(&self) -> io::Result<()> {
        match &self.fatal {
            Some(err) => Err(io::Error::new(io::ErrorKind::Other, err.to_string())),
            None => Ok(()),
        }
    }

    /// Take the recorded fatal error, if any.
    pub fn take_error(&mut self) -> Option<ProxyError> {
        self.fatal.take()
    }

    pub fn globals(&self) -> &GlobalRegistry<GlobalId> {
        &self.globals
    }

    pub fn host_outputs(&self) -> &HostOutputs {
        &self.outputs
    }

    pub(crate) fn host_outputs_mut(&mut self) -> &mut HostOutputs {
        &mut self.outputs
    }

    pub fn host_output(&self, id: OutputId) -> Option<&HostOutput> {
        self.outputs.get(id)
    }

    pub fn host_registry(&self) -> Result<&wl_registry::WlRegistry> {
        self.host
            .as_ref()
            .map(|host| &host.registry)
            .ok_or(ProxyError::NotInitialized("host connection"))
    }

    pub(crate) fn host_queue(&self) -> Option<&QueueHandle<Context>> {
        self.host.as_ref().map(|host| &host.qh)
    }

    pub fn channel(&self) -> Option<&Rc<RefCell<dyn WaylandChannel>>> {
        self.channel.as_ref()
    }

    /// Drop a guest request that cannot be forwarded.
    pub(crate) fn drop_request(&self, interface: &str, request: &str) {
        warn!("Dropping {}.{}: not mirrored", interface, request);
    }
}
