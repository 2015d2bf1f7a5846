//! Test fixture: a proxy with a mocked host channel and one fake guest.
//!
//! The host side is never served. Host globals and events are injected with
//! [`Context::dispatch_host_event`], the way the host queue would deliver
//! them. The guest is a real wayland-rs client connected to the proxy's
//! display over a socket pair, so everything it records went through the
//! wire.

use std::cell::RefCell;
use std::io;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

use calloop::EventLoop;
use wayland_client::backend::WaylandError;
use wayland_client::protocol::{wl_output, wl_registry};
use wayland_client::{Connection, Dispatch, EventQueue, QueueHandle, WEnum};

use crate::config::ProxyConfig;
use crate::context::{Context, HostEvent};
use crate::error::{ProxyError, Result};
use crate::output::{OutputConfig, OutputId};
use crate::protocol::aura_shell::client::{zaura_output, zaura_shell};
use crate::transport::{MockWaylandChannel, WaylandChannel, DEFAULT_BUFFER_SIZE};

const PUMP_ROUNDS: usize = 4;

/// A channel whose `create_context` hands out `stream`.
pub(crate) fn mock_channel(stream: UnixStream) -> Rc<RefCell<dyn WaylandChannel>> {
    let mut channel = MockWaylandChannel::new();
    channel.expect_init().times(1).returning(|| Ok(()));
    let mut stream = Some(stream);
    channel
        .expect_create_context()
        .times(1)
        .returning(move || stream.take().ok_or(ProxyError::NotInitialized("host stream")));
    channel
        .expect_max_send_size()
        .return_const(DEFAULT_BUFFER_SIZE);
    Rc::new(RefCell::new(channel))
}

/// A channel that refuses to initialize.
pub(crate) fn failing_channel() -> Rc<RefCell<dyn WaylandChannel>> {
    let mut channel = MockWaylandChannel::new();
    channel
        .expect_init()
        .times(1)
        .returning(|| Err(ProxyError::ChannelInit("host unreachable".to_string())));
    channel.expect_create_context().never();
    Rc::new(RefCell::new(channel))
}

/// Configuration for an output at (`x`, `y`) running `width`x`height` at
/// 60Hz with integer `scale` and a matching milli-scale of 1000.
pub(crate) fn output_config(x: i32, y: i32, width: i32, height: i32, scale: i32) -> OutputConfig {
    OutputConfig {
        x,
        y,
        physical_width: width / 4,
        physical_height: height / 4,
        make: "wlbridge".to_string(),
        model: "virtual".to_string(),
        width,
        height,
        refresh: 60_000,
        scale,
        milli_scale: Some(1000),
        preferred: true,
        ..OutputConfig::default()
    }
}

/// One event as the guest received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GuestEvent {
    Geometry {
        x: i32,
        y: i32,
        physical_width: i32,
        physical_height: i32,
    },
    Mode {
        width: i32,
        height: i32,
        refresh: i32,
    },
    Scale(i32),
    Name(String),
    Done,
    AuraScale {
        current: bool,
        preferred: bool,
        scale: u32,
    },
}

/// A global as the guest saw it advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Advertised {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

#[derive(Debug, Default)]
pub(crate) struct GuestState {
    pub globals: Vec<Advertised>,
    /// Output events, tagged with the index of the guest binding.
    pub events: Vec<(usize, GuestEvent)>,
}

impl GuestState {
    pub fn advertised(&self, interface: &str) -> Vec<&Advertised> {
        self.globals
            .iter()
            .filter(|global| global.interface == interface)
            .collect()
    }

    pub fn events_for(&self, index: usize) -> Vec<GuestEvent> {
        self.events
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for GuestState {
    fn event(
        state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.globals.push(Advertised {
                name,
                interface,
                version,
            }),
            wl_registry::Event::GlobalRemove { name } => {
                state.globals.retain(|global| global.name != name)
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_output::WlOutput, usize> for GuestState {
    fn event(
        state: &mut Self,
        _proxy: &wl_output::WlOutput,
        event: wl_output::Event,
        index: &usize,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let event = match event {
            wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                ..
            } => GuestEvent::Geometry {
                x,
                y,
                physical_width,
                physical_height,
            },
            wl_output::Event::Mode {
                width,
                height,
                refresh,
                ..
            } => GuestEvent::Mode {
                width,
                height,
                refresh,
            },
            wl_output::Event::Scale { factor } => GuestEvent::Scale(factor),
            wl_output::Event::Name { name } => GuestEvent::Name(name),
            wl_output::Event::Done => GuestEvent::Done,
            _ => return,
        };
        state.events.push((*index, event));
    }
}

impl Dispatch<zaura_output::ZauraOutput, usize> for GuestState {
    fn event(
        state: &mut Self,
        _proxy: &zaura_output::ZauraOutput,
        event: zaura_output::Event,
        index: &usize,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zaura_output::Event::Scale { flags, scale } = event {
            let flags = match flags {
                WEnum::Value(flags) => flags,
                WEnum::Unknown(raw) => zaura_output::ScaleProperty::from_bits_truncate(raw),
            };
            state.events.push((
                *index,
                GuestEvent::AuraScale {
                    current: flags.contains(zaura_output::ScaleProperty::Current),
                    preferred: flags.contains(zaura_output::ScaleProperty::Preferred),
                    scale,
                },
            ));
        }
    }
}

wayland_client::delegate_noop!(GuestState: zaura_shell::ZauraShell);

/// A wayland client connected to the proxy's guest display.
pub(crate) struct FakeGuest {
    pub conn: Connection,
    pub queue: EventQueue<GuestState>,
    pub qh: QueueHandle<GuestState>,
    pub registry: wl_registry::WlRegistry,
    pub state: GuestState,
    /// Bound outputs; the index is the user data of each.
    pub outputs: Vec<wl_output::WlOutput>,
    bound_names: Vec<u32>,
    aura_shell: Option<zaura_shell::ZauraShell>,
}

impl FakeGuest {
    fn connect(stream: UnixStream) -> Self {
        let conn = Connection::from_socket(stream).unwrap();
        let queue = conn.new_event_queue();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());
        Self {
            conn,
            queue,
            qh,
            registry,
            state: GuestState::default(),
            outputs: Vec::new(),
            bound_names: Vec::new(),
            aura_shell: None,
        }
    }

    /// Bind every advertised output not bound yet, with an aura output for
    /// each when the proxy offers aura shell.
    pub fn bind_outputs(&mut self) {
        if self.aura_shell.is_none() {
            if let Some(shell) = self.state.advertised("zaura_shell").first() {
                self.aura_shell = Some(self.registry.bind(shell.name, shell.version, &self.qh, ()));
            }
        }

        let pending: Vec<Advertised> = self
            .state
            .advertised("wl_output")
            .into_iter()
            .filter(|global| !self.bound_names.contains(&global.name))
            .cloned()
            .collect();
        for global in pending {
            let index = self.outputs.len();
            let output: wl_output::WlOutput =
                self.registry.bind(global.name, global.version, &self.qh, index);
            if let Some(shell) = &self.aura_shell {
                shell.get_aura_output(&output, &self.qh, index);
            }
            self.outputs.push(output);
            self.bound_names.push(global.name);
        }
    }

    fn flush(&self) {
        match self.conn.flush() {
            Ok(()) => {}
            Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => panic!("guest flush failed: {}", err),
        }
    }

    fn read_events(&mut self) {
        if let Some(guard) = self.queue.prepare_read() {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => panic!("guest read failed: {}", err),
            }
        }
        self.queue.dispatch_pending(&mut self.state).unwrap();
    }
}

/// A proxy wired to a silent host and a [`FakeGuest`].
pub(crate) struct Fixture {
    pub event_loop: EventLoop<'static, Context>,
    pub ctx: Context,
    pub guest: FakeGuest,
    // Keeps the host connection open.
    _host_peer: UnixStream,
    next_name: u32,
}

impl Fixture {
    /// Default configuration, with the host advertising `wl_compositor`,
    /// `xdg_wm_base` and `zaura_shell`.
    pub fn new() -> Self {
        Self::with_config(&ProxyConfig::default())
    }

    pub fn with_config(config: &ProxyConfig) -> Self {
        let event_loop: EventLoop<'static, Context> = EventLoop::try_new().unwrap();
        let mut ctx = Context::new(config);
        ctx.init_guest_display(&event_loop.handle()).unwrap();

        let (proxy_end, host_peer) = UnixStream::pair().unwrap();
        proxy_end.set_nonblocking(true).unwrap();
        ctx.init_transport(&event_loop.handle(), mock_channel(proxy_end), true)
            .unwrap();

        let (server_end, client_end) = UnixStream::pair().unwrap();
        server_end.set_nonblocking(true).unwrap();
        client_end.set_nonblocking(true).unwrap();
        ctx.install_guest_display_implementation(server_end).unwrap();

        let mut fixture = Self {
            event_loop,
            ctx,
            guest: FakeGuest::connect(client_end),
            _host_peer: host_peer,
            next_name: 1,
        };
        fixture.advertise("wl_compositor", 4);
        fixture.advertise("xdg_wm_base", 1);
        fixture.advertise("zaura_shell", 2);
        fixture
    }

    /// Deliver a host `wl_registry.global`. Returns the host name used.
    pub fn advertise(&mut self, interface: &str, version: u32) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        self.advertise_as(name, interface, version);
        name
    }

    /// Deliver a host `wl_registry.global` under a chosen name.
    pub fn advertise_as(&mut self, name: u32, interface: &str, version: u32) {
        self.ctx
            .dispatch_host_event(HostEvent::Registry(wl_registry::Event::Global {
                name,
                interface: interface.to_string(),
                version,
            }))
            .unwrap();
    }

    /// Deliver a host `wl_registry.global_remove`.
    pub fn remove(&mut self, name: u32) {
        self.ctx
            .dispatch_host_event(HostEvent::Registry(wl_registry::Event::GlobalRemove {
                name,
            }))
            .unwrap();
    }

    /// Advertise `count` outputs at version 4.
    pub fn advertise_outputs(&mut self, count: usize) -> Vec<u32> {
        (0..count).map(|_| self.advertise("wl_output", 4)).collect()
    }

    /// Ids of the mirrored outputs in binding order.
    pub fn output_ids(&self) -> Vec<OutputId> {
        self.ctx.host_outputs().iter().map(|output| output.id).collect()
    }

    /// Replay a full host configuration sequence for one output: the aura
    /// scale, then geometry, mode, scale and done.
    pub fn configure_output(&mut self, id: OutputId, config: &OutputConfig) -> Result<()> {
        use wayland_client::protocol::wl_output as host_wl_output;

        let mut events = Vec::new();
        if let Some(scale) = config.milli_scale {
            events.push(HostEvent::AuraOutput {
                id,
                event: zaura_output::Event::Scale {
                    flags: WEnum::Value(zaura_output::ScaleProperty::Current),
                    scale,
                },
            });
        }
        events.push(HostEvent::Output {
            id,
            event: host_wl_output::Event::Geometry {
                x: config.x,
                y: config.y,
                physical_width: config.physical_width,
                physical_height: config.physical_height,
                subpixel: config.subpixel.into(),
                make: config.make.clone(),
                model: config.model.clone(),
                transform: config.transform.into(),
            },
        });
        events.push(HostEvent::Output {
            id,
            event: host_wl_output::Event::Mode {
                flags: WEnum::Value(host_wl_output::Mode::Current),
                width: config.width,
                height: config.height,
                refresh: config.refresh,
            },
        });
        events.push(HostEvent::Output {
            id,
            event: host_wl_output::Event::Scale {
                factor: config.scale,
            },
        });
        events.push(HostEvent::Output {
            id,
            event: host_wl_output::Event::Done,
        });

        for event in events {
            self.ctx.dispatch_host_event(event)?;
        }
        Ok(())
    }

    /// Move pending traffic between the guest and the proxy until both
    /// sides are idle.
    pub fn pump(&mut self) {
        for _ in 0..PUMP_ROUNDS {
            self.guest.flush();
            self.event_loop
                .dispatch(Some(Duration::ZERO), &mut self.ctx)
                .unwrap();
            self.ctx.flush().unwrap();
            self.guest.read_events();
        }
    }
}
