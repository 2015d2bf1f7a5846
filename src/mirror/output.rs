//! `wl_output` and the aura-shell extension objects.

use log::{debug, warn};
use wayland_client::protocol::wl_output as host_wl_output;
use wayland_client::{Connection, QueueHandle};
use wayland_server::backend::ClientId;
use wayland_server::protocol::wl_output as guest_wl_output;
use wayland_server::{Client, DataInit, DisplayHandle, GlobalDispatch, New, Resource};

use super::compositor::host_surface;
use super::{guest_enum, HostProxy};
use crate::context::{Context, HostEvent};
use crate::error::ProxyError;
use crate::output::OutputId;
use crate::protocol::aura_shell::{client as aura_client, server as aura_server};

use aura_client::{zaura_output as host_zaura_output, zaura_shell as host_zaura_shell};
use aura_client::zaura_surface as host_zaura_surface;
use aura_server::{zaura_output as guest_zaura_output, zaura_shell as guest_zaura_shell};
use aura_server::zaura_surface as guest_zaura_surface;

impl GlobalDispatch<guest_wl_output::WlOutput, u32> for Context {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<guest_wl_output::WlOutput>,
        global_name: &u32,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match state.bind_output(resource, *global_name, data_init) {
            Ok(_) => {}
            Err(ProxyError::NotInitialized(what)) => {
                warn!("Guest bound output {} but {} is missing", global_name, what)
            }
            Err(err) => state.record_error(err),
        }
    }
}

impl wayland_server::Dispatch<guest_wl_output::WlOutput, OutputId> for Context {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_output::WlOutput,
        request: guest_wl_output::Request,
        data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let guest_wl_output::Request::Release = request {
            state.release_output(*data);
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &guest_wl_output::WlOutput,
        data: &OutputId,
    ) {
        state.release_output(*data);
    }
}

impl wayland_client::Dispatch<host_wl_output::WlOutput, OutputId> for Context {
    fn event(
        state: &mut Self,
        _proxy: &host_wl_output::WlOutput,
        event: host_wl_output::Event,
        data: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let event = HostEvent::Output { id: *data, event };
        if let Err(err) = state.dispatch_host_event(event) {
            state.record_error(err);
        }
    }
}

impl wayland_client::Dispatch<host_zaura_output::ZauraOutput, OutputId> for Context {
    fn event(
        state: &mut Self,
        _proxy: &host_zaura_output::ZauraOutput,
        event: host_zaura_output::Event,
        data: &OutputId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let event = HostEvent::AuraOutput { id: *data, event };
        if let Err(err) = state.dispatch_host_event(event) {
            state.record_error(err);
        }
    }
}

impl GlobalDispatch<guest_zaura_shell::ZauraShell, ()> for Context {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<guest_zaura_shell::ZauraShell>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        match state.singletons.aura_shell.clone() {
            Some(host) => {
                data_init.init(resource, HostProxy(host));
            }
            None => data_init.post_error(resource, 0u32, "host aura shell is gone"),
        }
    }
}

impl wayland_server::Dispatch<guest_zaura_shell::ZauraShell, HostProxy<host_zaura_shell::ZauraShell>>
    for Context
{
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_zaura_shell::ZauraShell,
        request: guest_zaura_shell::Request,
        data: &HostProxy<host_zaura_shell::ZauraShell>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            guest_zaura_shell::Request::GetAuraSurface { id, surface } => {
                let (Some(qh), Some(surface)) =
                    (state.host_queue().cloned(), host_surface(&surface))
                else {
                    data_init.post_error(id, 0u32, "aura surface for an unmirrored surface");
                    return;
                };
                let host = data.get().get_aura_surface(surface, &qh, ());
                data_init.init(id, HostProxy(host));
            }
            guest_zaura_shell::Request::GetAuraOutput { id, output } => {
                let Some(output_id) = output.data::<OutputId>().copied() else {
                    data_init.post_error(id, 0u32, "aura output for an unmirrored output");
                    return;
                };
                let guest = data_init.init(id, output_id);
                match state.host_outputs_mut().get_mut(output_id) {
                    Some(output) => output.attach_guest_aura(guest),
                    None => debug!("Aura output requested for released output {}", output_id),
                }
            }
            _ => {}
        }
    }
}

impl wayland_server::Dispatch<guest_zaura_surface::ZauraSurface, HostProxy<host_zaura_surface::ZauraSurface>>
    for Context
{
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &guest_zaura_surface::ZauraSurface,
        request: guest_zaura_surface::Request,
        data: &HostProxy<host_zaura_surface::ZauraSurface>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let guest_zaura_surface::Request::SetFrame { frame_type } = request {
            let frame_type: host_zaura_surface::FrameType =
                guest_enum!(frame_type, "zaura_surface", "frame_type");
            data.get().set_frame(frame_type);
        }
    }
}

impl wayland_server::Dispatch<guest_zaura_output::ZauraOutput, OutputId> for Context {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &guest_zaura_output::ZauraOutput,
        _request: guest_zaura_output::Request,
        _data: &OutputId,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

wayland_client::delegate_noop!(Context: host_zaura_shell::ZauraShell);
wayland_client::delegate_noop!(Context: host_zaura_surface::ZauraSurface);
