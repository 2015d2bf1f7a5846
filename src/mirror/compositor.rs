//! `wl_compositor`, `wl_surface`, `wl_region`, `wl_callback`,
//! `wl_subcompositor` and `wl_subsurface`.

use std::sync::Arc;

use log::{debug, trace};
use wayland_client::protocol::{
    wl_callback as host_wl_callback, wl_compositor as host_wl_compositor,
    wl_output as host_wl_output, wl_region as host_wl_region,
    wl_subcompositor as host_wl_subcompositor, wl_subsurface as host_wl_subsurface,
    wl_surface as host_wl_surface,
};
use wayland_client::{Connection, Proxy, QueueHandle};
use wayland_server::backend::ClientId;
use wayland_server::protocol::{
    wl_callback as guest_wl_callback, wl_compositor as guest_wl_compositor,
    wl_region as guest_wl_region, wl_subcompositor as guest_wl_subcompositor,
    wl_subsurface as guest_wl_subsurface, wl_surface as guest_wl_surface,
};
use wayland_server::{Client, DataInit, DisplayHandle, GlobalDispatch, New, Resource};

use super::{guest_enum, link_guest, GuestLink, HostProxy, RoleChain, RoleData};
use crate::context::Context;
use crate::output::OutputId;

type SurfaceData = RoleData<host_wl_surface::WlSurface>;
type SurfaceLink = GuestLink<guest_wl_surface::WlSurface>;
type CallbackLink = GuestLink<guest_wl_callback::WlCallback>;
type RegionData = HostProxy<host_wl_region::WlRegion>;

fn host_region(region: Option<&guest_wl_region::WlRegion>) -> Option<&host_wl_region::WlRegion> {
    region
        .and_then(|region| region.data::<RegionData>())
        .map(HostProxy::get)
}

pub(super) fn host_surface(surface: &guest_wl_surface::WlSurface) -> Option<&host_wl_surface::WlSurface> {
    surface.data::<SurfaceData>().map(|data| &data.host)
}

/// Role chain of a mirrored guest surface.
pub(super) fn surface_roles(surface: &guest_wl_surface::WlSurface) -> Option<Arc<RoleChain>> {
    surface.data::<SurfaceData>().map(|data| data.roles.clone())
}

fn same_client<A: Resource, B: Resource>(a: &A, b: &B) -> bool {
    match (a.client(), b.client()) {
        (Some(a), Some(b)) => a.id() == b.id(),
        _ => false,
    }
}

impl GlobalDispatch<guest_wl_compositor::WlCompositor, ()> for Context {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<guest_wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        match state.singletons.compositor.clone() {
            Some(host) => {
                data_init.init(resource, HostProxy(host));
            }
            None => data_init.post_error(resource, 0u32, "host compositor is gone"),
        }
    }
}

impl wayland_server::Dispatch<guest_wl_compositor::WlCompositor, HostProxy<host_wl_compositor::WlCompositor>>
    for Context
{
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_compositor::WlCompositor,
        request: guest_wl_compositor::Request,
        data: &HostProxy<host_wl_compositor::WlCompositor>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            guest_wl_compositor::Request::CreateSurface { id } => {
                let Some(qh) = state.host_queue().cloned() else {
                    data_init.post_error(id, 0u32, "host connection lost");
                    return;
                };
                let host = data.get().create_surface(&qh, SurfaceLink::default());
                let roles = Arc::new(RoleChain::default());
                let guest = data_init.init(id, RoleData::new(host.clone(), roles));
                trace!("Surface {} mirrors {}", guest.id(), host.id());
                link_guest(&host, guest);
            }
            guest_wl_compositor::Request::CreateRegion { id } => {
                let Some(qh) = state.host_queue().cloned() else {
                    data_init.post_error(id, 0u32, "host connection lost");
                    return;
                };
                let host = data.get().create_region(&qh, ());
                data_init.init(id, HostProxy(host));
            }
            _ => {}
        }
    }
}

impl wayland_server::Dispatch<guest_wl_surface::WlSurface, SurfaceData> for Context {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_surface::WlSurface,
        request: guest_wl_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let host = &data.host;

        match request {
            guest_wl_surface::Request::Attach { buffer, x, y } => match buffer {
                None => host.attach(None, x, y),
                Some(_) => state.drop_request("wl_surface", "attach"),
            },
            guest_wl_surface::Request::Damage {
                x,
                y,
                width,
                height,
            } => host.damage(x, y, width, height),
            guest_wl_surface::Request::Frame { callback } => {
                let Some(qh) = state.host_queue().cloned() else {
                    data_init.post_error(callback, 0u32, "host connection lost");
                    return;
                };
                let host_callback = host.frame(&qh, CallbackLink::default());
                let guest = data_init.init(callback, ());
                link_guest(&host_callback, guest);
            }
            guest_wl_surface::Request::SetOpaqueRegion { region } => {
                host.set_opaque_region(host_region(region.as_ref()))
            }
            guest_wl_surface::Request::SetInputRegion { region } => {
                host.set_input_region(host_region(region.as_ref()))
            }
            guest_wl_surface::Request::Commit => host.commit(),
            guest_wl_surface::Request::SetBufferTransform { transform } => {
                let transform: host_wl_output::Transform =
                    guest_enum!(transform, "wl_surface", "transform");
                host.set_buffer_transform(transform)
            }
            guest_wl_surface::Request::SetBufferScale { scale } => host.set_buffer_scale(scale),
            guest_wl_surface::Request::DamageBuffer {
                x,
                y,
                width,
                height,
            } => host.damage_buffer(x, y, width, height),
            guest_wl_surface::Request::Destroy => {}
            _ => state.drop_request("wl_surface", "unknown"),
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_wl_surface::WlSurface,
        data: &SurfaceData,
    ) {
        data.destroy_with(host_wl_surface::WlSurface::destroy);
    }
}

impl wayland_client::Dispatch<host_wl_surface::WlSurface, SurfaceLink>
    for Context
{
    fn event(
        state: &mut Self,
        _proxy: &host_wl_surface::WlSurface,
        event: host_wl_surface::Event,
        data: &SurfaceLink,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(surface) = data.get() else {
            return;
        };

        let (output, entering) = match event {
            host_wl_surface::Event::Enter { output } => (output, true),
            host_wl_surface::Event::Leave { output } => (output, false),
            _ => return,
        };

        let Some(id) = output.data::<OutputId>() else {
            debug!("Surface entered an output the proxy did not bind");
            return;
        };
        let Some(host_output) = state.host_output(*id) else {
            debug!("Surface entered released output {}", id);
            return;
        };
        if !same_client(&host_output.guest, surface) {
            return;
        }

        if entering {
            surface.enter(&host_output.guest);
        } else {
            surface.leave(&host_output.guest);
        }
    }
}

impl wayland_server::Dispatch<guest_wl_region::WlRegion, RegionData> for Context {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_region::WlRegion,
        request: guest_wl_region::Request,
        data: &RegionData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            guest_wl_region::Request::Add {
                x,
                y,
                width,
                height,
            } => data.get().add(x, y, width, height),
            guest_wl_region::Request::Subtract {
                x,
                y,
                width,
                height,
            } => data.get().subtract(x, y, width, height),
            _ => {}
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_wl_region::WlRegion,
        data: &RegionData,
    ) {
        data.get().destroy();
    }
}

impl wayland_server::Dispatch<guest_wl_callback::WlCallback, ()> for Context {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_callback::WlCallback,
        _request: guest_wl_callback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

impl wayland_client::Dispatch<host_wl_callback::WlCallback, CallbackLink>
    for Context
{
    fn event(
        _state: &mut Self,
        _proxy: &host_wl_callback::WlCallback,
        event: host_wl_callback::Event,
        data: &CallbackLink,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let host_wl_callback::Event::Done { callback_data } = event {
            if let Some(callback) = data.get() {
                callback.done(callback_data);
            }
        }
    }
}

impl GlobalDispatch<guest_wl_subcompositor::WlSubcompositor, ()> for Context {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<guest_wl_subcompositor::WlSubcompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        match state.singletons.subcompositor.clone() {
            Some(host) => {
                data_init.init(resource, HostProxy(host));
            }
            None => data_init.post_error(resource, 0u32, "host subcompositor is gone"),
        }
    }
}

impl
    wayland_server::Dispatch<
        guest_wl_subcompositor::WlSubcompositor,
        HostProxy<host_wl_subcompositor::WlSubcompositor>,
    > for Context
{
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_subcompositor::WlSubcompositor,
        request: guest_wl_subcompositor::Request,
        data: &HostProxy<host_wl_subcompositor::WlSubcompositor>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let guest_wl_subcompositor::Request::GetSubsurface {
            id,
            surface,
            parent,
        } = request
        {
            let (Some(qh), Some(surface), Some(parent)) = (
                state.host_queue().cloned(),
                host_surface(&surface),
                host_surface(&parent),
            ) else {
                data_init.post_error(id, 0u32, "subsurface of an unmirrored surface");
                return;
            };
            let host = data.get().get_subsurface(surface, parent, &qh, ());
            data_init.init(id, HostProxy(host));
        }
    }
}

impl wayland_server::Dispatch<guest_wl_subsurface::WlSubsurface, HostProxy<host_wl_subsurface::WlSubsurface>>
    for Context
{
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &guest_wl_subsurface::WlSubsurface,
        request: guest_wl_subsurface::Request,
        data: &HostProxy<host_wl_subsurface::WlSubsurface>,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = data.get();
        match request {
            guest_wl_subsurface::Request::SetPosition { x, y } => host.set_position(x, y),
            guest_wl_subsurface::Request::PlaceAbove { sibling } => {
                if let Some(sibling) = host_surface(&sibling) {
                    host.place_above(sibling);
                }
            }
            guest_wl_subsurface::Request::PlaceBelow { sibling } => {
                if let Some(sibling) = host_surface(&sibling) {
                    host.place_below(sibling);
                }
            }
            guest_wl_subsurface::Request::SetSync => host.set_sync(),
            guest_wl_subsurface::Request::SetDesync => host.set_desync(),
            _ => {}
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_wl_subsurface::WlSubsurface,
        data: &HostProxy<host_wl_subsurface::WlSubsurface>,
    ) {
        data.get().destroy();
    }
}

wayland_client::delegate_noop!(Context: host_wl_compositor::WlCompositor);
wayland_client::delegate_noop!(Context: host_wl_region::WlRegion);
wayland_client::delegate_noop!(Context: host_wl_subcompositor::WlSubcompositor);
wayland_client::delegate_noop!(Context: host_wl_subsurface::WlSubsurface);
