//! xdg-shell: `xdg_wm_base`, `xdg_positioner`, `xdg_surface`,
//! `xdg_toplevel` and `xdg_popup`.
//!
//! Seats are not mirrored, so requests that name a seat (interactive move
//! and resize, window menus, popup grabs) are dropped.
//!
//! Toplevels and popups are recorded in the role chain of their surface
//! along with the xdg surface itself.

use log::trace;
use wayland_client::{Connection, QueueHandle};
use wayland_protocols::xdg::shell::client::{
    xdg_popup as host_xdg_popup, xdg_positioner as host_xdg_positioner,
    xdg_surface as host_xdg_surface, xdg_toplevel as host_xdg_toplevel,
    xdg_wm_base as host_xdg_wm_base,
};
use wayland_protocols::xdg::shell::server::{
    xdg_popup as guest_xdg_popup, xdg_positioner as guest_xdg_positioner,
    xdg_surface as guest_xdg_surface, xdg_toplevel as guest_xdg_toplevel,
    xdg_wm_base as guest_xdg_wm_base,
};
use wayland_server::backend::ClientId;
use wayland_server::{Client, DataInit, DisplayHandle, GlobalDispatch, New, Resource};

use super::compositor::{host_surface, surface_roles};
use super::{guest_enum, link_guest, GuestLink, HostProxy, RoleData};
use crate::context::Context;
use crate::output::OutputId;

type PositionerData = HostProxy<host_xdg_positioner::XdgPositioner>;
type SurfaceData = RoleData<host_xdg_surface::XdgSurface>;
type ToplevelData = HostProxy<host_xdg_toplevel::XdgToplevel>;
type PopupData = HostProxy<host_xdg_popup::XdgPopup>;
type ToplevelLink = GuestLink<guest_xdg_toplevel::XdgToplevel>;

impl GlobalDispatch<guest_xdg_wm_base::XdgWmBase, ()> for Context {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<guest_xdg_wm_base::XdgWmBase>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        match state.singletons.xdg_wm_base.clone() {
            Some(host) => {
                data_init.init(resource, HostProxy(host));
            }
            None => data_init.post_error(resource, 0u32, "host xdg_wm_base is gone"),
        }
    }
}

impl wayland_server::Dispatch<guest_xdg_wm_base::XdgWmBase, HostProxy<host_xdg_wm_base::XdgWmBase>>
    for Context
{
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_xdg_wm_base::XdgWmBase,
        request: guest_xdg_wm_base::Request,
        data: &HostProxy<host_xdg_wm_base::XdgWmBase>,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            guest_xdg_wm_base::Request::CreatePositioner { id } => {
                let Some(qh) = state.host_queue().cloned() else {
                    data_init.post_error(id, 0u32, "host connection lost");
                    return;
                };
                let host = data.get().create_positioner(&qh, ());
                data_init.init(id, HostProxy(host));
            }
            guest_xdg_wm_base::Request::GetXdgSurface { id, surface } => {
                let (Some(qh), Some(target), Some(roles)) = (
                    state.host_queue().cloned(),
                    host_surface(&surface),
                    surface_roles(&surface),
                ) else {
                    data_init.post_error(id, 0u32, "xdg_surface for an unmirrored surface");
                    return;
                };
                let host = data.get().get_xdg_surface(
                    target,
                    &qh,
                    GuestLink::<guest_xdg_surface::XdgSurface>::default(),
                );
                let destroy = host.clone();
                roles.push(move || destroy.destroy());
                let guest = data_init.init(id, RoleData::new(host.clone(), roles));
                link_guest(&host, guest);
            }
            // The proxy answers host pings itself.
            guest_xdg_wm_base::Request::Pong { .. } => {}
            _ => {}
        }
    }
}

impl wayland_client::Dispatch<host_xdg_wm_base::XdgWmBase, ()> for Context {
    fn event(
        _state: &mut Self,
        proxy: &host_xdg_wm_base::XdgWmBase,
        event: host_xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let host_xdg_wm_base::Event::Ping { serial } = event {
            trace!("Answering host ping {}", serial);
            proxy.pong(serial);
        }
    }
}

impl wayland_server::Dispatch<guest_xdg_positioner::XdgPositioner, PositionerData> for Context {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &guest_xdg_positioner::XdgPositioner,
        request: guest_xdg_positioner::Request,
        data: &PositionerData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = data.get();
        match request {
            guest_xdg_positioner::Request::SetSize { width, height } => {
                host.set_size(width, height)
            }
            guest_xdg_positioner::Request::SetAnchorRect {
                x,
                y,
                width,
                height,
            } => host.set_anchor_rect(x, y, width, height),
            guest_xdg_positioner::Request::SetAnchor { anchor } => {
                let anchor: host_xdg_positioner::Anchor =
                    guest_enum!(anchor, "xdg_positioner", "anchor");
                host.set_anchor(anchor)
            }
            guest_xdg_positioner::Request::SetGravity { gravity } => {
                let gravity: host_xdg_positioner::Gravity =
                    guest_enum!(gravity, "xdg_positioner", "gravity");
                host.set_gravity(gravity)
            }
            guest_xdg_positioner::Request::SetConstraintAdjustment {
                constraint_adjustment,
            } => host.set_constraint_adjustment(constraint_adjustment),
            guest_xdg_positioner::Request::SetOffset { x, y } => host.set_offset(x, y),
            _ => {}
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_xdg_positioner::XdgPositioner,
        data: &PositionerData,
    ) {
        data.get().destroy();
    }
}

impl wayland_server::Dispatch<guest_xdg_surface::XdgSurface, SurfaceData> for Context {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_xdg_surface::XdgSurface,
        request: guest_xdg_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let host = &data.host;
        match request {
            guest_xdg_surface::Request::GetToplevel { id } => {
                let Some(qh) = state.host_queue().cloned() else {
                    data_init.post_error(id, 0u32, "host connection lost");
                    return;
                };
                let host_toplevel = host.get_toplevel(&qh, ToplevelLink::default());
                let destroy = host_toplevel.clone();
                data.roles.push(move || destroy.destroy());
                let guest = data_init.init(id, HostProxy(host_toplevel.clone()));
                link_guest(&host_toplevel, guest);
            }
            guest_xdg_surface::Request::GetPopup {
                id,
                parent,
                positioner,
            } => {
                let parent = parent
                    .as_ref()
                    .and_then(|parent| parent.data::<SurfaceData>())
                    .map(|parent| &parent.host);
                let (Some(qh), Some(positioner)) = (
                    state.host_queue().cloned(),
                    positioner.data::<PositionerData>().map(HostProxy::get),
                ) else {
                    data_init.post_error(id, 0u32, "popup with an unmirrored positioner");
                    return;
                };
                let host_popup = host.get_popup(
                    parent,
                    positioner,
                    &qh,
                    GuestLink::<guest_xdg_popup::XdgPopup>::default(),
                );
                let destroy = host_popup.clone();
                data.roles.push(move || destroy.destroy());
                let guest = data_init.init(id, HostProxy(host_popup.clone()));
                link_guest(&host_popup, guest);
            }
            guest_xdg_surface::Request::SetWindowGeometry {
                x,
                y,
                width,
                height,
            } => host.set_window_geometry(x, y, width, height),
            guest_xdg_surface::Request::AckConfigure { serial } => host.ack_configure(serial),
            _ => {}
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_xdg_surface::XdgSurface,
        data: &SurfaceData,
    ) {
        data.destroy_with(host_xdg_surface::XdgSurface::destroy);
    }
}

impl wayland_client::Dispatch<host_xdg_surface::XdgSurface, GuestLink<guest_xdg_surface::XdgSurface>>
    for Context
{
    fn event(
        _state: &mut Self,
        _proxy: &host_xdg_surface::XdgSurface,
        event: host_xdg_surface::Event,
        data: &GuestLink<guest_xdg_surface::XdgSurface>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let (host_xdg_surface::Event::Configure { serial }, Some(guest)) = (event, data.get()) {
            guest.configure(serial);
        }
    }
}

impl wayland_server::Dispatch<guest_xdg_toplevel::XdgToplevel, ToplevelData> for Context {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_xdg_toplevel::XdgToplevel,
        request: guest_xdg_toplevel::Request,
        data: &ToplevelData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let host = data.get();
        match request {
            guest_xdg_toplevel::Request::SetParent { parent } => {
                let parent = parent
                    .as_ref()
                    .and_then(|parent| parent.data::<ToplevelData>())
                    .map(HostProxy::get);
                host.set_parent(parent);
            }
            guest_xdg_toplevel::Request::SetTitle { title } => host.set_title(title),
            guest_xdg_toplevel::Request::SetAppId { app_id } => host.set_app_id(app_id),
            guest_xdg_toplevel::Request::SetMaxSize { width, height } => {
                host.set_max_size(width, height)
            }
            guest_xdg_toplevel::Request::SetMinSize { width, height } => {
                host.set_min_size(width, height)
            }
            guest_xdg_toplevel::Request::SetMaximized => host.set_maximized(),
            guest_xdg_toplevel::Request::UnsetMaximized => host.unset_maximized(),
            guest_xdg_toplevel::Request::SetFullscreen { output } => {
                let output = output
                    .as_ref()
                    .and_then(|output| output.data::<OutputId>())
                    .and_then(|id| state.host_output(*id))
                    .map(|output| &output.host);
                host.set_fullscreen(output);
            }
            guest_xdg_toplevel::Request::UnsetFullscreen => host.unset_fullscreen(),
            guest_xdg_toplevel::Request::SetMinimized => host.set_minimized(),
            guest_xdg_toplevel::Request::ShowWindowMenu { .. } => {
                state.drop_request("xdg_toplevel", "show_window_menu")
            }
            guest_xdg_toplevel::Request::Move { .. } => state.drop_request("xdg_toplevel", "move"),
            guest_xdg_toplevel::Request::Resize { .. } => {
                state.drop_request("xdg_toplevel", "resize")
            }
            _ => {}
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_xdg_toplevel::XdgToplevel,
        data: &ToplevelData,
    ) {
        data.get().destroy();
    }
}

impl wayland_client::Dispatch<host_xdg_toplevel::XdgToplevel, GuestLink<guest_xdg_toplevel::XdgToplevel>>
    for Context
{
    fn event(
        _state: &mut Self,
        _proxy: &host_xdg_toplevel::XdgToplevel,
        event: host_xdg_toplevel::Event,
        data: &GuestLink<guest_xdg_toplevel::XdgToplevel>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(guest) = data.get() else {
            return;
        };
        match event {
            host_xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => guest.configure(width, height, states),
            host_xdg_toplevel::Event::Close => guest.close(),
            _ => {}
        }
    }
}

impl wayland_server::Dispatch<guest_xdg_popup::XdgPopup, PopupData> for Context {
    fn request(
        state: &mut Self,
        _client: &Client,
        _resource: &guest_xdg_popup::XdgPopup,
        request: guest_xdg_popup::Request,
        _data: &PopupData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        if let guest_xdg_popup::Request::Grab { .. } = request {
            state.drop_request("xdg_popup", "grab");
        }
    }

    fn destroyed(
        _state: &mut Self,
        _client: ClientId,
        _resource: &guest_xdg_popup::XdgPopup,
        data: &PopupData,
    ) {
        data.get().destroy();
    }
}

impl wayland_client::Dispatch<host_xdg_popup::XdgPopup, GuestLink<guest_xdg_popup::XdgPopup>>
    for Context
{
    fn event(
        _state: &mut Self,
        _proxy: &host_xdg_popup::XdgPopup,
        event: host_xdg_popup::Event,
        data: &GuestLink<guest_xdg_popup::XdgPopup>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(guest) = data.get() else {
            return;
        };
        match event {
            host_xdg_popup::Event::Configure {
                x,
                y,
                width,
                height,
            } => guest.configure(x, y, width, height),
            host_xdg_popup::Event::PopupDone => guest.popup_done(),
            _ => {}
        }
    }
}

wayland_client::delegate_noop!(Context: host_xdg_positioner::XdgPositioner);
