use wayland_client::protocol::wl_registry;
use wayland_client::{Connection, Dispatch, QueueHandle};

use crate::context::{Context, HostEvent};

impl Dispatch<wl_registry::WlRegistry, ()> for Context {
    fn event(
        state: &mut Self,
        _proxy: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let Err(err) = state.dispatch_host_event(HostEvent::Registry(event)) {
            state.record_error(err);
        }
    }
}
