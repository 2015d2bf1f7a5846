//! Per-interface forwarding between guest resources and host proxies.
//!
//! Each mirrored object exists twice: a guest resource on the proxy's
//! display and a host proxy on the proxy's connection. They find each other
//! through wayland-rs user data. Guest resources carry a [`HostProxy`], host
//! proxies carry a [`GuestLink`] that is filled once the guest resource has
//! been created.
//!
//! Objects with no events on the host side carry `()`.
//!
//! Surfaces and xdg surfaces carry a [`RoleData`] instead. Host objects that
//! give a surface its role are recorded in a shared [`RoleChain`], so the
//! host always sees roles destroyed before the surface under them, whatever
//! order the guest's objects go away in.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use wayland_client::Proxy;

/// User data of a guest resource: its host counterpart.
#[derive(Debug)]
pub struct HostProxy<P>(pub P);

impl<P> HostProxy<P> {
    pub fn get(&self) -> &P {
        &self.0
    }
}

/// Destructors of the host objects stacked on one surface.
#[derive(Default)]
pub struct RoleChain {
    destroy: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl RoleChain {
    /// Record a host object created on top of the previous ones.
    pub fn push(&self, destroy: impl FnOnce() + Send + 'static) {
        self.lock().push(Box::new(destroy));
    }

    /// Destroy every recorded object, newest first.
    pub fn tear_down(&self) {
        let destroy = std::mem::take(&mut *self.lock());
        for destroy in destroy.into_iter().rev() {
            destroy();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn FnOnce() + Send>>> {
        self.destroy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RoleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleChain").field("len", &self.len()).finish()
    }
}

/// User data of a guest surface-like resource: its host counterpart and the
/// role chain of the surface it belongs to.
#[derive(Debug)]
pub struct RoleData<P> {
    pub host: P,
    pub roles: Arc<RoleChain>,
}

impl<P> RoleData<P> {
    pub fn new(host: P, roles: Arc<RoleChain>) -> Self {
        Self { host, roles }
    }

    /// Tear down the roles stacked on this object's surface, then the
    /// host object itself.
    pub fn destroy_with(&self, destroy: impl FnOnce(&P)) {
        self.roles.tear_down();
        destroy(&self.host);
    }
}

/// User data of a host proxy: its guest counterpart, once created.
#[derive(Debug)]
pub struct GuestLink<R> {
    guest: OnceLock<R>,
}

impl<R> Default for GuestLink<R> {
    fn default() -> Self {
        Self {
            guest: OnceLock::new(),
        }
    }
}

impl<R> GuestLink<R> {
    pub fn link(&self, guest: R) {
        if self.guest.set(guest).is_err() {
            log::warn!("Host object linked to a guest object twice");
        }
    }

    pub fn get(&self) -> Option<&R> {
        self.guest.get()
    }
}

/// Fill the [`GuestLink`] of a freshly created host proxy.
pub(crate) fn link_guest<P, R>(host: &P, guest: R)
where
    P: Proxy,
    R: Send + Sync + 'static,
{
    match host.data::<GuestLink<R>>() {
        Some(link) => link.link(guest),
        None => log::warn!("{} has no guest link", host.id()),
    }
}

/// Translate a guest enum argument for the host, dropping the request on
/// values the host protocol cannot express.
macro_rules! guest_enum {
    ($value:expr, $interface:literal, $name:literal) => {
        match crate::output::translate_enum($value, $interface, $name) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("Dropping guest request: {}", err);
                return;
            }
        }
    };
}
pub(crate) use guest_enum;

mod compositor;
mod output;
mod registry;
mod xdg;
