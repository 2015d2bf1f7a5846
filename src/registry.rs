//! Host global registry
//!
//! The proxy only ever exposes interfaces it knows how to translate. This
//! module holds that compiled-in allow-list ([`MirroredInterface`]) and the
//! append-only record of host globals accepted for mirroring
//! ([`GlobalRegistry`]).
//!
//! # Usage
//!
//! ```
//! use wlbridge::registry::{Global, GlobalRegistry, MirroredInterface};
//!
//! let mut registry: GlobalRegistry<()> = GlobalRegistry::new();
//! let interface = MirroredInterface::from_name("wl_output").unwrap();
//! let global = Global::negotiate(0xff00_0001, interface, 7);
//! assert_eq!(global.version, interface.max_version());
//!
//! assert!(registry.insert(global, ()));
//! assert!(!registry.insert(global, ())); // same name twice is ignored
//! assert_eq!(registry.len(), 1);
//! ```

use indexmap::IndexMap;
use std::fmt;

/// Interfaces the proxy mirrors. Everything else a host advertises is
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirroredInterface {
    Compositor,
    Subcompositor,
    XdgWmBase,
    AuraShell,
    Output,
}

impl MirroredInterface {
    /// Every allow-listed interface, in the order they are usually advertised.
    pub const ALL: [MirroredInterface; 5] = [
        MirroredInterface::Compositor,
        MirroredInterface::Subcompositor,
        MirroredInterface::XdgWmBase,
        MirroredInterface::AuraShell,
        MirroredInterface::Output,
    ];

    /// Look up an interface by its canonical protocol name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|interface| interface.name() == name)
    }

    /// Canonical protocol name.
    pub fn name(self) -> &'static str {
        match self {
            MirroredInterface::Compositor => "wl_compositor",
            MirroredInterface::Subcompositor => "wl_subcompositor",
            MirroredInterface::XdgWmBase => "xdg_wm_base",
            MirroredInterface::AuraShell => "zaura_shell",
            MirroredInterface::Output => "wl_output",
        }
    }

    /// Highest version the proxy implements for this interface.
    ///
    /// Binding above this would let one side send messages the other
    /// side's generated code does not know.
    pub fn max_version(self) -> u32 {
        match self {
            MirroredInterface::Compositor => 4,
            MirroredInterface::Subcompositor => 1,
            MirroredInterface::XdgWmBase => 1,
            MirroredInterface::AuraShell => 2,
            MirroredInterface::Output => 4,
        }
    }

    /// Singletons get their host object bound as soon as they are
    /// advertised. Outputs are bound lazily, once per guest binding.
    pub fn is_singleton(self) -> bool {
        !matches!(self, MirroredInterface::Output)
    }
}

impl fmt::Display for MirroredInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One host global accepted for mirroring. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Global {
    /// Numeric name the host assigned in `wl_registry.global`.
    pub name: u32,
    pub interface: MirroredInterface,
    /// Negotiated version, never above [`MirroredInterface::max_version`].
    pub version: u32,
}

impl Global {
    /// Build the record for a host advertisement, clamping the version to
    /// what the proxy implements.
    pub fn negotiate(name: u32, interface: MirroredInterface, host_version: u32) -> Self {
        Self {
            name,
            interface,
            version: host_version.min(interface.max_version()),
        }
    }
}

struct Entry<H> {
    global: Global,
    advertisement: H,
}

/// Insertion-ordered record of accepted host globals.
///
/// `H` is whatever handle the guest side needs to withdraw the global
/// again; the context stores the guest `GlobalId` there.
pub struct GlobalRegistry<H> {
    entries: IndexMap<u32, Entry<H>>,
}

impl<H> Default for GlobalRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> GlobalRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Whether an advertisement for this global would be accepted.
    ///
    /// Rejects a name that is already recorded, and a second global of a
    /// singleton interface under any name.
    pub fn accepts(&self, name: u32, interface: MirroredInterface) -> bool {
        if self.entries.contains_key(&name) {
            return false;
        }
        !(interface.is_singleton() && self.find_interface(interface).is_some())
    }

    /// Append a global. Returns `false` and leaves the registry untouched
    /// if [`accepts`](Self::accepts) would refuse it.
    pub fn insert(&mut self, global: Global, advertisement: H) -> bool {
        if !self.accepts(global.name, global.interface) {
            return false;
        }
        self.entries.insert(
            global.name,
            Entry {
                global,
                advertisement,
            },
        );
        true
    }

    /// Remove a global after the host withdrew it. Survivors keep their order.
    pub fn remove(&mut self, name: u32) -> Option<(Global, H)> {
        self.entries
            .shift_remove(&name)
            .map(|entry| (entry.global, entry.advertisement))
    }

    pub fn get(&self, name: u32) -> Option<&Global> {
        self.entries.get(&name).map(|entry| &entry.global)
    }

    /// First recorded global of the given interface.
    pub fn find_interface(&self, interface: MirroredInterface) -> Option<&Global> {
        self.iter().find(|global| global.interface == interface)
    }

    /// Globals in the order the host advertised them.
    pub fn iter(&self) -> impl Iterator<Item = &Global> {
        self.entries.values().map(|entry| &entry.global)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
