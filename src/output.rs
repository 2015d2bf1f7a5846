//! Host output mirror
//!
//! Every time a guest binds a `wl_output` global the proxy binds the host
//! global once more and keeps the pair together in a [`HostOutput`]. Host
//! configuration events are recorded and re-emitted to the guest resource in
//! the order they arrive.
//!
//! ```text
//!   (unbound) --guest bind--> Bound --geometry/mode/scale/name--> Configured
//!                                          ^                          |
//!                                          +---- config event <-- done v
//!                                                                   Done
//! ```
//!
//! Removal (host global removal or guest release) unlinks the record from
//! [`HostOutputs`] and destroys the host objects. Host events that still
//! arrive for a removed id are a protocol-sequence error, unless the host
//! object could not be destroyed: `wl_output` before version 3 and
//! `zaura_output` have no destructor, so their ids linger and late events are
//! dropped.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use log::{debug, trace};
use wayland_client::protocol::wl_output as host_wl_output;
use wayland_client::{Proxy, WEnum};
use wayland_server::protocol::wl_output as guest_wl_output;
use wayland_server::Resource;

use crate::error::{ProxyError, Result};
use crate::protocol::aura_shell::{client as aura_client, server as aura_server};

/// First id of the range reserved for proxy-allocated objects.
pub const SERVER_ID_START: u32 = 0xff00_0000;
/// End (exclusive) of the reserved range.
pub const SERVER_ID_END: u32 = 0xffff_ffff;

/// Milli-scale the host uses for its preferred, 1:1 scale.
pub const PREFERRED_MILLI_SCALE: u32 = 1000;

/// Stable arena key of a [`HostOutput`].
///
/// Also the user data attached to the host `wl_output` proxy, the guest
/// `wl_output` resource and both aura output objects, so any of them leads
/// back to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u32);

impl OutputId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Hands out [`OutputId`]s in increasing order. Ids are never reused.
#[derive(Debug)]
pub struct OutputIdAllocator {
    next: u32,
}

impl Default for OutputIdAllocator {
    fn default() -> Self {
        Self {
            next: SERVER_ID_START,
        }
    }
}

impl OutputIdAllocator {
    pub fn allocate(&mut self) -> Result<OutputId> {
        if self.next >= SERVER_ID_END {
            return Err(ProxyError::IdsExhausted);
        }
        let id = OutputId(self.next);
        self.next += 1;
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn starting_at(next: u32) -> Self {
        Self { next }
    }
}

/// Lifecycle of a mirrored output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Bound on both sides, nothing received from the host yet.
    Bound,
    /// At least one configuration event since the last `done`.
    Configured,
    /// The host closed the configuration sequence.
    Done,
}

/// Last configuration the host reported for an output.
///
/// Enum-typed protocol fields are kept as their wire values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputConfig {
    pub x: i32,
    pub y: i32,
    pub physical_width: i32,
    pub physical_height: i32,
    pub subpixel: u32,
    pub make: String,
    pub model: String,
    pub transform: u32,
    /// Current mode.
    pub width: i32,
    pub height: i32,
    pub refresh: i32,
    pub scale: i32,
    /// Scale in thousandths, from `zaura_output.scale`.
    pub milli_scale: Option<u32>,
    pub preferred: bool,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Flags the guest receives along with a milli-scale.
pub fn scale_flags(milli_scale: u32) -> aura_server::zaura_output::ScaleProperty {
    use aura_server::zaura_output::ScaleProperty;

    if milli_scale == PREFERRED_MILLI_SCALE {
        ScaleProperty::Current | ScaleProperty::Preferred
    } else {
        ScaleProperty::Current
    }
}

/// Re-type a host enum value as its guest counterpart.
///
/// Both sides are generated from the same protocol, so the wire value is
/// the bridge. A value the guest side cannot represent is an error.
pub fn translate_enum<H, G>(
    value: WEnum<H>,
    interface: &'static str,
    name: &'static str,
) -> Result<G>
where
    H: Into<u32>,
    G: TryFrom<u32>,
{
    let raw = match value {
        WEnum::Value(value) => value.into(),
        WEnum::Unknown(raw) => raw,
    };
    G::try_from(raw).map_err(|_| ProxyError::InvalidEnum {
        interface,
        name,
        value: raw,
    })
}

/// One mirrored `wl_output` binding.
#[derive(Debug)]
pub struct HostOutput {
    pub id: OutputId,
    /// Host name of the global this binding came from.
    pub global_name: u32,
    pub host: host_wl_output::WlOutput,
    pub guest: guest_wl_output::WlOutput,
    pub host_aura: Option<aura_client::zaura_output::ZauraOutput>,
    pub guest_aura: Vec<aura_server::zaura_output::ZauraOutput>,
    pub config: OutputConfig,
    pub state: OutputState,
}

impl HostOutput {
    pub fn new(
        id: OutputId,
        global_name: u32,
        host: host_wl_output::WlOutput,
        guest: guest_wl_output::WlOutput,
    ) -> Self {
        Self {
            id,
            global_name,
            host,
            guest,
            host_aura: None,
            guest_aura: Vec::new(),
            config: OutputConfig::default(),
            state: OutputState::Bound,
        }
    }

    /// Record a host `wl_output` event and re-emit it to the guest.
    pub fn handle_event(&mut self, event: host_wl_output::Event) -> Result<()> {
        let guest_version = self.guest.version();

        match event {
            host_wl_output::Event::Geometry {
                x,
                y,
                physical_width,
                physical_height,
                subpixel,
                make,
                model,
                transform,
            } => {
                let subpixel: guest_wl_output::Subpixel =
                    translate_enum(subpixel, "wl_output", "subpixel")?;
                let transform: guest_wl_output::Transform =
                    translate_enum(transform, "wl_output", "transform")?;

                self.guest.geometry(
                    x,
                    y,
                    physical_width,
                    physical_height,
                    subpixel,
                    make.clone(),
                    model.clone(),
                    transform,
                );
                self.config.x = x;
                self.config.y = y;
                self.config.physical_width = physical_width;
                self.config.physical_height = physical_height;
                self.config.subpixel = subpixel.into();
                self.config.transform = transform.into();
                self.config.make = make;
                self.config.model = model;
                self.state = OutputState::Configured;
            }
            host_wl_output::Event::Mode {
                flags,
                width,
                height,
                refresh,
            } => {
                let flags: guest_wl_output::Mode = translate_enum(flags, "wl_output", "mode")?;

                self.guest.mode(flags, width, height, refresh);
                if flags.contains(guest_wl_output::Mode::Current) {
                    self.config.width = width;
                    self.config.height = height;
                    self.config.refresh = refresh;
                }
                self.state = OutputState::Configured;
            }
            host_wl_output::Event::Scale { factor } => {
                if guest_version >= 2 {
                    self.guest.scale(factor);
                }
                self.config.scale = factor;
                self.state = OutputState::Configured;
            }
            host_wl_output::Event::Name { name } => {
                if guest_version >= 4 {
                    self.guest.name(name.clone());
                }
                self.config.name = Some(name);
                self.state = OutputState::Configured;
            }
            host_wl_output::Event::Description { description } => {
                if guest_version >= 4 {
                    self.guest.description(description.clone());
                }
                self.config.description = Some(description);
                self.state = OutputState::Configured;
            }
            host_wl_output::Event::Done => {
                if guest_version >= 2 {
                    self.guest.done();
                }
                self.state = OutputState::Done;
            }
            _ => trace!("Ignoring unhandled wl_output event for output {}", self.id),
        }

        Ok(())
    }

    /// Record a host `zaura_output` event and re-emit it to every guest
    /// aura output of this binding.
    pub fn handle_aura_event(&mut self, event: aura_client::zaura_output::Event) -> Result<()> {
        match event {
            aura_client::zaura_output::Event::Scale { flags, scale } => {
                let raw = match flags {
                    WEnum::Value(flags) => flags.bits(),
                    WEnum::Unknown(raw) => raw,
                };
                let flags = aura_client::zaura_output::ScaleProperty::from_bits_truncate(raw);
                if !flags.contains(aura_client::zaura_output::ScaleProperty::Current) {
                    trace!("Skipping non-current scale {} for output {}", scale, self.id);
                    return Ok(());
                }

                self.config.milli_scale = Some(scale);
                self.config.preferred = scale == PREFERRED_MILLI_SCALE;
                self.state = OutputState::Configured;

                let guest_flags = scale_flags(scale);
                for aura in &self.guest_aura {
                    aura.scale(guest_flags, scale);
                }
                debug!("Output {} scale {} ({:?})", self.id, scale, guest_flags);
            }
            _ => trace!("Ignoring unhandled zaura_output event for output {}", self.id),
        }

        Ok(())
    }

    /// Start mirroring aura events to another guest aura output. It gets the
    /// recorded scale right away if the host already reported one.
    pub fn attach_guest_aura(&mut self, aura: aura_server::zaura_output::ZauraOutput) {
        if let Some(scale) = self.config.milli_scale {
            aura.scale(scale_flags(scale), scale);
        }
        self.guest_aura.retain(|existing| existing.is_alive());
        self.guest_aura.push(aura);
    }

    /// Drop the host side of the binding. Returns what stays bound.
    pub fn release_host(&self) -> Lingering {
        let output = self.host.version() < 3;
        if !output {
            self.host.release();
        }
        Lingering {
            output,
            aura: self.host_aura.is_some(),
        }
    }
}

/// Host objects of a released binding that are still bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lingering {
    pub output: bool,
    pub aura: bool,
}

impl Lingering {
    pub fn any(self) -> bool {
        self.output || self.aura
    }
}

/// Arena of live [`HostOutput`]s in binding order.
#[derive(Debug, Default)]
pub struct HostOutputs {
    outputs: IndexMap<OutputId, HostOutput>,
    lingering: HashMap<OutputId, Lingering>,
}

impl HostOutputs {
    pub fn insert(&mut self, output: HostOutput) {
        self.outputs.insert(output.id, output);
    }

    pub fn get(&self, id: OutputId) -> Option<&HostOutput> {
        self.outputs.get(&id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut HostOutput> {
        self.outputs.get_mut(&id)
    }

    /// Unlink an output. Survivors keep their order.
    pub fn remove(&mut self, id: OutputId) -> Option<HostOutput> {
        self.outputs.shift_remove(&id)
    }

    /// Unlink an output and destroy its host objects. Returns `None` for
    /// unknown ids.
    pub fn release(&mut self, id: OutputId) -> Option<Lingering> {
        let output = self.remove(id)?;
        let lingering = output.release_host();
        if lingering.any() {
            self.lingering.insert(id, lingering);
        }
        Some(lingering)
    }

    /// What is still bound on the host for a released id.
    pub fn lingering(&self, id: OutputId) -> Lingering {
        self.lingering.get(&id).copied().unwrap_or_default()
    }

    /// Ids of every binding made from the given host global.
    pub fn bound_from(&self, global_name: u32) -> Vec<OutputId> {
        self.outputs
            .values()
            .filter(|output| output.global_name == global_name)
            .map(|output| output.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostOutput> {
        self.outputs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut HostOutput> {
        self.outputs.values_mut()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
