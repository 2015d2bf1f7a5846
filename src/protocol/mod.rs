//! Protocol bindings not shipped by `wayland-protocols`.
//!
//! Core and xdg-shell interfaces come from the wayland-rs crates directly.
//! Only the aura-shell extension is generated here, for both sides of the
//! proxy.

pub mod aura_shell;
