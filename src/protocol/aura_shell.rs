//! Aura shell extension, generated from `protocols/aura-shell.xml`.
//!
//! The host compositor reports fractional output scale through
//! `zaura_output.scale` in thousandths. The proxy talks to the host through
//! [`client`] and re-emits the same events to guests through [`server`].

/// Host-facing bindings.
pub mod client {
    pub use self::generated::{zaura_output, zaura_shell, zaura_surface};

    #[allow(dead_code, non_upper_case_globals, non_snake_case, non_camel_case_types)]
    #[allow(unused_imports, missing_docs, clippy::all)]
    mod generated {
        use wayland_client::{self, protocol::*};

        pub mod __interfaces {
            use wayland_backend;
            use wayland_client::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocols/aura-shell.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_client_code!("protocols/aura-shell.xml");
    }
}

/// Guest-facing bindings.
pub mod server {
    pub use self::generated::{zaura_output, zaura_shell, zaura_surface};

    #[allow(dead_code, non_upper_case_globals, non_snake_case, non_camel_case_types)]
    #[allow(unused_imports, missing_docs, clippy::all)]
    mod generated {
        use wayland_server::{self, protocol::*};

        pub mod __interfaces {
            use wayland_backend;
            use wayland_server::protocol::__interfaces::*;
            wayland_scanner::generate_interfaces!("protocols/aura-shell.xml");
        }
        use self::__interfaces::*;

        wayland_scanner::generate_server_code!("protocols/aura-shell.xml");
    }
}
