//! # wlbridge - Wayland VM proxy
//!
//! Mirrors a host compositor's globals to Wayland clients that cannot talk
//! to it directly, such as applications running inside a virtual machine.

use std::cell::RefCell;
use std::process::{Child, Command};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use calloop::EventLoop;
use clap::Parser;
use log::{error, info, warn};

use wlbridge::server;
use wlbridge::transport::{SocketChannel, WaylandChannel};
use wlbridge::{Context, ProxyConfig};

#[derive(Parser)]
#[command(name = "wlbridge")]
#[command(about = "A Wayland proxy mirroring a host compositor into a virtual machine guest")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/wlbridge/wlbridge.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Guest socket name (overrides general.socket)
    #[arg(long)]
    socket: Option<String>,

    /// Host compositor socket name or path (overrides host.display)
    #[arg(long)]
    display: Option<String>,

    /// Relay host traffic through the transport channel instead of using it directly
    #[arg(long)]
    relay: bool,

    /// Program to run against the guest socket
    #[arg(trailing_var_arg = true)]
    program: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration before logging so logging.level applies
    let loaded = ProxyConfig::load(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ProxyConfig::default(),
    };

    // Override config with CLI flags
    if cli.socket.is_some() {
        config.general.socket = cli.socket.clone();
    }
    if cli.display.is_some() {
        config.host.display = cli.display.clone();
    }
    if cli.relay {
        config.general.direct = false;
    }

    // Initialize logging
    let level = if cli.debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!("🚀 Starting wlbridge");
    info!(
        "📄 Version: {} ({}, built {})",
        wlbridge::VERSION,
        option_env!("GIT_COMMIT").unwrap_or("unknown commit"),
        env!("BUILD_DATE")
    );
    match loaded {
        Ok(_) => info!("✅ Configuration loaded from: {}", cli.config),
        Err(e) => {
            warn!("⚠️  Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
        }
    }
    config.validate()?;

    run(config, cli.program)
}

fn run(config: ProxyConfig, program: Vec<String>) -> Result<()> {
    let mut event_loop: EventLoop<'static, Context> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let handle = event_loop.handle();

    let mut ctx = Context::new(&config);
    ctx.init_guest_display(&handle)?;

    let socket = server::bind_socket(config.general.socket.as_deref())?;
    let socket_name = server::insert_socket(&handle, socket)?;

    let display = config
        .host
        .resolve_display()
        .context("No host display: set host.display, --display or WAYLAND_DISPLAY")?;
    let channel = SocketChannel::for_display(&display)?
        .with_max_send_size(config.transport.max_send_size);
    let channel: Rc<RefCell<dyn WaylandChannel>> = Rc::new(RefCell::new(channel));
    ctx.init_transport(&handle, channel, config.general.direct)?;

    let mut child = match program.split_first() {
        Some((command, args)) => {
            let child = Command::new(command)
                .args(args)
                .env("WAYLAND_DISPLAY", &socket_name)
                .spawn()
                .with_context(|| format!("Failed to start {}", command))?;
            info!("🎬 Started {} (pid {})", command, child.id());
            Some(child)
        }
        None => {
            info!(
                "   Clients can connect via WAYLAND_DISPLAY={}",
                socket_name.to_string_lossy()
            );
            None
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let signal = event_loop.get_signal();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        signal.wakeup();
    })
    .context("Failed to set signal handler")?;

    // Poll periodically while a child runs so its exit is noticed
    let timeout = child.as_ref().map(|_| Duration::from_millis(250));

    while running.load(Ordering::SeqCst) {
        if let Err(e) = event_loop.dispatch(timeout, &mut ctx) {
            return Err(match ctx.take_error() {
                Some(err) => {
                    error!("❌ Proxy stopped: {}", err);
                    err.into()
                }
                None => e.into(),
            });
        }
        if let Some(err) = ctx.take_error() {
            error!("❌ Proxy stopped: {}", err);
            return Err(err.into());
        }
        if child_exited(&mut child)? {
            break;
        }
    }

    info!("👋 Shutting down");
    Ok(())
}

fn child_exited(child: &mut Option<Child>) -> Result<bool> {
    let Some(process) = child else {
        return Ok(false);
    };
    match process.try_wait()? {
        Some(status) => {
            info!("Program exited with {}", status);
            Ok(true)
        }
        None => Ok(false),
    }
}
