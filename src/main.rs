//! A relay binary that speaks the inter-relay link protocol: TLS plus the
//! cell-framed handshake, rate-limited in both directions.
//!
//! NOTE: This binary is still highly experimental, in active development,
//! not stable, and without any guarantee of running or even working.

// @@ begin lint list maintained by maint/add_warning @@
#![allow(renamed_and_removed_lints)] // @@REMOVE_WHEN(ci_arti_stable)
#![allow(unknown_lints)] // @@REMOVE_WHEN(ci_arti_nightly)
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::cargo_common_metadata)]
#![deny(clippy::cast_lossless)]
#![deny(clippy::checked_conversions)]
#![warn(clippy::cognitive_complexity)]
#![deny(clippy::debug_assert_with_mut_call)]
#![deny(clippy::exhaustive_enums)]
#![deny(clippy::exhaustive_structs)]
#![deny(clippy::expl_impl_clone_on_copy)]
#![deny(clippy::fallible_impl_from)]
#![deny(clippy::implicit_clone)]
#![deny(clippy::large_stack_arrays)]
#![warn(clippy::manual_ok_or)]
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::option_option)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![warn(clippy::rc_buffer)]
#![deny(clippy::ref_option_ref)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::trait_duplication_in_bounds)]
#![deny(clippy::unchecked_duration_subtraction)]
#![warn(clippy::unseparated_literal_suffix)]
#![deny(clippy::mod_module_files)]
#![allow(clippy::let_unit_value)] // This can reasonably be done for explicitness
#![allow(clippy::uninlined_format_args)]
//! <!-- @@ end lint list maintained by maint/add_warning @@ -->

mod cli;
mod tls;

use std::io::IsTerminal as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use anyhow::Context;
use clap::Parser;
use tor_relaylink::config;
use tor_relaylink::config::{DEFAULT_LOG_LEVEL, RelayLinkConfig};
use tor_relaylink::netloop::{ConnectionFactory, LoopHandle, NetLoop, run_acceptor};
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // Register a basic stderr logger until we have enough info to configure
    // the main logger. Unlike the full config-driven logger below, this one
    // always includes timestamps.
    let level: tracing::metadata::Level = cli
        .global
        .log_level
        .map(Into::into)
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse("")
        .expect("empty filter directive should be trivially parsable");
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .finish()
        .init();

    match cli.command {
        #[allow(clippy::print_stdout)]
        cli::Commands::BuildInfo => {
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
        }
        cli::Commands::Run(args) => start_relay(args, cli.global)?,
    }

    Ok(())
}

/// Loads configuration, reconfigures logging to match it, and runs the
/// relay until a shutdown signal arrives.
#[allow(clippy::needless_pass_by_value)]
fn start_relay(_args: cli::RunArgs, global_args: cli::GlobalArgs) -> anyhow::Result<()> {
    let paths: Vec<_> = global_args.config.iter().map(|p| p.0.clone().into()).collect();
    let config = RelayLinkConfig::load(&paths)
        .context("failed to load configuration")?
        .apply_overrides(&global_args.options)
        .context("failed to apply -o overrides")?;

    let filter = EnvFilter::builder()
        .parse(&config.logging.console)
        .with_context(|| format!("failed to parse console logging directive {:?}", config.logging.console))?;
    let logger = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .finish();
    let logger = tracing::Dispatch::new(logger);

    tracing::dispatcher::with_default(&logger, || run_relay(&config))
}

/// Builds the shared TLS/link material, starts one [`NetLoop`] per
/// configured worker plus a dedicated acceptor thread, and blocks until
/// Ctrl-C.
fn run_relay(config: &RelayLinkConfig) -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider was already installed"))?;

    let (identity_cert, link_cert) = tls::generate_link_certs().context("failed to generate link TLS certificates")?;
    let certs_payload = tls::build_certs_payload(&identity_cert, &link_cert);
    let server_config = tls::build_server_config(&link_cert).context("failed to build server TLS configuration")?;
    let client_config = tls::build_client_config();

    let factory = Arc::new(ConnectionFactory {
        server_config: Some(server_config),
        client_config: Some(client_config),
        certs_payload,
        auth_methods: config.auth.preferred_methods.clone(),
        signer: None,
        rate: config.rate_limit.clone(),
    });

    let num_loops = config.eventloop.num_eventloops.max(1);
    let mut loops = Vec::with_capacity(num_loops);
    for index in 0..num_loops {
        loops.push(NetLoop::new(index, Arc::clone(&factory)).context("failed to create a worker event loop")?);
    }

    let handles: Vec<LoopHandle> = loops.iter().map(NetLoop::handle).collect();
    let shutdown_flags: Vec<Arc<AtomicBool>> = loops.iter().map(NetLoop::shutdown_flag).collect();

    let mut threads: Vec<JoinHandle<()>> = Vec::with_capacity(num_loops);
    for mut netloop in loops {
        threads.push(std::thread::spawn(move || netloop.run()));
    }

    let listen_addrs: Vec<SocketAddr> = config.relay.listen.addrs().copied().collect();
    let acceptor_shutdown = Arc::new(AtomicBool::new(false));
    let mut acceptor_threads = Vec::with_capacity(listen_addrs.len());
    for addr in listen_addrs {
        let listener = mio::net::TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "listening for incoming OR connections");
        let targets = handles.clone();
        let shutdown = Arc::clone(&acceptor_shutdown);
        acceptor_threads.push(std::thread::spawn(move || {
            if let Err(err) = run_acceptor(listener, targets, shutdown) {
                warn!(%err, "acceptor thread exited with an error");
            }
        }));
    }

    wait_for_shutdown_signal().context("failed to wait for a shutdown signal")?;
    info!("received a shutdown signal; stopping the relay");

    acceptor_shutdown.store(true, Ordering::SeqCst);
    for flag in &shutdown_flags {
        flag.store(true, Ordering::SeqCst);
    }
    for thread in acceptor_threads {
        let _ = thread.join();
    }
    for thread in threads {
        let _ = thread.join();
    }

    Ok(())
}

/// Blocks until Ctrl-C (`SIGINT`) arrives. This crate has no async runtime
/// to hand a future to, so the wait is a plain blocking channel recv from a
/// `ctrlc`-style handler installed once at startup.
fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install a Ctrl-C handler")?;
    rx.recv().context("Ctrl-C channel closed unexpectedly")?;
    Ok(())
}
