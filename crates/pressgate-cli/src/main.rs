// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pressgate — IPP infrastructure proxy for PCL and IPP Everywhere printers.
//
// Entry point.  Parses the command line, initialises logging, wires the
// signal handler into the shutdown token, and runs the proxy core.  Exits 0
// on a clean shutdown and 1 when registration (or anything before it)
// fails.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use pressgate_core::config::ProxyConfig;
use pressgate_core::error::PressgateError;
use pressgate_proxy::Shutdown;

/// Environment variable consulted when `-p` is not given.
const PASSWORD_ENV: &str = "PRESSGATE_PASSWORD";

#[derive(Debug, Parser)]
#[command(name = "pressgate", version, about = "IPP infrastructure proxy")]
struct Args {
    /// Infrastructure printer URI (ipp:// or ipps://; may point at /ipp/system).
    printer_uri: String,

    /// Local printer device URI (ipp://, ipps://, or socket://).
    #[arg(short = 'd', long = "device-uri")]
    device_uri: String,

    /// Desired print format (MIME media type).
    #[arg(short = 'm', long = "output-format")]
    output_format: Option<String>,

    /// Username for authentication.
    #[arg(short = 'u', long = "username")]
    username: Option<String>,

    /// Password for authentication (also PRESSGATE_PASSWORD).
    #[arg(short = 'p', long = "password")]
    password: Option<String>,

    /// Be verbose; repeat for wire-level IPP dumps.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "pressgate=debug,info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose);

    // Install the rustls crypto provider before any TLS handshake happens.
    // An Err means a provider is already installed, which is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let username = args
        .username
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "anonymous".into());
    let password = args.password.or_else(|| std::env::var(PASSWORD_ENV).ok());

    let config = ProxyConfig {
        printer_uri: args.printer_uri,
        device_uri: args.device_uri,
        output_format: args.output_format,
        username,
        password,
    };

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    info!(printer = %config.printer_uri, device = %config.device_uri, "pressgate starting");

    match pressgate_proxy::run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        // A signal during startup retries is still a clean shutdown.
        Err(PressgateError::Shutdown) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "proxy failed");
            ExitCode::FAILURE
        }
    }
}

/// SIGINT/SIGTERM (and SIGHUP on Unix) flip the shutdown token; the proxy
/// drains and deregisters on its own time.
fn spawn_signal_handler(shutdown: Shutdown) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut interrupt =
                signal(SignalKind::interrupt()).expect("installing SIGINT handler");
            let mut terminate =
                signal(SignalKind::terminate()).expect("installing SIGTERM handler");
            let mut hangup = signal(SignalKind::hangup()).expect("installing SIGHUP handler");

            tokio::select! {
                _ = interrupt.recv() => {}
                _ = terminate.recv() => {}
                _ = hangup.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("shutdown requested");
        shutdown.trigger();
    });
}
