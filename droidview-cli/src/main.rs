//! droidview — command-line driver for the droidview core.
//!
//! ```text
//! droidview shell getprop ro.product.model    Run a shell command
//! droidview tcpip 5555                        Switch adbd to TCP mode
//! droidview push ./server.jar /data/local/tmp/server.jar
//! droidview forward-check 27183               Probe a localabstract forward
//! droidview gen-config                        Print the default config TOML
//! ```
//!
//! If the device has never seen this machine's key, accept the
//! authorization dialog on its screen when prompted.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use droidview_core::{Bridge, KeyPaths};

use crate::config::CliConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "droidview", about = "ADB/scrcpy client core driver")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "droidview.toml")]
    config: PathBuf,

    /// Device endpoint, host:port (overrides the config file).
    #[arg(short, long)]
    device: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a one-shot shell command on the device.
    Shell {
        /// The command and its arguments.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Restart adbd listening on the given TCP port.
    Tcpip { port: u16 },
    /// Push a local file to the device.
    Push {
        local: PathBuf,
        remote: String,
    },
    /// Check whether a localabstract socket on the device accepts
    /// connections (e.g. a running scrcpy server).
    ForwardCheck {
        /// Abstract socket name.
        #[arg(default_value = "scrcpy")]
        name: String,
    },
    /// Print the default configuration to stdout and exit.
    GenConfig,
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Command::GenConfig) {
        match toml::to_string_pretty(&CliConfig::default()) {
            Ok(text) => {
                println!("{text}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    let config = CliConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = cli
        .device
        .unwrap_or_else(|| config.device.endpoint.clone());
    let keys = KeyPaths::in_dir(&config.key_dir());

    info!(endpoint, "connecting");
    let bridge = Bridge::new();
    let session = bridge.session_open(
        &endpoint,
        &keys,
        Some(Box::new(|| {
            eprintln!("Confirm the authorization dialog on the device screen...");
        })),
    )?;

    match cli.command {
        Command::Shell { command } => {
            let output = bridge.shell_command(session, &command.join(" "))?;
            print!("{output}");
        }
        Command::Tcpip { port } => {
            let response = bridge.tcpip_restart(session, port)?;
            print!("{response}");
        }
        Command::Push { local, remote } => {
            let data = std::fs::read(&local)?;
            let mut last = 0;
            bridge.push_file(session, &data, &remote, |percent| {
                if percent >= last + 10 || percent == 100 {
                    last = percent;
                    eprintln!("{percent}%");
                }
            })?;
            println!("pushed {} bytes to {remote}", data.len());
        }
        Command::ForwardCheck { name } => {
            let stream_id = bridge.local_socket_forward(session, &name)?;
            println!("localabstract:{name} accepted (stream {stream_id})");
            bridge.stream_close(session, stream_id)?;
        }
        Command::GenConfig => unreachable!("handled before connecting"),
    }

    bridge.session_close(session);
    Ok(())
}
