//! scanflash CLI - Command-line tool for upgrading keyboard key scanner firmware.
//!
//! ## Features
//!
//! - Upgrade the left or right key scanner over the keyboard's serial port
//! - Inspect firmware images (chunk layout, CRC-32, seal header)
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::{debug, warn};
use scanflash::{ImageFormat, Side};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;

use config::Config;

/// Exit code for runtime failures.
const EXIT_FAILURE: u8 = 1;
/// Exit code for bad invocations.
const EXIT_USAGE: u8 = 2;
/// Exit code after Ctrl-C (128 + SIGINT).
const EXIT_CANCELLED: u8 = 130;

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The invocation is incomplete or inconsistent.
    #[error("{0}")]
    Usage(String),
    /// The user aborted.
    #[error("{0}")]
    Cancelled(String),
}

/// scanflash - Upgrade keyboard key scanner firmware over serial.
///
/// Environment variables:
///   SCANFLASH_PORT              - Serial port of the keyboard
///   SCANFLASH_BAUD              - Baud rate (default: 115200)
///   SCANFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "scanflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port of the keyboard.
    #[arg(short, long, global = true, env = "SCANFLASH_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "SCANFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (never prompt).
    #[arg(long, global = true, env = "SCANFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Image file encodings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// `.bin` files are raw, everything else is hex text.
    #[default]
    Auto,
    /// Hex text.
    Hex,
    /// Raw binary.
    Bin,
}

impl From<FormatArg> for ImageFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Auto => Self::Auto,
            FormatArg::Hex => Self::Hex,
            FormatArg::Bin => Self::Binary,
        }
    }
}

/// Keyboard halves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SideArg {
    /// Left half.
    Left,
    /// Right half.
    Right,
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Left => Self::Left,
            SideArg::Right => Self::Right,
        }
    }
}

/// Options of the `upgrade` command.
#[derive(clap::Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
struct UpgradeArgs {
    /// Firmware image (hex text or raw binary).
    image: PathBuf,

    /// Image file encoding.
    #[arg(long, value_enum, default_value_t = FormatArg::Auto)]
    format: FormatArg,

    /// Keyboard half to upgrade [default: left].
    #[arg(long, value_enum)]
    side: Option<SideArg>,

    /// Seconds to wait for the upgrade button after `start` [default: 4, 30 with --wait-ready].
    #[arg(long, value_name = "SECS")]
    button_window: Option<f64>,

    /// Poll the device until the upgrade button was held, instead of waiting a fixed window.
    #[arg(long)]
    wait_ready: bool,

    /// Milliseconds between readiness polls [default: 1000].
    #[arg(long, value_name = "MS")]
    ready_interval: Option<u64>,

    /// Milliseconds to wait for each acknowledgment line [default: 5000].
    #[arg(long, value_name = "MS")]
    ack_timeout: Option<u64>,

    /// Resend a chunk up to N times when its acknowledgment times out.
    #[arg(long, value_name = "N")]
    retries: Option<usize>,

    /// Fail when the device answers `false`.
    #[arg(long)]
    strict_acks: bool,

    /// Take the flash layout from the device's `getInfo` reply.
    #[arg(long)]
    query_info: bool,

    /// Program area base address (e.g., 0x5000).
    #[arg(long, value_name = "ADDR", value_parser = parse_u32)]
    flash_start: Option<u32>,

    /// Skip the transfer when the device reports it already runs this image.
    #[arg(long)]
    skip_if_current: bool,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upgrade the key scanner firmware.
    Upgrade(UpgradeArgs),

    /// Show how an image will be written.
    Info {
        /// Firmware image (hex text or raw binary).
        image: PathBuf,

        /// Image file encoding.
        #[arg(long, value_enum, default_value_t = FormatArg::Auto)]
        format: FormatArg,

        /// Output as JSON.
        #[arg(long)]
        json: bool,

        /// Program area base address (e.g., 0x5000).
        #[arg(long, value_name = "ADDR", value_parser = parse_u32)]
        flash_start: Option<u32>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a `u32` given in hex (`0x` prefix) or decimal.
fn parse_u32(s: &str) -> Result<u32, String> {
    // Support underscore separators like 0x00_00_50_00
    let s: String = s
        .trim()
        .chars()
        .filter(|c| *c != '_')
        .collect();
    let parsed = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.map_err(|e| format!("Invalid address: {e}"))
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => EXIT_USAGE,
                CliError::Cancelled(_) => EXIT_CANCELLED,
            };
        }
        if let Some(lib_err) = cause.downcast_ref::<scanflash::Error>() {
            return if lib_err.is_cancelled() {
                EXIT_CANCELLED
            } else {
                EXIT_FAILURE
            };
        }
    }
    EXIT_FAILURE
}

fn init_logging(cli: &Cli) {
    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        warn!("Could not install Ctrl-C handler: {e}");
    }
    scanflash::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Upgrade(args) => commands::upgrade::cmd_upgrade(cli, &config, args),
        Commands::Info {
            image,
            format,
            json,
            flash_start,
        } => commands::info::cmd_info(image, (*format).into(), *json, *flash_start, &config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "scanflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
