//! Upgrade command implementation.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use scanflash::upgrade::{DEFAULT_READY_DEADLINE, DEFAULT_READY_INTERVAL};
use scanflash::{
    AckPolicy, ButtonWait, DEFAULT_BAUD, FirmwareImage, InfoSource, LineTransport, NativePort,
    Port, SerialConfig, Side, UpgradeConfig, Upgrader,
};
use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, UpgradeArgs, use_fancy_output, was_interrupted};

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

/// Resolve the serial port: command line or environment first, then config.
pub(crate) fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .ok_or_else(|| {
            usage_err(
                "no serial port given; use --port, SCANFLASH_PORT or `serial` in the [connection] config section",
            )
        })
}

/// Merge command line options over config file settings.
fn upgrade_config(args: &UpgradeArgs, config: &Config) -> Result<UpgradeConfig> {
    let settings = &config.upgrade;
    let mut upgrade = UpgradeConfig::default();

    upgrade.side = match (args.side, settings.side.as_deref()) {
        (Some(side), _) => side.into(),
        (None, Some(name)) => name
            .parse::<Side>()
            .map_err(|e| usage_err(e.to_string()))?,
        (None, None) => Side::default(),
    };

    let window = args
        .button_window
        .or(settings.button_window_secs)
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|_| usage_err(format!("invalid button window: {secs} seconds")))
        })
        .transpose()?;
    if args.wait_ready || settings.wait_ready {
        let interval = match args
            .ready_interval
            .or(settings.ready_interval_ms)
        {
            Some(0) => return Err(usage_err("readiness poll interval must be non-zero")),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_READY_INTERVAL,
        };
        upgrade.button_wait = ButtonWait::PollReady {
            interval,
            deadline: window.unwrap_or(DEFAULT_READY_DEADLINE),
        };
    } else if let Some(window) = window {
        upgrade.button_wait = ButtonWait::Window(window);
    }
    if let Some(ms) = args.ack_timeout.or(settings.ack_timeout_ms) {
        if ms == 0 {
            return Err(usage_err("acknowledgment timeout must be non-zero"));
        }
        upgrade.ack_timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = args.retries.or(settings.retries) {
        upgrade.write_retries = retries;
    }

    if args.strict_acks || settings.strict_acks {
        upgrade.ack_policy = AckPolicy::RejectFalse;
    }
    upgrade.skip_if_current = args.skip_if_current || settings.skip_if_current;
    // Skipping compares against the program the device reports
    if args.query_info || settings.query_info || upgrade.skip_if_current {
        upgrade.info_source = InfoSource::Device;
    }

    upgrade.device_info = config.device.device_info();
    if let Some(flash_start) = args.flash_start {
        upgrade.device_info.flash_start = flash_start;
    }

    Ok(upgrade)
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("upgrade aborted".into()).into()
            } else {
                usage_err(format!("confirmation prompt failed: {io_err}"))
            }
        },
    }
}

fn confirm(cli: &Cli, args: &UpgradeArgs, port: &str, side: Side) -> Result<()> {
    let interactive = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
    if args.yes || cli.non_interactive || !interactive {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Upgrade the {side} key scanner on {port}?"
        ))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("upgrade aborted".into()).into())
    }
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn load_image(path: &Path, args: &UpgradeArgs) -> Result<FirmwareImage> {
    FirmwareImage::from_file(path, args.format.into())
        .with_context(|| format!("failed to load image {}", path.display()))
}

/// Upgrade command implementation.
pub(crate) fn cmd_upgrade(cli: &Cli, config: &Config, args: &UpgradeArgs) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading image {}",
            style("📦").cyan(),
            args.image.display()
        );
    }
    let image = load_image(&args.image, args)?;
    let upgrade = upgrade_config(args, config)?;
    let port_name = resolve_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);

    if !cli.quiet {
        let chunks = image
            .len()
            .div_ceil(upgrade.chunk_size);
        eprintln!(
            "{} {} bytes in {chunks} chunks from 0x{:08X}",
            style("ℹ").blue(),
            image.len(),
            upgrade.device_info.flash_start
        );
        eprintln!(
            "{} Using {} at {baud} baud",
            style("🔌").cyan(),
            style(&port_name).cyan()
        );
    }

    confirm(cli, args, &port_name, upgrade.side)?;
    if was_interrupted() {
        return Err(CliError::Cancelled("upgrade aborted".into()).into());
    }

    let mut port = NativePort::open_with_retry(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("failed to open {port_name}"))?;
    if let Err(e) = port.clear_buffers() {
        warn!("Failed to clear buffers of {}: {e}", port.name());
    }
    let transport = LineTransport::from_port(port)?;

    if !cli.quiet {
        eprintln!(
            "{} Press the upgrade button on the {} half when asked",
            style("⏳").yellow(),
            upgrade.side
        );
    }

    let pb = progress_bar(cli, image.len());
    pb.set_message("upgrading");

    let mut upgrader = Upgrader::new(transport, upgrade);
    let result = upgrader.run(&image, |written, _total| {
        pb.set_position(written as u64);
    });

    let mut port = upgrader
        .into_transport()
        .into_writer();
    if let Err(e) = port.close() {
        warn!("Failed to close {}: {e}", port.name());
    }

    match result {
        Ok(report) => {
            pb.finish_and_clear();
            if !cli.quiet {
                if report.skipped {
                    eprintln!(
                        "{} Device already runs this image (crc {:#010x}), nothing written",
                        style("✓").green(),
                        report.device_info.program_crc
                    );
                } else {
                    eprintln!(
                        "{} Upgrade complete: {} chunks ({} bytes) written",
                        style("✓").green(),
                        report.chunks_written,
                        report.bytes_written
                    );
                }
            }
            Ok(())
        },
        Err(err) => {
            pb.abandon();
            if let Some(phase) = err.failed_phase() {
                eprintln!(
                    "{} Upgrade failed during {}",
                    style("✗").red(),
                    style(phase).red().bold()
                );
            }
            Err(err.into())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["scanflash"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn upgrade_args(cli: &Cli) -> &UpgradeArgs {
        match &cli.command {
            crate::Commands::Upgrade(args) => args,
            _ => panic!("expected upgrade"),
        }
    }

    #[test]
    fn test_upgrade_config_defaults() {
        let cli = parse(&["upgrade", "fw.hex"]);
        let upgrade = upgrade_config(upgrade_args(&cli), &Config::default()).unwrap();
        assert_eq!(upgrade, UpgradeConfig::default());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = parse(&[
            "upgrade",
            "fw.hex",
            "--side",
            "left",
            "--retries",
            "1",
            "--flash-start",
            "0x7000",
        ]);
        let mut config = Config::default();
        config.upgrade.side = Some("right".into());
        config.upgrade.retries = Some(4);
        config.upgrade.ack_timeout_ms = Some(250);
        config.device.flash_start = Some(0x6000);

        let upgrade = upgrade_config(upgrade_args(&cli), &config).unwrap();
        assert_eq!(upgrade.side, Side::Left);
        assert_eq!(upgrade.write_retries, 1);
        assert_eq!(upgrade.ack_timeout, Duration::from_millis(250));
        assert_eq!(upgrade.device_info.flash_start, 0x7000);
    }

    #[test]
    fn test_config_flags_enable_features() {
        let cli = parse(&["upgrade", "fw.hex"]);
        let mut config = Config::default();
        config.upgrade.side = Some("right".into());
        config.upgrade.strict_acks = true;
        config.upgrade.query_info = true;
        config.upgrade.button_window_secs = Some(1.5);

        let upgrade = upgrade_config(upgrade_args(&cli), &config).unwrap();
        assert_eq!(upgrade.side, Side::Right);
        assert_eq!(upgrade.ack_policy, AckPolicy::RejectFalse);
        assert_eq!(upgrade.info_source, InfoSource::Device);
        assert_eq!(
            upgrade.button_wait,
            ButtonWait::Window(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_skip_if_current_queries_device() {
        let cli = parse(&["upgrade", "fw.hex", "--skip-if-current"]);
        let upgrade = upgrade_config(upgrade_args(&cli), &Config::default()).unwrap();
        assert!(upgrade.skip_if_current);
        assert_eq!(upgrade.info_source, InfoSource::Device);

        let cli = parse(&["upgrade", "fw.hex"]);
        let mut config = Config::default();
        config.upgrade.skip_if_current = true;
        let upgrade = upgrade_config(upgrade_args(&cli), &config).unwrap();
        assert_eq!(upgrade.info_source, InfoSource::Device);
    }

    #[test]
    fn test_wait_ready_polls_with_defaults() {
        let cli = parse(&["upgrade", "fw.hex", "--wait-ready"]);
        let upgrade = upgrade_config(upgrade_args(&cli), &Config::default()).unwrap();
        assert_eq!(
            upgrade.button_wait,
            ButtonWait::PollReady {
                interval: DEFAULT_READY_INTERVAL,
                deadline: DEFAULT_READY_DEADLINE,
            }
        );

        // The button window becomes the polling deadline
        let cli = parse(&[
            "upgrade",
            "fw.hex",
            "--wait-ready",
            "--ready-interval",
            "250",
            "--button-window",
            "10",
        ]);
        let upgrade = upgrade_config(upgrade_args(&cli), &Config::default()).unwrap();
        assert_eq!(
            upgrade.button_wait,
            ButtonWait::PollReady {
                interval: Duration::from_millis(250),
                deadline: Duration::from_secs(10),
            }
        );

        let cli = parse(&["upgrade", "fw.hex", "--ready-interval", "0"]);
        let mut config = Config::default();
        config.upgrade.wait_ready = true;
        assert!(upgrade_config(upgrade_args(&cli), &config).is_err());
    }

    #[test]
    fn test_invalid_settings_are_usage_errors() {
        let cli = parse(&["upgrade", "fw.hex"]);
        let mut config = Config::default();
        config.upgrade.button_window_secs = Some(-1.0);
        let err = upgrade_config(upgrade_args(&cli), &config).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));

        let cli = parse(&["upgrade", "fw.hex"]);
        let mut config = Config::default();
        config.upgrade.side = Some("middle".into());
        assert!(upgrade_config(upgrade_args(&cli), &config).is_err());

        let cli = parse(&["upgrade", "fw.hex", "--ack-timeout", "0"]);
        assert!(upgrade_config(upgrade_args(&cli), &Config::default()).is_err());
    }

    #[test]
    fn test_resolve_port() {
        let cli = parse(&["--port", "/dev/ttyACM3", "upgrade", "fw.hex"]);
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyACM0".into());
        assert_eq!(resolve_port(&cli, &config).unwrap(), "/dev/ttyACM3");

        let cli = parse(&["upgrade", "fw.hex"]);
        if cli.port.is_none() {
            assert_eq!(resolve_port(&cli, &config).unwrap(), "/dev/ttyACM0");

            let err = resolve_port(&cli, &Config::default()).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<CliError>(),
                Some(CliError::Usage(_))
            ));
        }
    }
}
