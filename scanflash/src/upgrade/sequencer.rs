//! Key scanner upgrade command sequencer.
//!
//! Drives one upgrade session over a [`Transport`]:
//!
//! ```text
//! start ─1 ack─> (button window | isReady polls) ─> begin ─2 acks─>
//!     getInfo ─2 acks─> sendWrite × N ─2 acks each─> finish ─2 acks─> done
//! ```
//!
//! Exactly one command is in flight at any time. Any missing acknowledgment,
//! link failure or cancellation ends the session in
//! [`Phase::Failed`](super::Phase::Failed).

use {
    super::{phase::Phase, session::ProtocolSession},
    crate::{
        error::{Error, Result},
        image::FirmwareImage,
        protocol::{
            chunk::{CHUNK_SIZE, Chunker},
            command::{Command, DeviceInfo, Side, is_ready, is_rejection},
        },
        transport::Transport,
    },
    log::{debug, error, info, trace, warn},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

/// Time the operator gets to press the button after `start`.
pub const DEFAULT_BUTTON_WINDOW: Duration = Duration::from_secs(4);

/// How long to wait for each acknowledgment line.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between two `isReady` polls.
pub const DEFAULT_READY_INTERVAL: Duration = Duration::from_secs(1);

/// How long `isReady` polling waits for the button before giving up.
pub const DEFAULT_READY_DEADLINE: Duration = Duration::from_secs(30);

/// Granularity of interrupt checks while waiting for the button.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How acknowledgment lines are judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AckPolicy {
    /// Count lines, ignore their content.
    #[default]
    CountOnly,
    /// Fail when a line reads `false`.
    RejectFalse,
}

/// Where the device layout comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InfoSource {
    /// Use [`UpgradeConfig::device_info`]; the `getInfo` reply is only
    /// counted.
    #[default]
    Configured,
    /// Parse the first `getInfo` reply line.
    Device,
}

/// How the sequencer waits for the operator between `start` and `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ButtonWait {
    /// Sleep for a fixed window without talking to the device.
    Window(Duration),
    /// Send `upgrade.isReady` every `interval` until the device answers
    /// `true`. Fails with a timeout once `deadline` has passed.
    PollReady {
        /// Pause between polls.
        interval: Duration,
        /// Total time allowed for the button press.
        deadline: Duration,
    },
}

impl Default for ButtonWait {
    fn default() -> Self {
        Self::Window(DEFAULT_BUTTON_WINDOW)
    }
}

/// Upgrade session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeConfig {
    /// Keyboard half to upgrade.
    pub side: Side,
    /// Payload bytes per write frame.
    pub chunk_size: usize,
    /// Wait between `start` and `begin`.
    pub button_wait: ButtonWait,
    /// Deadline for each acknowledgment line.
    pub ack_timeout: Duration,
    /// Extra attempts for a chunk whose acknowledgments time out.
    pub write_retries: usize,
    /// Acknowledgment validation.
    pub ack_policy: AckPolicy,
    /// Device layout source.
    pub info_source: InfoSource,
    /// Layout used with [`InfoSource::Configured`].
    pub device_info: DeviceInfo,
    /// Skip the transfer when the image seal matches the flashed program.
    ///
    /// The flashed program is always taken from the `getInfo` reply, whatever
    /// the [`info_source`](Self::info_source).
    pub skip_if_current: bool,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            side: Side::Left,
            chunk_size: CHUNK_SIZE,
            button_wait: ButtonWait::default(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            write_retries: 0,
            ack_policy: AckPolicy::CountOnly,
            info_source: InfoSource::Configured,
            device_info: DeviceInfo::default(),
            skip_if_current: false,
        }
    }
}

impl UpgradeConfig {
    /// Set the side to upgrade.
    #[must_use]
    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    /// Set the chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Wait a fixed window for the button.
    #[must_use]
    pub fn with_button_window(mut self, window: Duration) -> Self {
        self.button_wait = ButtonWait::Window(window);
        self
    }

    /// Poll `upgrade.isReady` for the button instead of waiting blindly.
    #[must_use]
    pub fn with_ready_poll(mut self, interval: Duration, deadline: Duration) -> Self {
        self.button_wait = ButtonWait::PollReady { interval, deadline };
        self
    }

    /// Set the acknowledgment timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the number of chunk write retries.
    #[must_use]
    pub fn with_write_retries(mut self, retries: usize) -> Self {
        self.write_retries = retries;
        self
    }

    /// Set the acknowledgment policy.
    #[must_use]
    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    /// Set where the device layout comes from.
    #[must_use]
    pub fn with_info_source(mut self, source: InfoSource) -> Self {
        self.info_source = source;
        self
    }

    /// Set the configured device layout.
    #[must_use]
    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = info;
        self
    }

    /// Enable or disable skipping an image the device already runs.
    #[must_use]
    pub fn with_skip_if_current(mut self, skip: bool) -> Self {
        self.skip_if_current = skip;
        self
    }
}

/// Outcome of a completed upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpgradeReport {
    /// Layout the image was written against.
    pub device_info: DeviceInfo,
    /// Chunks acknowledged.
    pub chunks_written: usize,
    /// Image bytes acknowledged.
    pub bytes_written: usize,
    /// The transfer was skipped because the device already runs the image.
    pub skipped: bool,
}

type InterruptChecker = Box<dyn Fn() -> bool + Send>;

/// Runs upgrade sessions over a transport.
pub struct Upgrader<T: Transport> {
    transport: T,
    config: UpgradeConfig,
    session: ProtocolSession,
    interrupted: InterruptChecker,
}

impl<T: Transport> Upgrader<T> {
    /// Create an upgrader.
    ///
    /// Cancellation follows the crate-wide
    /// [interrupt checker](crate::set_interrupt_checker).
    pub fn new(transport: T, config: UpgradeConfig) -> Self {
        Self {
            transport,
            config,
            session: ProtocolSession::default(),
            interrupted: Box::new(crate::is_interrupted_requested),
        }
    }

    /// Use a dedicated cancellation check instead of the crate-wide one.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.interrupted = Box::new(checker);
        self
    }

    /// Session settings.
    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// State of the last (or current) session.
    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Consume the upgrader and return the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Upgrade the key scanner with `image`.
    ///
    /// `progress` is called with `(bytes_written, total_bytes)` after every
    /// acknowledged chunk. On failure the returned error is
    /// [`Error::Failed`], carrying the phase the session stopped in.
    pub fn run<F>(&mut self, image: &FirmwareImage, mut progress: F) -> Result<UpgradeReport>
    where
        F: FnMut(usize, usize),
    {
        if self.config.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk size must be non-zero".into()));
        }

        let total_chunks = image
            .len()
            .div_ceil(self.config.chunk_size);
        self.session = ProtocolSession::new(total_chunks);

        info!(
            "Upgrading {} key scanner: {} bytes in {total_chunks} chunks",
            self.config.side,
            image.len()
        );

        match self.execute(image, &mut progress) {
            Ok(report) => Ok(report),
            Err(e) => {
                let err = self.session.fail(e);
                error!("{err}");
                Err(err)
            },
        }
    }

    fn execute<F>(&mut self, image: &FirmwareImage, progress: &mut F) -> Result<UpgradeReport>
    where
        F: FnMut(usize, usize),
    {
        self.session.advance(Phase::Starting)?;
        // Console output queued before the session would be taken for acks
        self.transport.discard_pending();
        self.command(Command::Start)?;

        self.session.advance(Phase::AwaitingButton)?;
        self.wait_for_button()?;

        self.session.advance(Phase::EnteringBootloader)?;
        self.command(Command::Begin(self.config.side))?;

        self.session.advance(Phase::QueryingInfo)?;
        let replies = self.command(Command::GetInfo)?;
        let from_device =
            self.config.info_source == InfoSource::Device || self.config.skip_if_current;
        let device_info = if from_device {
            DeviceInfo::parse(replies.first().map_or("", String::as_str))?
        } else {
            self.config.device_info
        };
        debug!(
            "Device: hardware {} flash start 0x{:08X} program version {:#x} crc {:#010x}",
            device_info.hardware_version,
            device_info.flash_start,
            device_info.program_version,
            device_info.program_crc
        );

        self.session.advance(Phase::Transferring)?;
        let skipped = self.config.skip_if_current
            && image
                .seal()
                .is_some_and(|seal| seal.program_crc == device_info.program_crc);
        if skipped {
            info!(
                "Device already runs this program (crc {:#010x}), nothing to write",
                device_info.program_crc
            );
        } else {
            self.transfer(image, device_info.flash_start, progress)?;
        }

        self.session.advance(Phase::Finishing)?;
        self.command(Command::Finish)?;

        self.session.advance(Phase::Completed)?;
        info!("Upgrade complete");

        Ok(UpgradeReport {
            device_info,
            chunks_written: self.session.chunks_written(),
            bytes_written: self.session.bytes_sent(),
            skipped,
        })
    }

    fn transfer<F>(&mut self, image: &FirmwareImage, flash_start: u32, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let chunker = Chunker::new(image.as_bytes(), self.config.chunk_size, flash_start)?;
        let total_chunks = chunker.len();

        for chunk in chunker.chunks() {
            debug!(
                "Chunk {}/{total_chunks}: {} bytes at 0x{:08X}",
                chunk.index + 1,
                chunk.data.len(),
                chunk.address
            );
            let wire = Command::send_write(&chunk.to_frame().encode());
            self.write_chunk(&wire, chunk.address)?;

            self.session.chunk_written(chunk.data.len());
            progress(self.session.bytes_sent(), image.len());
        }

        Ok(())
    }

    /// Send one write frame, resending it while acknowledgments time out
    /// and retries remain.
    fn write_chunk(&mut self, wire: &[u8], address: u32) -> Result<()> {
        let attempts = self.config.write_retries + 1;
        let mut attempt = 1;

        loop {
            self.check_interrupted()?;
            self.transport.write_bytes(wire)?;

            match self.collect_acks(Command::SendWrite) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_timeout() && attempt < attempts => {
                    warn!(
                        "No acknowledgment for chunk at 0x{address:08X} (attempt {attempt}/{attempts}): {e}"
                    );
                    warn!("Resending...");
                    self.transport.discard_pending();
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a command line and collect its acknowledgment lines.
    fn command(&mut self, command: Command) -> Result<Vec<String>> {
        self.check_interrupted()?;
        debug!("-> {command}");
        self.transport.write_bytes(&command.line())?;
        self.collect_acks(command)
    }

    fn collect_acks(&mut self, command: Command) -> Result<Vec<String>> {
        let expected = command.ack_lines();
        self.session.expect_acks(expected);

        let mut lines = Vec::with_capacity(expected);
        for _ in 0..expected {
            let line = self
                .transport
                .read_line(self.config.ack_timeout)
                .map_err(|e| match e {
                    Error::Timeout(msg) => Error::Timeout(format!(
                        "{command} acknowledgment {}/{expected}: {msg}",
                        lines.len() + 1
                    )),
                    other => other,
                })?;
            trace!("<- {line:?}");
            self.session.ack_received();

            if self.config.ack_policy == AckPolicy::RejectFalse
                && command.can_be_rejected()
                && is_rejection(&line)
            {
                return Err(Error::UnexpectedAcknowledgment(format!(
                    "device rejected {command}: {line:?}"
                )));
            }
            lines.push(line);
        }

        Ok(lines)
    }

    fn wait_for_button(&mut self) -> Result<()> {
        match self.config.button_wait {
            ButtonWait::Window(window) => {
                info!(
                    "Waiting {:.1}s for the upgrade button",
                    window.as_secs_f32()
                );
                self.pause(window)
            },
            ButtonWait::PollReady { interval, deadline } => self.poll_ready(interval, deadline),
        }
    }

    fn poll_ready(&mut self, interval: Duration, deadline: Duration) -> Result<()> {
        info!(
            "Waiting up to {:.1}s for the upgrade button",
            deadline.as_secs_f32()
        );

        let give_up = Instant::now() + deadline;
        let mut polls = 0usize;
        loop {
            let replies = self.command(Command::IsReady)?;
            polls += 1;
            if replies
                .first()
                .is_some_and(|line| is_ready(line))
            {
                debug!("Device ready after {polls} polls");
                return Ok(());
            }

            let now = Instant::now();
            if now >= give_up {
                return Err(Error::Timeout(format!(
                    "device not ready after {polls} polls in {:.1}s",
                    deadline.as_secs_f32()
                )));
            }
            self.pause((give_up - now).min(interval))?;
        }
    }

    /// Sleep, checking for cancellation along the way.
    fn pause(&self, duration: Duration) -> Result<()> {
        let until = Instant::now() + duration;
        loop {
            self.check_interrupted()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            thread::sleep((until - now).min(INTERRUPT_POLL_INTERVAL));
        }
    }

    fn check_interrupted(&self) -> Result<()> {
        if (self.interrupted)() {
            return Err(Error::Cancelled("interrupted by user".into()));
        }
        Ok(())
    }
}
