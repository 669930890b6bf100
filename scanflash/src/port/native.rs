//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{DataBits, FlowControl, Parity, Port, SerialConfig, StopBits},
    },
    log::{debug, warn},
    serialport::ClearBuffer,
    std::{
        io::{Read, Write},
        thread,
        time::Duration,
    },
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(config.flow_control.into())
            .open()?;

        debug!(
            "Opened {} at {} baud",
            config.port_name, config.baud_rate
        );

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
        })
    }

    /// Open a serial port, retrying a few times while the device enumerates.
    pub fn open_with_retry(config: &SerialConfig) -> Result<Self> {
        const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
        const OPEN_RETRY_DELAY: Duration = Duration::from_millis(500);

        let mut last_error = None;

        for attempt in 1..=MAX_OPEN_PORT_ATTEMPTS {
            match Self::open(config) {
                Ok(port) => {
                    if attempt > 1 {
                        debug!("Port opened on attempt {attempt}");
                    }
                    return Ok(port);
                },
                Err(e) => {
                    warn!(
                        "Failed to open port {} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}",
                        config.port_name
                    );
                    last_error = Some(e);

                    if attempt < MAX_OPEN_PORT_ATTEMPTS {
                        thread::sleep(OPEN_RETRY_DELAY);
                    }
                },
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Transport("could not open port".into())))
    }

    fn closed() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for NativePort {
    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| Error::Transport("port closed".into()))?;
        Ok(Box::new(PortReader(port.try_clone()?)))
    }

    fn close(&mut self) -> Result<()> {
        // Take ownership of the port and let it drop (close)
        self.port
            .take();
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(std::io::Write::flush)
    }
}

/// Read half handed to the transport's reader thread.
struct PortReader(Box<dyn serialport::SerialPort>);

impl Read for PortReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

// Type conversions from our types to serialport types

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => Self::Seven,
            DataBits::Eight => Self::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => Self::None,
            Parity::Odd => Self::Odd,
            Parity::Even => Self::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => Self::One,
            StopBits::Two => Self::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => Self::None,
            FlowControl::Hardware => Self::Hardware,
            FlowControl::Software => Self::Software,
        }
    }
}
