//! Byte-stream transport with line-delimited replies.
//!
//! The sequencer only needs two things from the link: push bytes out, and
//! wait (with a deadline) for the next reply line. [`LineTransport`] provides
//! both on top of any reader/writer pair by running the read path on its own
//! thread and queueing complete lines on a channel.

pub mod line;

use {
    crate::{
        error::{Error, Result},
        port::Port,
    },
    line::LineBuffer,
    log::trace,
    std::{
        io::{self, Read, Write},
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
            mpsc::{self, Receiver, RecvTimeoutError, Sender},
        },
        thread,
        time::Duration,
    },
};

/// The two operations the upgrade protocol needs from a link.
pub trait Transport {
    /// Send raw bytes.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next line, returned without terminator.
    fn read_line(&mut self, timeout: Duration) -> Result<String>;

    /// Drop lines that arrived but were not read yet.
    fn discard_pending(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_bytes(data)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String> {
        (**self).read_line(timeout)
    }

    fn discard_pending(&mut self) {
        (**self).discard_pending();
    }
}

/// Stops the reader thread when the transport goes away.
#[derive(Debug)]
struct ReaderGuard(Arc<AtomicBool>);

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0
            .store(false, Ordering::Relaxed);
    }
}

/// Transport writing on the caller's thread and reading on a background one.
///
/// The reader thread is the only producer of the line channel and the
/// transport the only consumer.
pub struct LineTransport<W: Write> {
    writer: W,
    lines: Receiver<io::Result<String>>,
    /// Reader failure seen while discarding, reported by the next read.
    failure: Option<io::Error>,
    _reader: ReaderGuard,
}

impl<W: Write> LineTransport<W> {
    /// Build a transport from a writer and an independent reader.
    pub fn new<R>(writer: W, reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        thread::spawn(move || read_loop(reader, &tx, &flag));

        Self {
            writer,
            lines: rx,
            failure: None,
            _reader: ReaderGuard(running),
        }
    }

    /// Stop reading and return the writer.
    pub fn into_writer(self) -> W {
        self.writer
    }
}

impl<P: Port> LineTransport<P> {
    /// Build a transport over a port, reading from a cloned handle.
    pub fn from_port(port: P) -> Result<Self> {
        let reader = port.try_clone_reader()?;
        Ok(Self::new(port, reader))
    }
}

impl<W: Write> Transport for LineTransport<W> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer
            .write_all(data)
            .and_then(|()| self.writer.flush())
            .map_err(|e| Error::Transport(format!("write failed: {e}")))
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String> {
        if let Some(e) = self.failure.take() {
            return Err(Error::Transport(format!("read failed: {e}")));
        }
        match self.lines.recv_timeout(timeout) {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(e)) => Err(Error::Transport(format!("read failed: {e}"))),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout(format!(
                "no reply within {} ms",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Transport("connection closed".into()))
            },
        }
    }

    fn discard_pending(&mut self) {
        let mut dropped = 0usize;
        while self.failure.is_none() {
            match self.lines.try_recv() {
                Ok(Ok(line)) => {
                    trace!("Discarding {line:?}");
                    dropped += 1;
                },
                Ok(Err(e)) => self.failure = Some(e),
                Err(_) => break,
            }
        }
        if dropped > 0 {
            trace!("Discarded {dropped} pending lines");
        }
    }
}

fn read_loop<R: Read>(mut reader: R, tx: &Sender<io::Result<String>>, running: &AtomicBool) {
    let mut buffer = LineBuffer::new();
    let mut chunk = [0u8; 256];

    while running.load(Ordering::Relaxed) {
        match reader.read(&mut chunk) {
            Ok(0) => {
                trace!("Reader reached end of stream");
                break;
            },
            Ok(n) => {
                buffer.extend(&chunk[..n]);
                while let Some(line) = buffer.next_line() {
                    trace!("<- {line:?}");
                    if tx.send(Ok(line)).is_err() {
                        return;
                    }
                }
            },
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) => {},
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            },
        }
    }
}
