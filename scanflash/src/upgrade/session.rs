//! Book-keeping for one upgrade run.

use {
    super::phase::Phase,
    crate::error::{Error, Result},
    log::info,
};

/// State of a single upgrade session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolSession {
    phase: Phase,
    bytes_sent: usize,
    chunks_written: usize,
    total_chunks: usize,
    outstanding_acks: usize,
    failed_in: Option<Phase>,
}

impl ProtocolSession {
    /// Start a session for an image split into `total_chunks` chunks.
    pub fn new(total_chunks: usize) -> Self {
        Self {
            total_chunks,
            ..Self::default()
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Image bytes acknowledged by the device.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Chunks acknowledged by the device.
    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    /// Chunks the image was split into.
    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// Acknowledgment lines still expected for the command in flight.
    pub fn outstanding_acks(&self) -> usize {
        self.outstanding_acks
    }

    /// Phase the session was in when it failed.
    pub fn failed_in(&self) -> Option<Phase> {
        self.failed_in
    }

    /// Move to `next`, refusing transitions the state machine does not allow.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        info!("Phase: {} -> {next}", self.phase);
        self.phase = next;
        Ok(())
    }

    pub(crate) fn expect_acks(&mut self, count: usize) {
        self.outstanding_acks = count;
    }

    pub(crate) fn ack_received(&mut self) {
        self.outstanding_acks = self.outstanding_acks.saturating_sub(1);
    }

    pub(crate) fn chunk_written(&mut self, len: usize) {
        self.chunks_written += 1;
        self.bytes_sent += len;
    }

    /// Enter `Failed` and wrap `cause` with where and how far the run got.
    ///
    /// Failing an already failed session keeps the original phase.
    pub fn fail(&mut self, cause: Error) -> Error {
        let phase = match self.failed_in {
            Some(phase) => phase,
            None => {
                let phase = self.phase;
                if !phase.is_terminal() {
                    self.failed_in = Some(phase);
                    self.phase = Phase::Failed;
                }
                phase
            },
        };
        self.outstanding_acks = 0;

        Error::Failed {
            phase,
            chunks_written: self.chunks_written,
            total_chunks: self.total_chunks,
            source: Box::new(cause),
        }
    }
}
