//! Key scanner upgrade session.
//!
//! [`Upgrader`] sequences the commands, [`ProtocolSession`] tracks how far a
//! run got and [`Phase`] is the state machine both follow.

pub mod phase;
pub mod session;
pub mod sequencer;

pub use {
    phase::Phase,
    sequencer::{
        AckPolicy, ButtonWait, DEFAULT_ACK_TIMEOUT, DEFAULT_BUTTON_WINDOW, DEFAULT_READY_DEADLINE,
        DEFAULT_READY_INTERVAL, InfoSource, UpgradeConfig, UpgradeReport, Upgrader,
    },
    session::ProtocolSession,
};
