//! Upgrade session phases.

use std::fmt;

/// Where an upgrade session stands.
///
/// The happy path is strictly linear. `Failed` can be entered from any
/// phase that is not terminal; `Completed` and `Failed` are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Phase {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// `start` sent, waiting for its acknowledgment.
    Starting,
    /// Grace window for the operator to press the button.
    AwaitingButton,
    /// `begin` sent, the key scanner reboots into its bootloader.
    EnteringBootloader,
    /// `getInfo` sent.
    QueryingInfo,
    /// Writing chunks.
    Transferring,
    /// `finish` sent.
    Finishing,
    /// The device acknowledged `finish`.
    Completed,
    /// The session was aborted.
    Failed,
}

impl Phase {
    /// Next phase on the happy path, `None` for terminal phases.
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Starting),
            Self::Starting => Some(Self::AwaitingButton),
            Self::AwaitingButton => Some(Self::EnteringBootloader),
            Self::EnteringBootloader => Some(Self::QueryingInfo),
            Self::QueryingInfo => Some(Self::Transferring),
            Self::Transferring => Some(Self::Finishing),
            Self::Finishing => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Whether the session may move from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// All phases in happy-path order, followed by `Failed`.
    pub const ALL: [Self; 9] = [
        Self::Idle,
        Self::Starting,
        Self::AwaitingButton,
        Self::EnteringBootloader,
        Self::QueryingInfo,
        Self::Transferring,
        Self::Finishing,
        Self::Completed,
        Self::Failed,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Starting => "Starting",
            Self::AwaitingButton => "AwaitingButton",
            Self::EnteringBootloader => "EnteringBootloader",
            Self::QueryingInfo => "QueryingInfo",
            Self::Transferring => "Transferring",
            Self::Finishing => "Finishing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}
