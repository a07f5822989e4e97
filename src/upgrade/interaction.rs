//! How the engine talks to the person in front of the screen.
//!
//! The engine never renders anything itself. It asks for confirmation, reports
//! progress and surfaces warnings through [`Interaction`]; the CLI implements it on the
//! terminal and a GUI host implements it with dialogs.

use tracing::{info, warn};

/// Answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
    Cancel,
}

impl Confirmation {
    /// Only an explicit yes lets a flow continue.
    #[must_use]
    pub const fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }
}

/// The user-facing side of the engine.
///
/// Implementations must be callable from any thread; the engine holds one behind an
/// `Arc` for its whole life.
pub trait Interaction: Send + Sync {
    /// Ask a yes/no/cancel question. Blocks until answered.
    fn confirm(&self, message: &str) -> Confirmation;

    /// Show a non-blocking progress message, replacing any previous one.
    fn progress(&self, message: &str);

    /// Hide the progress indicator.
    fn progress_done(&self);

    /// Report a recoverable problem.
    fn warn(&self, message: &str);

    /// Report an outcome the user should see, such as a finished install. Called
    /// before the process is replaced, so it is the last word the engine gets.
    fn notify(&self, message: &str);
}

/// Answers every prompt with a fixed reply and logs the rest. Used for unattended
/// runs (`--yes`) and by hosts without a UI.
#[derive(Debug, Clone, Copy)]
pub struct AutoConfirm {
    reply: Confirmation,
}

impl AutoConfirm {
    /// Says yes to everything.
    #[must_use]
    pub const fn yes() -> Self {
        Self {
            reply: Confirmation::Yes,
        }
    }

    /// Says no to everything, so no flow gets past its first prompt.
    #[must_use]
    pub const fn no() -> Self {
        Self {
            reply: Confirmation::No,
        }
    }
}

impl Default for AutoConfirm {
    fn default() -> Self {
        Self::yes()
    }
}

impl Interaction for AutoConfirm {
    fn confirm(&self, message: &str) -> Confirmation {
        info!("{} -> {:?}", message, self.reply);
        self.reply
    }

    fn progress(&self, message: &str) {
        info!("{}", message);
    }

    fn progress_done(&self) {}

    fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    fn notify(&self, message: &str) {
        info!("{}", message);
    }
}
