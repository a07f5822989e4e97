//! Recording stand-ins for the engine's host-facing traits.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::upgrade::interaction::{Confirmation, Interaction};
use crate::upgrade::relaunch::{LaunchTarget, Launcher};

/// Answers prompts from a script and records everything it is shown. Once the script
/// runs out every prompt is answered [`Confirmation::No`].
#[derive(Debug, Default)]
pub struct RecordingInteraction {
    answers: Mutex<VecDeque<Confirmation>>,
    prompts: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
    notices: Mutex<Vec<String>>,
}

impl RecordingInteraction {
    #[must_use]
    pub fn answering(answers: Vec<Confirmation>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

impl Interaction for RecordingInteraction {
    fn confirm(&self, message: &str) -> Confirmation {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(message.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or(Confirmation::No)
    }

    fn progress(&self, _message: &str) {}

    fn progress_done(&self) {}

    fn warn(&self, message: &str) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message.to_string());
        }
    }

    fn notify(&self, message: &str) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(message.to_string());
        }
    }
}

/// Records launches instead of starting processes; `terminate` only sets a flag.
/// Clones share their records.
#[derive(Debug, Clone, Default)]
pub struct RecordingLauncher {
    started: Arc<Mutex<Vec<LaunchTarget>>>,
    terminated: Arc<Mutex<bool>>,
}

impl RecordingLauncher {
    #[must_use]
    pub fn started(&self) -> Vec<LaunchTarget> {
        self.started.lock().map(|s| s.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn terminated(&self) -> bool {
        self.terminated.lock().map(|t| *t).unwrap_or(false)
    }
}

impl Launcher for RecordingLauncher {
    fn spawn_detached(&self, target: &LaunchTarget) -> Result<u32> {
        if let Ok(mut started) = self.started.lock() {
            started.push(target.clone());
        }
        Ok(1)
    }

    fn terminate(&self) {
        if let Ok(mut terminated) = self.terminated.lock() {
            *terminated = true;
        }
    }
}
