//! Error handling for hotswap
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** so the update flow can tell an invalid archive apart
//!    from a missing payload or a failed backup
//! 2. **User-friendly messages** with actionable suggestions for the CLI
//!
//! [`UpdateError`] is the typed taxonomy. Engine components return
//! `anyhow::Result` with an [`UpdateError`] at the root of the chain, so callers can
//! `downcast_ref::<UpdateError>()` to decide which terminal state an operation ended in.
//! [`user_friendly_error`] turns any error into an [`ErrorContext`] for display.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotswap_updater::core::{UpdateError, user_friendly_error};
//!
//! let err = anyhow::Error::from(UpdateError::PayloadNotFound {
//!     root: "/tmp/extract".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::upgrade::UpdateState;

/// Every failure the update, restore and repair flows can end in.
///
/// Each variant keeps the original underlying message (`reason`) so nothing is lost
/// when the error is shown to the operator.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Release query or download failed. Transient; the user retries manually.
    #[error("Network operation failed: {operation}")]
    NetworkError {
        /// What was being attempted (e.g. "query latest release")
        operation: String,
        /// Raw message from the HTTP client or API
        reason: String,
    },

    /// The downloaded file does not open as a ZIP archive. The cache entry is deleted.
    #[error("Archive is not a valid ZIP file: {path}")]
    ArchiveInvalid {
        /// Path of the rejected (and already deleted) archive
        path: String,
        /// Message from the ZIP reader
        reason: String,
    },

    /// The archive opened but could not be unpacked.
    #[error("Failed to extract archive: {path}")]
    ExtractFailed {
        /// Archive being extracted
        path: String,
        /// Underlying message
        reason: String,
    },

    /// No strategy found the application payload inside the extracted tree.
    #[error("Could not locate the application payload inside {root}")]
    PayloadNotFound {
        /// Root of the extraction tree that was searched
        root: String,
    },

    /// A backup could not be produced; nothing in the installation was touched.
    #[error("Backup of {install_dir} failed")]
    BackupFailed {
        /// Installation directory being snapshotted
        install_dir: String,
        /// Underlying message
        reason: String,
        /// Uncompressed staging copy kept as a fallback, if one exists
        staging: Option<String>,
    },

    /// Non-lock errors while merging; the installation may be partially updated.
    #[error("Merge into {install_dir} failed for {} file(s)", failed.len())]
    MergeFailed {
        /// Live installation directory
        install_dir: String,
        /// `path: reason` for each failed copy
        failed: Vec<String>,
        /// Backup taken before the merge, the recovery path
        backup: Option<String>,
    },

    /// Required files are still missing after repair. Fatal for startup.
    #[error("Repair incomplete: {} required file(s) still missing", missing.len())]
    RepairIncomplete {
        /// Relative paths still absent
        missing: Vec<String>,
    },

    /// The new process could not be started.
    #[error("Failed to relaunch {program}")]
    RelaunchFailed {
        /// Program that was being started
        program: String,
        /// Underlying message
        reason: String,
    },

    /// Another update, restore or repair already holds the installation directory.
    #[error("An update operation is already in progress")]
    AlreadyInProgress,

    /// Requested backup does not exist.
    #[error("No backup found for version {version}")]
    BackupNotFound {
        /// Version that was requested
        version: String,
    },

    /// Configuration file or value problem.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// Standard I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parse error from the configuration file or marker store.
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl UpdateError {
    /// Terminal state of the update state machine this error ends in.
    ///
    /// Errors that do not belong to a specific step of the update flow return `None`.
    #[must_use]
    pub const fn terminal_state(&self) -> Option<UpdateState> {
        match self {
            Self::NetworkError {
                ..
            }
            | Self::ArchiveInvalid {
                ..
            } => Some(UpdateState::DownloadFailed),
            Self::ExtractFailed {
                ..
            } => Some(UpdateState::ExtractFailed),
            Self::PayloadNotFound {
                ..
            } => Some(UpdateState::NotFound),
            Self::BackupFailed {
                ..
            } => Some(UpdateState::BackupFailed),
            Self::MergeFailed {
                ..
            } => Some(UpdateState::MergeFailed),
            _ => None,
        }
    }

    /// Whether this is a transient network failure that background callers should
    /// treat as "no update available".
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NetworkError {
                ..
            }
        )
    }

    fn clone_lossy(&self) -> Self {
        match self {
            Self::NetworkError {
                operation,
                reason,
            } => Self::NetworkError {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            Self::ArchiveInvalid {
                path,
                reason,
            } => Self::ArchiveInvalid {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::ExtractFailed {
                path,
                reason,
            } => Self::ExtractFailed {
                path: path.clone(),
                reason: reason.clone(),
            },
            Self::PayloadNotFound {
                root,
            } => Self::PayloadNotFound {
                root: root.clone(),
            },
            Self::BackupFailed {
                install_dir,
                reason,
                staging,
            } => Self::BackupFailed {
                install_dir: install_dir.clone(),
                reason: reason.clone(),
                staging: staging.clone(),
            },
            Self::MergeFailed {
                install_dir,
                failed,
                backup,
            } => Self::MergeFailed {
                install_dir: install_dir.clone(),
                failed: failed.clone(),
                backup: backup.clone(),
            },
            Self::RepairIncomplete {
                missing,
            } => Self::RepairIncomplete {
                missing: missing.clone(),
            },
            Self::RelaunchFailed {
                program,
                reason,
            } => Self::RelaunchFailed {
                program: program.clone(),
                reason: reason.clone(),
            },
            Self::AlreadyInProgress => Self::AlreadyInProgress,
            Self::BackupNotFound {
                version,
            } => Self::BackupNotFound {
                version: version.clone(),
            },
            Self::ConfigError {
                message,
            } => Self::ConfigError {
                message: message.clone(),
            },
            Self::IoError(e) => Self::Other {
                message: format!("IO error: {e}"),
            },
            Self::TomlError(e) => Self::Other {
                message: format!("TOML parsing error: {e}"),
            },
            Self::Other {
                message,
            } => Self::Other {
                message: message.clone(),
            },
        }
    }
}

/// An [`UpdateError`] decorated with details and a suggestion for display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpdateError,
    /// What the operator can do about it
    pub suggestion: Option<String>,
    /// Extra information (paths, underlying messages)
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    /// Context for `error` with no suggestion or details yet.
    pub const fn new(error: UpdateError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(update_error) = error.downcast_ref::<UpdateError>() {
        return create_error_context(update_error.clone_lossy());
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(UpdateError::Other {
            message: error.to_string(),
        })
        .with_suggestion(
            "Run with elevated permissions (Administrator/sudo) or check ownership of the installation directory",
        );
    }

    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(UpdateError::Other {
        message,
    })
}

fn create_error_context(error: UpdateError) -> ErrorContext {
    match &error {
        UpdateError::NetworkError {
            reason,
            ..
        } => {
            let reason = reason.clone();
            ErrorContext::new(error)
                .with_details(reason)
                .with_suggestion("Check your internet connection and run the command again")
        }
        UpdateError::ArchiveInvalid {
            reason,
            ..
        } => {
            let reason = reason.clone();
            ErrorContext::new(error)
                .with_details(reason)
                .with_suggestion("The corrupt download was removed from the cache; retry the update")
        }
        UpdateError::ExtractFailed {
            reason,
            ..
        } => {
            let reason = reason.clone();
            ErrorContext::new(error).with_details(reason).with_suggestion(
                "Delete the cached archive for this version and retry the update",
            )
        }
        UpdateError::PayloadNotFound {
            ..
        } => ErrorContext::new(error)
            .with_details("The release archive has an unexpected layout; no files were changed")
            .with_suggestion("Check `entry_file` and `payload_subfolder` in the [install] section"),
        UpdateError::BackupFailed {
            reason,
            staging,
            ..
        } => {
            let details = match staging {
                Some(staging) => format!("{reason}\nUncompressed copy kept at: {staging}"),
                None => reason.clone(),
            };
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Free disk space in the cache directory; the installation was not modified")
        }
        UpdateError::MergeFailed {
            failed,
            backup,
            ..
        } => {
            let mut details = failed.join("\n");
            if let Some(backup) = backup {
                details.push_str(&format!("\nBackup: {backup}"));
            }
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Run `hotswap restore` to roll back to the backup taken before the update")
        }
        UpdateError::RepairIncomplete {
            missing,
        } => {
            let details = missing.join("\n");
            ErrorContext::new(error)
                .with_details(details)
                .with_suggestion("Reinstall the application; required files could not be restored")
        }
        UpdateError::AlreadyInProgress => ErrorContext::new(error)
            .with_suggestion("Wait for the running update to finish"),
        UpdateError::BackupNotFound {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Run `hotswap restore --list` to see available backups"),
        UpdateError::ConfigError {
            ..
        } => ErrorContext::new(error)
            .with_suggestion("Check the configuration file passed with --config"),
        _ => ErrorContext::new(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        let err = UpdateError::ArchiveInvalid {
            path: "a.zip".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(err.terminal_state(), Some(UpdateState::DownloadFailed));

        let err = UpdateError::PayloadNotFound {
            root: "/x".to_string(),
        };
        assert_eq!(err.terminal_state(), Some(UpdateState::NotFound));

        assert_eq!(UpdateError::AlreadyInProgress.terminal_state(), None);
    }

    #[test]
    fn test_network_error_is_transient() {
        let err = UpdateError::NetworkError {
            operation: "query latest release".to_string(),
            reason: "timed out".to_string(),
        };
        assert!(err.is_transient());
        assert!(!UpdateError::AlreadyInProgress.is_transient());
    }

    #[test]
    fn test_user_friendly_backup_failure_mentions_staging() {
        let err = anyhow::Error::from(UpdateError::BackupFailed {
            install_dir: "/opt/app".to_string(),
            reason: "disk full".to_string(),
            staging: Some("/opt/app/cache/backups/1.0.0_x".to_string()),
        });
        let ctx = user_friendly_error(err);
        let details = ctx.details.unwrap();
        assert!(details.contains("disk full"));
        assert!(details.contains("1.0.0_x"));
    }

    #[test]
    fn test_user_friendly_error_keeps_chain() {
        let err = anyhow::anyhow!("root cause").context("outer");
        let ctx = user_friendly_error(err);
        let rendered = ctx.to_string();
        assert!(rendered.contains("outer"));
        assert!(rendered.contains("root cause"));
    }
}
