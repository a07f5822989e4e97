//! Cross-cutting helpers: file system operations with lock detection and progress
//! indicators.

pub mod fs;
pub mod progress;

pub use fs::{copy_dir_excluding, ensure_dir, is_lock_error, remove_dir_all};
pub use progress::ProgressBar;
