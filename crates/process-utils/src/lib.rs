//! Small process-related helpers shared across the workspace.
//!
//! External media tools (`ffmpeg`, `sox`, `yt-dlp`, ...) are spawned through
//! [`tokio_command`] and driven by [`run_with_timeout`], which enforces a hard
//! deadline and keeps the tail of stderr as a human-readable diagnostic.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
mod run;

#[cfg(feature = "tokio")]
pub use run::{RunError, STDERR_TAIL_LINES, ToolOutput, run_with_timeout, tokio_command};
