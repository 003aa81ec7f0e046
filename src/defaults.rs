//! Default values for vmr-flow configuration.
//!
//! This module provides centralized default values used across commands,
//! ensuring consistency and avoiding duplication.

use std::path::PathBuf;
use std::time::Duration;

/// Delay before an open pull request is checked again.
pub const PR_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Returns the default temp directory for clones and patches.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/vmr-flow` (XDG Base Directory)
/// - macOS: `~/Library/Caches/vmr-flow`
/// - Windows: `{FOLDERID_LocalAppData}\vmr-flow`
///
/// Falls back to `.vmr-flow-tmp` in the current directory if the platform
/// cache directory cannot be determined.
///
/// This can be overridden by the `--tmp` CLI flag or the `VMR_FLOW_TMP`
/// environment variable.
pub fn default_tmp_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".vmr-flow-tmp"))
        .join("vmr-flow")
}
