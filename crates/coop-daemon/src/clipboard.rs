//! Clipboard collaborator seam and file-path rewriting.
//!
//! The actual clipboard lives in the desktop session and is reached over the
//! desktop bus by an external component; the daemon only talks to it through
//! [`ClipboardBridge`]. Reading a target is asynchronous because the bus
//! round-trip must not stall the session loop.
//!
//! When the remote side owns copied *files*, the content of a clipboard
//! target is a newline-separated list such as
//!
//! ```text
//! copy
//! file:///docs/report.odt
//! /home/user/notes.txt
//! ```
//!
//! Those paths are only meaningful on the remote machine. Before handing the
//! content to the local clipboard, every path-like line is prefixed with the
//! local FUSE mountpoint so that pasting resolves through the mounted remote
//! filesystem.

use std::path::Path;

use async_trait::async_trait;
use coop_core::FILE_SCHEMA;
use tracing::debug;

/// Access to the desktop clipboard, implemented by an external collaborator.
#[async_trait]
pub trait ClipboardBridge: Send + Sync {
    /// True when the current local clipboard content is a copied-files list.
    fn is_files(&self) -> bool;

    /// Reads one target's content; empty when the target is unavailable.
    async fn read_target(&self, target: &str) -> Vec<u8>;

    /// Replaces one target's content.
    fn update_target(&self, target: &str, content: Vec<u8>);

    /// Records that a remote peer now owns the listed targets; the desktop
    /// side will come back through the daemon to fetch content on paste.
    fn set_remote_targets(&self, targets: &[String]);
}

/// Placeholder bridge used when no desktop clipboard component is attached.
/// Reads are empty, writes are logged and dropped.
pub struct NullClipboard;

#[async_trait]
impl ClipboardBridge for NullClipboard {
    fn is_files(&self) -> bool {
        false
    }

    async fn read_target(&self, target: &str) -> Vec<u8> {
        debug!(selection = target, "clipboard bridge unavailable; returning empty content");
        Vec::new()
    }

    fn update_target(&self, target: &str, content: Vec<u8>) {
        debug!(
            selection = target,
            len = content.len(),
            "clipboard bridge unavailable; dropping update"
        );
    }

    fn set_remote_targets(&self, targets: &[String]) {
        debug!(?targets, "clipboard bridge unavailable; ignoring remote targets");
    }
}

// ── Path rewriting ────────────────────────────────────────────────────────────

/// Prefixes every path-like line of `content` with `mountpoint`.
///
/// - `/abs/path` becomes `<mountpoint>/abs/path`
/// - `file:///abs/path` becomes `file://<mountpoint>/abs/path`
/// - every other line passes through unchanged
///
/// Line structure (including a trailing newline) is preserved.
pub fn rewrite_with_mountpoint(content: &str, mountpoint: &Path) -> String {
    let mp = mountpoint.to_string_lossy();
    let rewritten: Vec<String> = content
        .split('\n')
        .map(|line| {
            if line.starts_with('/') {
                format!("{mp}{line}")
            } else if let Some(path) = line.strip_prefix(FILE_SCHEMA) {
                format!("{FILE_SCHEMA}{mp}{path}")
            } else {
                line.to_string()
            }
        })
        .collect();
    rewritten.join("\n")
}

/// Extracts the path component of the first `file://` URI in `content`.
///
/// Used to synthesize the `text/uri-list` target for peers whose file
/// managers do not provide it themselves.
pub fn first_file_uri_path(content: &str) -> Option<String> {
    content
        .split('\n')
        .find_map(|line| line.strip_prefix(FILE_SCHEMA))
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
