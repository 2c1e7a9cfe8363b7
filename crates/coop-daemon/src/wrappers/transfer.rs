//! File-copy and desktop-notification wrappers.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::machine::{FileTransfer, Notifier};

/// Copies a received file by spawning the configured copy command
/// (`cp <src> <dst_dir>` by default). Exit code 0 is success.
pub struct CopyProcess {
    bin: PathBuf,
}

impl CopyProcess {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl FileTransfer for CopyProcess {
    async fn copy(&self, src: &Path, dst_dir: &Path) -> bool {
        match Command::new(&self.bin).arg(src).arg(dst_dir).status().await {
            Ok(status) => status.success(),
            Err(e) => {
                warn!(bin = %self.bin.display(), "failed to spawn copy process: {e}");
                false
            }
        }
    }
}

/// Fire-and-forget desktop notification via `notify-send` (or whatever the
/// config points at). Failures are logged and otherwise ignored; a missing
/// notification daemon must not affect the transfer result.
pub struct DesktopNotifier {
    bin: PathBuf,
}

impl DesktopNotifier {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

impl Notifier for DesktopNotifier {
    fn file_received(&self, path: &Path, success: bool) {
        let body = format!(
            "Receive file {} {}",
            path.display(),
            if success { "success" } else { "failed" }
        );
        let mut command = Command::new(&self.bin);
        command.arg("Collaboration").arg(body);
        tokio::spawn(async move {
            if let Err(e) = command.status().await {
                debug!("desktop notification failed: {e}");
            }
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_succeeds_for_an_existing_file() {
        let dir = std::env::temp_dir().join(format!("coopd-copy-{}", uuid::Uuid::new_v4()));
        let dst = dir.join("received");
        std::fs::create_dir_all(&dst).unwrap();
        let src = dir.join("x.txt");
        std::fs::write(&src, b"payload").unwrap();

        let copier = CopyProcess::new(PathBuf::from("/bin/cp"));
        assert!(copier.copy(&src, &dst).await);
        assert_eq!(std::fs::read(dst.join("x.txt")).unwrap(), b"payload");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_copy_fails_for_a_missing_source() {
        let dir = std::env::temp_dir().join(format!("coopd-copy-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let copier = CopyProcess::new(PathBuf::from("/bin/cp"));
        assert!(!copier.copy(Path::new("/nonexistent/x.txt"), &dir).await);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_copy_fails_when_the_command_is_missing() {
        let copier = CopyProcess::new(PathBuf::from("/nonexistent/cp"));
        assert!(!copier.copy(Path::new("/a"), Path::new("/b")).await);
    }

    #[tokio::test]
    async fn test_notifier_tolerates_a_missing_command() {
        let notifier = DesktopNotifier::new(PathBuf::from("/nonexistent/notify-send"));
        notifier.file_received(Path::new("/tmp/x.txt"), true);
        // The spawn is fire-and-forget; yielding lets it run to completion.
        tokio::task::yield_now().await;
    }
}
