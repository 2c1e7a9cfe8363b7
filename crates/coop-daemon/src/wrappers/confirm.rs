//! Pair-confirmation dialog wrapper.
//!
//! The dialog itself is a GUI component outside the daemon. The contract is
//! one byte on its stdout: [`ACCEPT`] or [`REJECT`], then exit. Anything
//! else is a malformed verdict and the handshake is left for the peer's
//! timeout to clear, matching the send-nothing behavior of the daemon's
//! other half-open handshake paths.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

use crate::machine::UserConfirm;

/// Byte the dialog writes when the user accepted the pair.
pub const ACCEPT: u8 = 1;
/// Byte the dialog writes when the user rejected the pair.
pub const REJECT: u8 = 0;

/// Spawns the configured dialog binary with the requesting peer's address and
/// name as arguments.
pub struct DialogConfirm {
    bin: PathBuf,
}

impl DialogConfirm {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

#[async_trait]
impl UserConfirm for DialogConfirm {
    async fn ask(&self, ip: IpAddr, peer_name: &str) -> Option<bool> {
        let mut child = match Command::new(&self.bin)
            .arg(ip.to_string())
            .arg(peer_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(bin = %self.bin.display(), "failed to spawn confirm dialog: {e}");
                return None;
            }
        };

        let mut stdout = child.stdout.take()?;
        let mut buf = Vec::new();
        if let Err(e) = stdout.read_to_end(&mut buf).await {
            warn!("failed to read confirm dialog verdict: {e}");
        }
        let _ = child.wait().await;

        if buf.len() != 1 {
            warn!(bytes = buf.len(), "user confirm has error");
            return None;
        }
        Some(buf[0] == ACCEPT)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
