//! Input-injection wrapper.
//!
//! Injection needs privileges and display-server specifics the daemon does
//! not carry, so each device type gets its own injector child process. The
//! pipe protocol is a fixed 12-byte record per event, native byte order:
//!
//! ```text
//! [type:u32][code:u32][value:i32]
//! ```
//!
//! The injector is spawned on the first event for its device; a dead or
//! unspawnable child makes `emit_event` report failure, which the session
//! surfaces to the peer as `InputEventResponse { success: false }`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use coop_core::InputDeviceType;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::machine::InputInjector;
use crate::manager::InjectorFactory;

/// One injector child for one [`InputDeviceType`].
pub struct InputEmittor {
    bin: PathBuf,
    device: InputDeviceType,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl InputEmittor {
    pub fn new(bin: PathBuf, device: InputDeviceType) -> Self {
        Self {
            bin,
            device,
            child: None,
            stdin: None,
        }
    }

    fn ensure_spawned(&mut self) -> bool {
        if self.stdin.is_some() {
            return true;
        }
        match Command::new(&self.bin)
            .arg(device_arg(self.device))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                self.stdin = child.stdin.take();
                self.child = Some(child);
                debug!(device = ?self.device, "input emittor spawned");
                self.stdin.is_some()
            }
            Err(e) => {
                warn!(bin = %self.bin.display(), device = ?self.device, "failed to spawn input emittor: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl InputInjector for InputEmittor {
    async fn emit_event(&mut self, event_type: u32, code: u32, value: i32) -> bool {
        if !self.ensure_spawned() {
            return false;
        }

        let mut record = [0u8; 12];
        record[0..4].copy_from_slice(&event_type.to_ne_bytes());
        record[4..8].copy_from_slice(&code.to_ne_bytes());
        record[8..12].copy_from_slice(&value.to_ne_bytes());

        // A write failure means the child died; drop it so the next event
        // attempts a respawn.
        match self.stdin.as_mut() {
            Some(pipe) => match pipe.write_all(&record).await {
                Ok(()) => pipe.flush().await.is_ok(),
                Err(e) => {
                    warn!(device = ?self.device, "input emittor pipe rejected event: {e}");
                    self.stdin = None;
                    self.child = None;
                    false
                }
            },
            None => false,
        }
    }
}

fn device_arg(device: InputDeviceType) -> &'static str {
    match device {
        InputDeviceType::Keyboard => "keyboard",
        InputDeviceType::Mouse => "mouse",
        InputDeviceType::Touchpad => "touchpad",
    }
}

/// Builds [`InputEmittor`]s for newly created sessions.
pub struct ProcessInjectorFactory {
    bin: PathBuf,
}

impl ProcessInjectorFactory {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

impl InjectorFactory for ProcessInjectorFactory {
    fn create(&self, device: InputDeviceType) -> Box<dyn InputInjector> {
        Box::new(InputEmittor::new(self.bin.clone(), device))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
