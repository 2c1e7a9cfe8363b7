//! Bridges to external collaborators.
//!
//! Everything here is a thin wrapper around a child process or a plain TCP
//! socket; the interesting contracts live in the traits they implement
//! (`machine::{UserConfirm, InputInjector, FileTransfer, Notifier}` and the
//! factory in `manager`). Each wrapper re-enters its owning session through
//! the session's event channel — never by calling into session state from a
//! foreign task.

pub mod confirm;
pub mod fuse;
pub mod input;
pub mod transfer;

pub use confirm::{DialogConfirm, ACCEPT, REJECT};
pub use fuse::{FuseClient, FuseServer};
pub use input::{InputEmittor, ProcessInjectorFactory};
pub use transfer::{CopyProcess, DesktopNotifier};
