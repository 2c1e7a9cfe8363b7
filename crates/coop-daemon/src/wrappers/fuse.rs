//! File-access transport wrappers.
//!
//! The remote-filesystem mount and serve operations themselves belong to an
//! external FUSE component; the daemon's responsibility ends at the
//! transport: an ephemeral-port listener on the serving side, a connected
//! socket plus a prepared mountpoint directory on the consuming side. A
//! `Machine` owns at most one of each, and both are torn down with the
//! session.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Serving side: listens on an ephemeral port for the peer's file-access
/// connection. Dropping the server stops accepting and closes held sessions.
pub struct FuseServer {
    port: u16,
    accept_task: JoinHandle<()>,
}

impl FuseServer {
    /// Binds `0.0.0.0:0` and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when no ephemeral port can be bound.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();
        let accept_task = tokio::spawn(accept_loop(listener));
        info!(port, "file server listening");
        Ok(Self { port, accept_task })
    }

    /// The ephemeral port reported to the peer in `FsResponse`.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for FuseServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "file access session opened");
                tokio::spawn(async move {
                    let mut stream = stream;
                    // Hold the transport until the peer closes it; the
                    // filesystem protocol on top is served out-of-process.
                    let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
                    debug!(%peer, "file access session closed");
                });
            }
            Err(e) => {
                debug!("file server accept failed: {e}");
                break;
            }
        }
    }
}

/// Consuming side: connected to the peer's [`FuseServer`] with the remote
/// export visible under `mountpoint`.
pub struct FuseClient {
    mountpoint: PathBuf,
    conn_task: JoinHandle<()>,
}

impl FuseClient {
    /// Connects to the peer's file server and prepares the mountpoint
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the connection or the
    /// mountpoint directory fails.
    pub async fn mount(ip: IpAddr, port: u16, mountpoint: &Path) -> std::io::Result<Self> {
        let stream = TcpStream::connect((ip, port)).await?;
        tokio::fs::create_dir_all(mountpoint).await?;
        info!(%ip, port, mountpoint = %mountpoint.display(), "remote filesystem attached");

        let conn_task = tokio::spawn(async move {
            let mut stream = stream;
            let _ = tokio::io::copy(&mut stream, &mut tokio::io::sink()).await;
        });

        Ok(Self {
            mountpoint: mountpoint.to_path_buf(),
            conn_task,
        })
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Where `remote_path` (as named by the peer) appears locally.
    pub fn source_path(&self, remote_path: &str) -> PathBuf {
        self.mountpoint.join(remote_path.trim_start_matches('/'))
    }

    /// Detaches from the remote filesystem.
    pub fn exit(self) {
        self.conn_task.abort();
    }
}

impl Drop for FuseClient {
    fn drop(&mut self) {
        self.conn_task.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_binds_an_ephemeral_port() {
        let server = FuseServer::bind().await.expect("bind");
        assert_ne!(server.port(), 0);
    }

    #[tokio::test]
    async fn test_client_connects_and_prepares_mountpoint() {
        let server = FuseServer::bind().await.expect("bind");
        let mountpoint =
            std::env::temp_dir().join(format!("coopd-mp-{}", uuid::Uuid::new_v4()));

        let client = FuseClient::mount("127.0.0.1".parse().unwrap(), server.port(), &mountpoint)
            .await
            .expect("mount");
        assert!(mountpoint.is_dir());
        assert_eq!(
            client.source_path("/docs/x.txt"),
            mountpoint.join("docs/x.txt")
        );

        client.exit();
        std::fs::remove_dir_all(&mountpoint).ok();
    }

    #[tokio::test]
    async fn test_client_mount_fails_without_a_server() {
        let server = FuseServer::bind().await.expect("bind");
        let port = server.port();
        drop(server); // release the port

        let mountpoint =
            std::env::temp_dir().join(format!("coopd-mp-{}", uuid::Uuid::new_v4()));
        let result = FuseClient::mount("127.0.0.1".parse().unwrap(), port, &mountpoint).await;
        assert!(result.is_err());
        std::fs::remove_dir_all(&mountpoint).ok();
    }

    #[test]
    fn test_source_path_normalises_leading_slashes() {
        // Pure path logic; no sockets involved.
        let mountpoint = PathBuf::from("/run/coopd/mp");
        let rel = "x.txt".trim_start_matches('/');
        assert_eq!(mountpoint.join(rel), PathBuf::from("/run/coopd/mp/x.txt"));
    }
}
