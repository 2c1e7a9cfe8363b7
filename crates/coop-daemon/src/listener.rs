//! Inbound pair listener.
//!
//! Accepts TCP connections on the advertised listen port. A fresh connection
//! must open with a `PairRequest` frame within a short window; the listener
//! reads exactly that first frame (header, then body — nothing beyond it is
//! consumed), validates the shape, and hands the stream plus the request to
//! the manager, which routes it to the peer's session for user confirmation.
//! Anything else — timeout, illegal frame, wrong first message — drops the
//! connection without a reply.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use coop_core::{FrameError, Message, Payload, HEADER_SIZE, MAGIC, MAX_FRAME_LEN};
use prost::Message as _;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::machine::{configure_stream, PeerStream};
use crate::manager::Manager;

/// How long a fresh inbound connection may take to present its PairRequest.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Binds the pair listener.
pub async fn bind(address: IpAddr, port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(SocketAddr::new(address, port)).await?;
    info!("pair listener on TCP {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts connections until the listener fails; one handshake task per
/// connection so a slow client cannot stall the accept loop.
pub async fn accept_loop(listener: TcpListener, manager: Arc<Manager>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let manager = Arc::clone(&manager);
                tokio::spawn(handshake(manager, stream, peer));
            }
            Err(e) => {
                warn!("pair listener accept failed: {e}");
                break;
            }
        }
    }
}

async fn handshake(manager: Arc<Manager>, stream: TcpStream, peer: SocketAddr) {
    configure_stream(&stream);
    let mut stream: PeerStream = Box::new(stream);

    let first = tokio::time::timeout(FIRST_FRAME_TIMEOUT, read_first_frame(&mut stream)).await;
    match first {
        Err(_) => warn!(%peer, "no pair request within the handshake window"),
        Ok(Err(e)) => warn!(%peer, "illegal first frame: {e}"),
        Ok(Ok(msg)) => match msg.payload {
            Some(Payload::PairRequest(request)) => {
                if let Err(e) = manager.on_inbound_pair(stream, request, peer.ip()) {
                    warn!(%peer, "inbound pair rejected: {e}");
                }
            }
            other => {
                let msg = Message { payload: other };
                warn!(%peer, kind = msg.kind(), "first frame is not a pair request");
            }
        },
    }
}

/// Reads exactly one frame: the fixed header, then the declared body. Used
/// only for the handshake, before the session's framed transport takes over,
/// so no bytes beyond the frame are consumed.
pub async fn read_first_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Message, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await?;

    let mut magic = [0u8; 8];
    magic.copy_from_slice(&header[..8]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&header[8..HEADER_SIZE]);
    let body_len = u64::from_be_bytes(len_bytes);
    if body_len > MAX_FRAME_LEN {
        return Err(FrameError::Oversized(body_len));
    }

    let mut body = vec![0u8; body_len as usize];
    stream.read_exact(&mut body).await?;
    Ok(Message::decode(&body[..]).unwrap_or_default())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use coop_core::{FrameCodec, PairRequest, SCAN_KEY};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::Encoder;

    fn encode(msg: &Message) -> Vec<u8> {
        let mut buf = BytesMut::new();
        FrameCodec::<Message>::new()
            .encode(msg.clone(), &mut buf)
            .expect("encode");
        buf.to_vec()
    }

    fn pair_request() -> Message {
        PairRequest {
            key: SCAN_KEY.to_string(),
            device_info: None,
        }
        .into()
    }

    #[tokio::test]
    async fn test_read_first_frame_round_trips() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let msg = pair_request();
        client.write_all(&encode(&msg)).await.unwrap();

        let read = read_first_frame(&mut server).await.expect("frame");
        assert_eq!(read, msg);
    }

    #[tokio::test]
    async fn test_read_first_frame_waits_for_split_writes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let bytes = encode(&pair_request());
        let (head, tail) = bytes.split_at(7);

        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            client.write_all(&head).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            client.write_all(&tail).await.unwrap();
            client
        });

        let read = read_first_frame(&mut server).await.expect("frame");
        assert_eq!(read, pair_request());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_first_frame_rejects_bad_magic() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut bytes = encode(&pair_request());
        bytes[0] = b'?';
        client.write_all(&bytes).await.unwrap();

        let result = read_first_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::BadMagic(_))));
    }

    #[tokio::test]
    async fn test_read_first_frame_leaves_following_bytes_unread() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut bytes = encode(&pair_request());
        bytes.extend_from_slice(b"NEXT");
        client.write_all(&bytes).await.unwrap();

        let _ = read_first_frame(&mut server).await.expect("frame");
        let mut rest = [0u8; 4];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"NEXT");
    }

    #[tokio::test]
    async fn test_read_first_frame_on_closed_stream_is_an_io_error() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let result = read_first_frame(&mut server).await;
        assert!(matches!(result, Err(FrameError::Io(_))));
    }
}
