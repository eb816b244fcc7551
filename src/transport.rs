//! Transport abstraction (§9): the PMU and PDC endpoints depend on this and the frame codec,
//! never directly on [`tokio::net::TcpStream`], so the splitter can compose both without
//! duplicating socket plumbing.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::frame::StreamDecoder;

/// Connect to `addr`, returning split halves ready for [`spawn_writer`] and [`fill`].
pub async fn connect(addr: impl ToSocketAddrs) -> Result<(OwnedReadHalf, OwnedWriteHalf), Error> {
    let stream = TcpStream::connect(addr).await?;
    let _ = stream.set_nodelay(true);
    Ok(stream.into_split())
}

/// Spawns the write side of a connection: a task that drains `queue` to the socket in enqueue
/// order, per §5's per-connection send-order guarantee.
///
/// Returns the sender half of the queue and the task's join handle. The queue is bounded to
/// `outbound_queue_depth`; callers that get a full queue back from `try_send` should treat that
/// client as a slow consumer and close it (§5).
pub fn spawn_writer(
    mut write_half: OwnedWriteHalf,
    outbound_queue_depth: usize,
) -> (mpsc::Sender<Vec<u8>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(outbound_queue_depth);

    let handle = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(err) = write_half.write_all(&bytes).await {
                warn!("write failed, closing connection: {err}");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    (tx, handle)
}

/// Read whatever is available from `read_half` and feed it to `decoder`.
///
/// Returns the number of bytes read; `0` means the peer closed its write side.
pub async fn fill(read_half: &mut OwnedReadHalf, decoder: &mut StreamDecoder) -> Result<usize, Error> {
    use tokio::io::AsyncReadExt;

    let mut buf = [0u8; 4096];
    let n = read_half.read(&mut buf).await?;
    if n > 0 {
        decoder.feed(&buf[..n]);
    }
    Ok(n)
}
