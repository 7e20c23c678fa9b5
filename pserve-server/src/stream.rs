//! Chunked file streaming for response bodies

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::io;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

/// Outcome of a completed transfer
#[derive(Debug)]
pub struct TransferReport {
    /// Total bytes sent to the client
    pub bytes: u64,

    /// Wall-clock time from first read to EOF
    pub elapsed: Duration,
}

/// An in-flight file transfer: the response body plus a completion signal
pub struct Transfer {
    pub body: BoxBody<Bytes, io::Error>,

    /// Resolves once the pump task finishes. `Ok` only when every byte
    /// reached the transport; aborted or failed transfers carry the error.
    pub completion: oneshot::Receiver<io::Result<TransferReport>>,
}

/// Start streaming an open file in chunks of at most `chunk_size` bytes.
///
/// The pump task owns the file handle and reads at most one chunk ahead of
/// the transport (capacity-1 channel), so arbitrarily large files transfer
/// in constant memory. Dropping the body mid-stream (client disconnect)
/// makes the next send fail, which aborts the pump and releases the handle.
pub fn start(file: File, chunk_size: usize) -> Transfer {
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, io::Error>>(1);
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(pump(file, chunk_size, tx, done_tx));

    Transfer {
        body: StreamBody::new(ReceiverStream::new(rx)).boxed(),
        completion: done_rx,
    }
}

async fn pump(
    mut file: File,
    chunk_size: usize,
    tx: mpsc::Sender<Result<Frame<Bytes>, io::Error>>,
    done_tx: oneshot::Sender<io::Result<TransferReport>>,
) {
    let start = Instant::now();
    let mut total: u64 = 0;
    let mut buf = vec![0u8; chunk_size];

    loop {
        match file.read(&mut buf).await {
            Ok(0) => {
                let _ = done_tx.send(Ok(TransferReport {
                    bytes: total,
                    elapsed: start.elapsed(),
                }));
                return;
            }
            Ok(n) => {
                total += n as u64;
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if tx.send(Ok(Frame::data(chunk))).await.is_err() {
                    // Receiver dropped: the client went away.
                    let _ = done_tx.send(Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "client disconnected mid-transfer",
                    )));
                    return;
                }
            }
            Err(e) => {
                let kind = e.kind();
                let _ = tx.send(Err(e)).await;
                let _ = done_tx.send(Err(io::Error::new(kind, "read failed mid-transfer")));
                return;
            }
        }
    }
}
