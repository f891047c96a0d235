//! Streaming GET of one web-seed file.
//!
//! libcurl runs on the blocking pool and pushes chunks through a small
//! bounded channel; the async side reads them through a `StreamReader`.

use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

use crate::engine::ContentReader;

/// Chunks buffered between curl and the reader.
const CHUNK_BUFFER: usize = 16;

/// Start streaming `url`. Errors (HTTP >= 400, connection loss) surface as
/// read errors on the returned reader.
pub fn open_stream(url: String, connect_timeout: Duration) -> ContentReader {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHUNK_BUFFER);

    tokio::task::spawn_blocking(move || {
        if let Err(e) = fetch_into(&url, connect_timeout, &tx) {
            // A closed receiver means the reader was dropped; nothing to report.
            if !tx.is_closed() {
                let _ = tx.blocking_send(Err(io::Error::other(format!("GET {}: {}", url, e))));
            }
        }
    });

    Box::new(StreamReader::new(ReceiverStream::new(rx)))
}

fn fetch_into(
    url: &str,
    connect_timeout: Duration,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> Result<(), curl::Error> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.follow_location(true)?;
    easy.fail_on_error(true)?;
    easy.connect_timeout(connect_timeout)?;
    // Abort if the source stalls below 1 byte/s for 60s.
    easy.low_speed_limit(1)?;
    easy.low_speed_time(Duration::from_secs(60))?;

    let mut transfer = easy.transfer();
    transfer.write_function(|data| {
        match tx.blocking_send(Ok(Bytes::copy_from_slice(data))) {
            Ok(()) => Ok(data.len()),
            // Reader dropped: returning short makes curl abort the transfer.
            Err(_) => Ok(0),
        }
    })?;
    transfer.perform()
}
