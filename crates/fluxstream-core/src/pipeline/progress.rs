//! Byte counting and periodic progress logs during persist.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::io::{AsyncRead, ReadBuf};

use crate::engine::ContentReader;

/// Log step when the total length is unknown.
const UNKNOWN_LENGTH_STEP: u64 = 50 * 1024 * 1024;

/// Wraps a content reader, counting bytes and logging every 5% of `expected`
/// (or every 50 MiB when `expected` is 0).
pub struct ProgressReader {
    inner: ContentReader,
    job_id: String,
    expected: u64,
    read: u64,
    next_report: u64,
    started: Instant,
}

impl ProgressReader {
    pub fn new(inner: ContentReader, job_id: &str, expected: u64) -> Self {
        let mut r = Self {
            inner,
            job_id: job_id.to_string(),
            expected,
            read: 0,
            next_report: 0,
            started: Instant::now(),
        };
        r.next_report = r.step();
        r
    }

    fn step(&self) -> u64 {
        if self.expected == 0 {
            UNKNOWN_LENGTH_STEP
        } else {
            (self.expected / 20).max(1)
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.read
    }

    fn report(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            self.read as f64 / elapsed
        } else {
            0.0
        };
        if self.expected > 0 {
            let pct = (self.read as f64 / self.expected as f64 * 100.0).min(100.0);
            tracing::info!(
                job_id = %self.job_id,
                bytes = self.read,
                total = self.expected,
                percent = pct as u64,
                bytes_per_sec = rate as u64,
                "persist progress"
            );
        } else {
            tracing::info!(
                job_id = %self.job_id,
                bytes = self.read,
                bytes_per_sec = rate as u64,
                "persist progress"
            );
        }
    }
}

impl AsyncRead for ProgressReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &polled {
            let n = (buf.filled().len() - before) as u64;
            self.read += n;
            if n > 0 && self.read >= self.next_report {
                self.report();
                let step = self.step();
                while self.next_report <= self.read {
                    self.next_report += step;
                }
            }
        }
        polled
    }
}
