//! Cancellable line stream returned by `stream_logs` on both backends.
//!
//! The adapter keeps a [`LogSink`] inside its producer task and hands the
//! matching [`LogStream`] to the caller. Lines flow over a bounded channel;
//! cancellation flows back over a watch channel and is also signalled when the
//! stream is dropped. Producers check for cancellation between fetches, so an
//! in-flight fetch is never interrupted.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};

pub const DEFAULT_LOG_BUFFER: usize = 256;

pub fn channel(buffer: usize) -> (LogSink, LogStream) {
    let (line_tx, line_rx) = mpsc::channel(buffer.max(1));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (
        LogSink {
            lines: line_tx,
            cancel: cancel_rx,
        },
        LogStream {
            lines: line_rx,
            cancel: cancel_tx,
        },
    )
}

#[derive(Debug)]
pub struct LogStream {
    lines: mpsc::Receiver<String>,
    cancel: watch::Sender<bool>,
}

impl LogStream {
    /// Next line, or `None` once the producer has stopped.
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Asks the producer to stop after its current fetch.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl Stream for LogStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.lines.poll_recv(cx)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct LogSink {
    lines: mpsc::Sender<String>,
    cancel: watch::Receiver<bool>,
}

impl LogSink {
    /// Delivers one line; returns false when the consumer is gone or cancelled.
    pub async fn send(&self, line: impl Into<String>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.lines.send(line.into()).await.is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.lines.is_closed()
    }

    /// Resolves once the consumer cancels or drops the stream.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.wait_for(|cancelled| *cancelled) => {}
            _ = self.lines.closed() => {}
        }
    }
}
