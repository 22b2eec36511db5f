//! Keep-alive wrapper for slow-consumer cursor streams.
//!
//! A server may close an idle cursor while the consumer is busy writing the previous
//! batch. The wrapper moves the source into a background worker that, whenever the
//! consumer has not pulled for `interval`, reads one item ahead into a FIFO buffer.
//! The consumer talks to the worker through a request channel; every pull is served
//! from the buffer first and from the source otherwise.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Shortest accepted read-ahead interval; a zero period is not a valid timer.
pub const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepAliveOptions {
    /// Consumer idle time after which the worker reads ahead.
    pub interval: Duration,
    /// Maximum time without any successful read before the stream fails.
    pub timeout: Duration,
}

impl KeepAliveOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval: interval.max(MIN_KEEP_ALIVE_INTERVAL), timeout }
    }
}

/// Advisory counters; they never influence what the stream yields.
#[derive(Debug, Default)]
pub struct KeepAliveStats {
    keep_alive_read_count: AtomicU64,
    max_buffer_length: AtomicU64,
}

impl KeepAliveStats {
    /// Number of reads performed by the background timer.
    pub fn keep_alive_read_count(&self) -> u64 {
        self.keep_alive_read_count.load(Ordering::Relaxed)
    }

    /// Largest number of items buffered ahead of the consumer at any time.
    pub fn max_buffer_length(&self) -> u64 {
        self.max_buffer_length.load(Ordering::Relaxed)
    }

    fn record_read(&self, buffer_length: usize) {
        self.keep_alive_read_count.fetch_add(1, Ordering::Relaxed);
        self.max_buffer_length.fetch_max(buffer_length as u64, Ordering::Relaxed);
    }
}

type Reply<T> = oneshot::Sender<Option<Result<T>>>;

pub struct KeepAliveStream<T> {
    requests: mpsc::Sender<Reply<T>>,
    stats: Arc<KeepAliveStats>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    stopped: bool,
}

impl<T: Send + 'static> KeepAliveStream<T> {
    /// Wrap `source`. Must be called inside a tokio runtime.
    pub fn new(
        source: BoxStream<'static, Result<T>>,
        options: KeepAliveOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (requests, rx) = mpsc::channel(1);
        let stats = Arc::new(KeepAliveStats::default());
        let now = Instant::now();
        let worker = Worker {
            source,
            buffer: VecDeque::new(),
            options,
            cancel: cancel.clone(),
            stats: Arc::clone(&stats),
            last_pull: now,
            last_read: now,
            finished: false,
            timed_out: false,
        };
        let worker = tokio::spawn(worker.run(rx));
        Self { requests, stats, cancel, worker, stopped: false }
    }

    /// Next item, `None` once the source is exhausted, failed, or cancelled.
    ///
    /// A worker that dies without being cancelled yields one `KeepAliveWorker` error.
    pub async fn next(&mut self) -> Option<Result<T>> {
        if self.stopped {
            return None;
        }
        let (reply, response) = oneshot::channel();
        if self.requests.send(reply).await.is_ok() {
            if let Ok(item) = response.await {
                return item;
            }
        }

        self.stopped = true;
        if self.cancel.is_cancelled() {
            return None;
        }
        let reason = match (&mut self.worker).await {
            Ok(()) => "worker exited before the source ended".to_string(),
            Err(err) => err.to_string(),
        };
        log::error!("Keep-alive reader stopped: {reason}");
        Some(Err(Error::KeepAliveWorker(reason)))
    }

    pub fn stats(&self) -> Arc<KeepAliveStats> {
        Arc::clone(&self.stats)
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
        .boxed()
    }
}

impl<T> Drop for KeepAliveStream<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

enum Read<T> {
    Item(Result<T>),
    End,
    TimedOut,
    Cancelled,
}

struct Worker<T> {
    source: BoxStream<'static, Result<T>>,
    buffer: VecDeque<Result<T>>,
    options: KeepAliveOptions,
    cancel: CancellationToken,
    stats: Arc<KeepAliveStats>,
    last_pull: Instant,
    last_read: Instant,
    /// No further reads from the source: it ended, failed, or timed out.
    finished: bool,
    timed_out: bool,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self, mut requests: mpsc::Receiver<Reply<T>>) {
        let interval = self.options.interval.max(MIN_KEEP_ALIVE_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                request = requests.recv() => {
                    let Some(reply) = request else { break };
                    let item = self.serve().await;
                    let _ = reply.send(item);
                }
                _ = ticker.tick() => self.keep_alive().await,
            }
        }
        log::debug!(
            "Keep-alive worker stopped (background reads: {}, max buffer: {})",
            self.stats.keep_alive_read_count(),
            self.stats.max_buffer_length()
        );
    }

    async fn serve(&mut self) -> Option<Result<T>> {
        self.last_pull = Instant::now();

        if self.timed_out {
            self.timed_out = false;
            self.buffer.clear();
            return Some(Err(self.timeout_error()));
        }
        if let Some(item) = self.buffer.pop_front() {
            return Some(item);
        }
        if self.finished {
            return None;
        }

        match self.read().await {
            Read::Item(item) => {
                if item.is_err() {
                    self.finished = true;
                }
                Some(item)
            }
            Read::End | Read::Cancelled => {
                self.finished = true;
                None
            }
            Read::TimedOut => {
                self.finished = true;
                Some(Err(self.timeout_error()))
            }
        }
    }

    /// Timer tick: read ahead only if the consumer has gone quiet.
    async fn keep_alive(&mut self) {
        if self.finished || self.last_pull.elapsed() < self.options.interval {
            return;
        }

        match self.read().await {
            Read::Item(Ok(item)) => {
                self.buffer.push_back(Ok(item));
                self.stats.record_read(self.buffer.len());
                log::debug!("Keep-alive read, {} buffered", self.buffer.len());
            }
            Read::Item(Err(err)) => {
                // Held back until the consumer reaches this position.
                self.buffer.push_back(Err(err));
                self.finished = true;
            }
            Read::End => self.finished = true,
            Read::TimedOut => {
                log::error!(
                    "Keep-alive timeout after {} ms without a successful read",
                    self.options.timeout.as_millis()
                );
                self.finished = true;
                self.timed_out = true;
            }
            Read::Cancelled => self.finished = true,
        }
    }

    async fn read(&mut self) -> Read<T> {
        let remaining = self.options.timeout.saturating_sub(self.last_read.elapsed());
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = tokio::time::timeout(remaining, self.source.next()) => Some(result),
        };

        match result {
            None => Read::Cancelled,
            Some(Err(_elapsed)) => Read::TimedOut,
            Some(Ok(None)) => Read::End,
            Some(Ok(Some(Ok(item)))) => {
                self.last_read = Instant::now();
                Read::Item(Ok(item))
            }
            Some(Ok(Some(Err(err)))) => Read::Item(Err(err)),
        }
    }

    fn timeout_error(&self) -> Error {
        Error::KeepAliveTimeout { timeout: self.options.timeout }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn numbers(count: u32) -> BoxStream<'static, Result<u32>> {
        stream::iter((0..count).map(Ok)).boxed()
    }

    async fn drain(mut stream: KeepAliveStream<u32>, pause: Duration) -> Vec<u32> {
        let mut items = Vec::new();
        while let Some(item) = stream.next().await {
            items.push(item.expect("stream item"));
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        items
    }

    #[tokio::test]
    async fn fast_consumer_triggers_no_background_reads() {
        let options = KeepAliveOptions::new(Duration::from_millis(500), Duration::from_secs(5));
        let stream = KeepAliveStream::new(numbers(200), options, CancellationToken::new());
        let stats = stream.stats();

        let items = drain(stream, Duration::ZERO).await;

        assert_eq!(items, (0..200).collect::<Vec<_>>());
        assert_eq!(stats.keep_alive_read_count(), 0);
        assert_eq!(stats.max_buffer_length(), 0);
    }

    #[tokio::test]
    async fn slow_consumer_reads_ahead_in_order() {
        let options = KeepAliveOptions::new(Duration::from_millis(10), Duration::from_secs(5));
        let stream = KeepAliveStream::new(numbers(6), options, CancellationToken::new());
        let stats = stream.stats();

        let items = drain(stream, Duration::from_millis(60)).await;

        assert_eq!(items, vec![0, 1, 2, 3, 4, 5]);
        assert!(stats.keep_alive_read_count() >= 1);
        assert!(stats.max_buffer_length() >= 1);
    }

    #[tokio::test]
    async fn stalled_source_fails_with_keep_alive_timeout() {
        let options = KeepAliveOptions::new(Duration::from_millis(10), Duration::from_millis(50));
        let source = stream::pending::<Result<u32>>().boxed();
        let mut stream = KeepAliveStream::new(source, options, CancellationToken::new());

        let err = stream.next().await.expect("an item").expect_err("timeout");
        assert!(err.is_keep_alive_timeout());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn background_timeout_surfaces_on_next_pull() {
        let options = KeepAliveOptions::new(Duration::from_millis(10), Duration::from_millis(50));
        let source = stream::iter(vec![Ok(1u32)]).chain(stream::pending()).boxed();
        let mut stream = KeepAliveStream::new(source, options, CancellationToken::new());

        assert_eq!(stream.next().await.expect("first").expect("ok"), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = stream.next().await.expect("an item").expect_err("timeout");
        assert!(err.is_keep_alive_timeout());
    }

    #[tokio::test]
    async fn background_error_waits_for_its_position() {
        let options = KeepAliveOptions::new(Duration::from_millis(5), Duration::from_secs(5));
        let source = stream::iter(vec![
            Ok(1u32),
            Ok(2),
            Err(Error::Parse("cursor killed".into())),
            Ok(3),
        ])
        .boxed();
        let mut stream = KeepAliveStream::new(source, options, CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stream.next().await.expect("item").expect("ok"), 1);
        assert_eq!(stream.next().await.expect("item").expect("ok"), 2);
        let err = stream.next().await.expect("item").expect_err("buffered error");
        assert!(matches!(err, Error::Parse(_)));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_ends_the_stream() {
        let cancel = CancellationToken::new();
        let options = KeepAliveOptions::new(Duration::from_millis(10), Duration::from_secs(5));
        let mut stream = KeepAliveStream::new(numbers(10), options, cancel.clone());

        assert_eq!(stream.next().await.expect("item").expect("ok"), 0);
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let options = KeepAliveOptions::new(Duration::ZERO, Duration::from_secs(5));
        assert_eq!(options.interval, MIN_KEEP_ALIVE_INTERVAL);

        let unclamped = KeepAliveOptions { interval: Duration::ZERO, ..options };
        let stream = KeepAliveStream::new(numbers(20), unclamped, CancellationToken::new());
        let items = drain(stream, Duration::from_millis(2)).await;
        assert_eq!(items, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn crashed_worker_surfaces_an_error() {
        let options = KeepAliveOptions::new(Duration::from_millis(10), Duration::from_secs(5));
        let source = stream::poll_fn(|_| -> std::task::Poll<Option<Result<u32>>> {
            panic!("cursor driver crashed")
        })
        .boxed();
        let mut stream = KeepAliveStream::new(source, options, CancellationToken::new());

        let err = stream.next().await.expect("an item").expect_err("worker died");
        assert!(matches!(err, Error::KeepAliveWorker(ref reason) if reason.contains("panicked")));
        assert!(!err.is_keep_alive_timeout());
        assert!(stream.next().await.is_none());
    }
}
