//! Stream session
//!
//! Drives one playback: negotiate a format with the host buffer, then pull
//! chunks from a source and append them in lock-step until the source ends,
//! a stop is requested, or something fails.
//!
//! ```text
//!  ChunkSource ──next_chunk──► StreamSession ──append──► BufferFeeder ──► MediaBuffer
//!                                   │
//!                                   ├── on_progress(SessionProgress)
//!                                   ├── on_end(EndReason)
//!                                   └── on_error(&Error)
//! ```
//!
//! Whatever the exit path, the source is closed and the buffer's transient
//! host resources are released exactly once.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::client::buffer::{FormatDescriptor, MediaBuffer};
use crate::client::config::SessionConfig;
use crate::client::feeder::BufferFeeder;
use crate::client::reader::{ChunkReader, ChunkSource};
use crate::error::{Error, Result};
use crate::stats::SessionStats;

use super::context::{SessionCallbacks, SessionProgress};
use super::state::{EndReason, SessionOutcome, SessionPhase};

/// Requests a cooperative stop of a running session
///
/// The session notices the request at its next suspension point (waiting
/// for a chunk, for buffer readiness, or for the stream to open).
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Request a stop; later calls have no further effect
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// One playback of a chunked media stream into a host buffer
pub struct StreamSession<B> {
    config: SessionConfig,
    feeder: BufferFeeder<B>,
    phase: SessionPhase,
    format: Option<FormatDescriptor>,
    stats: SessionStats,
    callbacks: SessionCallbacks,
    stop_tx: Arc<watch::Sender<bool>>,
    released: bool,
}

impl<B: MediaBuffer> StreamSession<B> {
    /// Create a session with the default format list
    pub fn new(buffer: B) -> Self {
        Self::with_config(buffer, SessionConfig::default())
    }

    /// Create a session with a custom config
    pub fn with_config(buffer: B, config: SessionConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);

        Self {
            config,
            feeder: BufferFeeder::new(buffer),
            phase: SessionPhase::Idle,
            format: None,
            stats: SessionStats::new(),
            callbacks: SessionCallbacks::default(),
            stop_tx: Arc::new(stop_tx),
            released: false,
        }
    }

    /// Called after every successful append
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(SessionProgress) + Send + 'static,
    {
        self.callbacks.on_progress = Some(Box::new(f));
        self
    }

    /// Called once when the session ends without error
    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: FnOnce(EndReason) + Send + 'static,
    {
        self.callbacks.on_end = Some(Box::new(f));
        self
    }

    /// Called once when the session fails
    ///
    /// Without this callback the error is returned from `run`/`play`.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        self.callbacks.on_error = Some(Box::new(f));
        self
    }

    /// Handle for stopping the session from elsewhere
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: Arc::clone(&self.stop_tx),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Negotiated format, once negotiation succeeded
    pub fn format(&self) -> Option<&FormatDescriptor> {
        self.format.as_ref()
    }

    /// Append counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Borrow the host buffer
    pub fn buffer(&self) -> &B {
        self.feeder.buffer()
    }

    /// Take the host buffer back
    pub fn into_buffer(self) -> B {
        self.feeder.into_inner()
    }

    /// Negotiate, then feed every chunk of `source` into the buffer
    pub async fn run<S: ChunkSource>(&mut self, mut source: S) -> Result<SessionOutcome> {
        self.start()?;

        let result = match self.negotiate() {
            Ok(()) => self.feed(&mut source).await,
            Err(e) => Err(e),
        };

        source.close();
        self.finish(result)
    }

    /// Negotiate, open `url` with `client`, then feed the response body
    pub async fn play(&mut self, client: &reqwest::Client, url: &str) -> Result<SessionOutcome> {
        self.start()?;

        if let Err(e) = self.negotiate() {
            return self.finish(Err(e));
        }

        let mut stop_rx = self.stop_tx.subscribe();
        let opened = tokio::select! {
            biased;
            _ = stop_requested(&mut stop_rx) => None,
            opened = ChunkReader::open(client, url) => Some(opened),
        };

        let mut reader = match opened {
            None => return self.finish(Ok(EndReason::Stopped)),
            Some(Err(e)) => return self.finish(Err(e)),
            Some(Ok(reader)) => reader,
        };

        let result = self.feed(&mut reader).await;
        ChunkSource::close(&mut reader);
        self.finish(result)
    }

    fn start(&mut self) -> Result<()> {
        if self.phase != SessionPhase::Idle {
            return Err(Error::AlreadyStarted);
        }
        Ok(())
    }

    fn negotiate(&mut self) -> Result<()> {
        self.phase = SessionPhase::Negotiating;
        let mut tried = Vec::new();

        for candidate in self.config.candidates() {
            match self.feeder.buffer_mut().add_source(candidate) {
                Ok(()) => {
                    tracing::info!(format = %candidate, "Media format negotiated");
                    self.format = Some(candidate.clone());
                    return Ok(());
                }
                Err(rejected) => {
                    tracing::debug!(format = %candidate, error = %rejected, "Media format rejected");
                    tried.push(candidate.to_string());
                }
            }
        }

        Err(Error::UnsupportedMediaFormat { tried })
    }

    async fn feed<S: ChunkSource>(&mut self, source: &mut S) -> Result<EndReason> {
        self.phase = SessionPhase::Feeding;
        self.stats.started_at = Some(Instant::now());

        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => return Ok(EndReason::Stopped),
                next = source.next_chunk() => next?,
            };

            let Some(chunk) = next else {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop_rx) => return Ok(EndReason::Stopped),
                    finalized = self.feeder.finalize() => finalized?,
                };
                return Ok(EndReason::Completed);
            };

            let retried = tokio::select! {
                biased;
                _ = stop_requested(&mut stop_rx) => return Ok(EndReason::Stopped),
                appended = self.feeder.append(&chunk) => appended?,
            };

            if retried {
                self.stats.append_retries += 1;
            }
            self.stats.on_append(chunk.len());

            self.callbacks.progress(SessionProgress {
                bytes_appended: self.stats.bytes_appended,
                chunk_len: chunk.len(),
                chunks: self.stats.chunks_appended,
            });
        }
    }

    fn finish(&mut self, result: Result<EndReason>) -> Result<SessionOutcome> {
        self.stats.finished_at = Some(Instant::now());
        self.release();

        match result {
            Ok(reason) => {
                self.phase = SessionPhase::Ended;
                tracing::info!(
                    reason = %reason,
                    bytes = self.stats.bytes_appended,
                    chunks = self.stats.chunks_appended,
                    "Stream session ended"
                );
                self.callbacks.end(reason);
                Ok(SessionOutcome::Ended(reason))
            }
            Err(error) => {
                self.phase = SessionPhase::Errored;
                tracing::warn!(
                    error = %error,
                    bytes = self.stats.bytes_appended,
                    "Stream session failed"
                );
                match self.callbacks.error(error) {
                    Some(error) => Err(error),
                    None => Ok(SessionOutcome::Errored),
                }
            }
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.feeder.buffer_mut().release();
        }
    }
}

impl<B> std::fmt::Debug for StreamSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("phase", &self.phase)
            .field("format", &self.format)
            .field("stats", &self.stats)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::client::buffer::fake::FakeBuffer;

    struct ScriptedSource {
        items: VecDeque<Result<Bytes>>,
        /// Never end once the script runs out
        hang: bool,
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(chunks: &[&'static str]) -> Self {
            Self {
                items: chunks.iter().map(|c| Ok(Bytes::from(*c))).collect(),
                hang: false,
                reads: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }

        fn then_fail(mut self, error: Error) -> Self {
            self.items.push_back(Err(error));
            self
        }
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.items.pop_front() {
                Some(item) => item.map(Some),
                None if self.hang => std::future::pending().await,
                None => Ok(None),
            }
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_feeds_in_order_and_completes() {
        let mut buffer = FakeBuffer::open();
        buffer.busy_after_append = 1;
        let journal = buffer.journal();

        let source = ScriptedSource::new(&["A", "B", "C"]);
        let closes = Arc::clone(&source.closes);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let ended = Arc::new(Mutex::new(None));
        let progress_log = Arc::clone(&progress);
        let end_log = Arc::clone(&ended);

        let mut session = StreamSession::new(buffer)
            .on_progress(move |p| progress_log.lock().unwrap().push(p))
            .on_end(move |reason| *end_log.lock().unwrap() = Some(reason));

        let outcome = session.run(source).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Ended(EndReason::Completed));
        assert_eq!(session.phase(), SessionPhase::Ended);
        assert_eq!(*ended.lock().unwrap(), Some(EndReason::Completed));

        let journal = journal.lock().unwrap();
        assert_eq!(
            journal.appends,
            vec![Bytes::from("A"), Bytes::from("B"), Bytes::from("C")]
        );
        assert_eq!(journal.end_of_stream_calls, 1);
        assert_eq!(journal.release_calls, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let progress = progress.lock().unwrap();
        let chunks: Vec<u64> = progress.iter().map(|p| p.chunks).collect();
        assert_eq!(chunks, vec![1, 2, 3]);
        assert_eq!(progress[2].bytes_appended, 3);
        assert_eq!(session.stats().chunks_appended, 3);
    }

    #[tokio::test]
    async fn test_stop_releases_once_without_finalizing() {
        let buffer = FakeBuffer::open();
        let journal = buffer.journal();

        let source = ScriptedSource::new(&["A"]).hanging();
        let closes = Arc::clone(&source.closes);

        let session = StreamSession::new(buffer);
        let stop = session.stop_handle();
        let mut session = session.on_progress(move |_| stop.stop());

        let outcome = session.run(source).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Ended(EndReason::Stopped));

        let journal = journal.lock().unwrap();
        assert_eq!(journal.appends, vec![Bytes::from("A")]);
        assert_eq!(journal.end_of_stream_calls, 0);
        assert_eq!(journal.release_calls, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_while_waiting_for_chunk() {
        let buffer = FakeBuffer::open();
        let journal = buffer.journal();

        let mut session = StreamSession::new(buffer);
        let stop = session.stop_handle();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stop.stop();
        });

        let source = ScriptedSource::new(&[]).hanging();
        let outcome = session.run(source).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Ended(EndReason::Stopped));
        assert_eq!(journal.lock().unwrap().release_calls, 1);
    }

    #[tokio::test]
    async fn test_stop_while_buffer_busy() {
        let mut buffer = FakeBuffer::open();
        buffer.busy_after_append = 1;
        buffer.stalled = true;
        let journal = buffer.journal();

        let source = ScriptedSource::new(&["A", "B"]);
        let closes = Arc::clone(&source.closes);

        let mut session = StreamSession::new(buffer);
        let stop = session.stop_handle();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stop.stop();
        });

        // B waits on a buffer that never goes idle
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), session.run(source))
            .await
            .expect("stop not observed while waiting for the buffer")
            .unwrap();
        assert_eq!(outcome, SessionOutcome::Ended(EndReason::Stopped));

        let journal = journal.lock().unwrap();
        assert_eq!(journal.appends, vec![Bytes::from("A")]);
        assert_eq!(journal.idle_waits, 1);
        assert_eq!(journal.end_of_stream_calls, 0);
        assert_eq!(journal.release_calls, 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_plain_mp4() {
        let buffer = FakeBuffer::accepting(&["video/mp4"]);
        let journal = buffer.journal();

        let mut session = StreamSession::new(buffer);
        session.run(ScriptedSource::new(&["A"])).await.unwrap();

        assert_eq!(session.format().map(|f| f.as_str()), Some("video/mp4"));
        assert_eq!(journal.lock().unwrap().attempted_formats.len(), 4);
    }

    #[tokio::test]
    async fn test_all_formats_rejected() {
        let buffer = FakeBuffer::accepting(&[]);
        let journal = buffer.journal();

        let source = ScriptedSource::new(&["A"]);
        let reads = Arc::clone(&source.reads);
        let closes = Arc::clone(&source.closes);

        let failure = Arc::new(Mutex::new(None));
        let failure_log = Arc::clone(&failure);

        let mut session = StreamSession::new(buffer)
            .on_error(move |e| *failure_log.lock().unwrap() = Some(e.to_string()));

        let outcome = session.run(source).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Errored);
        assert_eq!(session.phase(), SessionPhase::Errored);
        assert!(session.format().is_none());

        let message = failure.lock().unwrap().clone().unwrap();
        assert!(message.starts_with("Unsupported media format"));

        let journal = journal.lock().unwrap();
        assert!(journal.appends.is_empty());
        assert_eq!(journal.release_calls, 1);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_without_handler_is_returned() {
        let buffer = FakeBuffer::open();
        let journal = buffer.journal();

        let source = ScriptedSource::new(&["A"]).then_fail(Error::transport("connection reset"));
        let mut session = StreamSession::new(buffer);

        let err = session.run(source).await.unwrap_err();
        assert!(matches!(err, Error::Transport { status: None, .. }));
        assert_eq!(session.phase(), SessionPhase::Errored);
        assert_eq!(journal.lock().unwrap().release_calls, 1);
    }

    #[tokio::test]
    async fn test_externally_closed_buffer_errors() {
        let mut buffer = FakeBuffer::open();
        buffer.close_after = Some(1);
        let journal = buffer.journal();

        let failure = Arc::new(Mutex::new(None));
        let failure_log = Arc::clone(&failure);

        let mut session = StreamSession::new(buffer).on_error(move |e| {
            *failure_log.lock().unwrap() = Some(matches!(e, Error::BufferClosed));
        });

        let outcome = session.run(ScriptedSource::new(&["A", "B"])).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Errored);
        assert_eq!(*failure.lock().unwrap(), Some(true));

        let journal = journal.lock().unwrap();
        assert_eq!(journal.appends, vec![Bytes::from("A")]);
        assert_eq!(journal.end_of_stream_calls, 0);
        assert_eq!(journal.release_calls, 1);
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let mut session = StreamSession::new(FakeBuffer::open());
        session.run(ScriptedSource::new(&[])).await.unwrap();

        let err = session.run(ScriptedSource::new(&[])).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyStarted));
        assert_eq!(session.into_buffer().journal().lock().unwrap().release_calls, 1);
    }

    #[tokio::test]
    async fn test_play_rejects_non_http_url() {
        let buffer = FakeBuffer::open();
        let journal = buffer.journal();

        let client = reqwest::Client::new();
        let mut session = StreamSession::new(buffer);

        let err = session.play(&client, "file:///tmp/video.mp4").await.unwrap_err();
        assert!(matches!(err, Error::StreamUnavailable(_)));
        assert_eq!(journal.lock().unwrap().release_calls, 1);
    }
}
