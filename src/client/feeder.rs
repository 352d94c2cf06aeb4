//! Ordered, readiness-gated appends into a host media buffer
//!
//! The feeder never appends while the buffer is busy and never appends after
//! the buffer has left the open state. A transient rejection is retried once,
//! after waiting for readiness again.

use bytes::Bytes;

use crate::error::{Error, Result};

use super::buffer::{AppendError, MediaBuffer, ReadyState};

/// Feeds chunks into a [`MediaBuffer`] one at a time
pub struct BufferFeeder<B> {
    buffer: B,
}

impl<B: MediaBuffer> BufferFeeder<B> {
    /// Wrap a negotiated buffer
    pub fn new(buffer: B) -> Self {
        Self { buffer }
    }

    /// Borrow the buffer
    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Mutably borrow the buffer
    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    /// Unwrap the buffer
    pub fn into_inner(self) -> B {
        self.buffer
    }

    /// Wait until the buffer is not processing an append
    pub async fn ready(&mut self) {
        while self.buffer.is_busy() {
            self.buffer.idle().await;
        }
    }

    /// Append one chunk
    ///
    /// Returns whether the bounded retry was needed. Fails with
    /// [`Error::BufferClosed`] if the buffer is no longer open, and with
    /// [`Error::BufferAppendFailure`] if the retry is rejected too.
    pub async fn append(&mut self, chunk: &Bytes) -> Result<bool> {
        self.ready().await;
        self.ensure_open()?;

        match self.buffer.append(chunk) {
            Ok(()) => Ok(false),
            Err(AppendError::Transient(reason)) => {
                tracing::debug!(len = chunk.len(), reason = %reason, "Append deferred, retrying once");

                self.ready().await;
                self.ensure_open()?;

                self.buffer
                    .append(chunk)
                    .map(|()| true)
                    .map_err(|e| Error::BufferAppendFailure(e.to_string()))
            }
            Err(e @ AppendError::Fatal(_)) => Err(Error::BufferAppendFailure(e.to_string())),
        }
    }

    /// Signal end of stream once pending appends have been processed
    ///
    /// Returns `false` without touching the buffer if it is no longer open.
    pub async fn finalize(&mut self) -> Result<bool> {
        self.ready().await;

        if self.buffer.ready_state() != ReadyState::Open {
            return Ok(false);
        }

        self.buffer
            .end_of_stream()
            .map(|()| true)
            .map_err(|e| Error::BufferAppendFailure(e.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.buffer.ready_state() {
            ReadyState::Open => Ok(()),
            _ => Err(Error::BufferClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::buffer::fake::FakeBuffer;

    #[tokio::test]
    async fn test_appends_in_order_waiting_for_idle() {
        let mut buffer = FakeBuffer::open();
        buffer.busy_after_append = 2;
        let journal = buffer.journal();

        let mut feeder = BufferFeeder::new(buffer);
        for chunk in ["A", "B", "C"] {
            let retried = feeder.append(&Bytes::from(chunk)).await.unwrap();
            assert!(!retried);
        }

        let journal = journal.lock().unwrap();
        assert_eq!(
            journal.appends,
            vec![Bytes::from("A"), Bytes::from("B"), Bytes::from("C")]
        );
        // Two idle waits before B and two before C
        assert_eq!(journal.idle_waits, 4);
    }

    #[tokio::test]
    async fn test_transient_rejection_retried_once() {
        let mut buffer = FakeBuffer::open();
        buffer
            .append_script
            .push_back(Err(AppendError::Transient("quota".into())));
        let journal = buffer.journal();

        let mut feeder = BufferFeeder::new(buffer);
        assert!(feeder.append(&Bytes::from("A")).await.unwrap());

        let journal = journal.lock().unwrap();
        assert_eq!(journal.append_calls, 2);
        assert_eq!(journal.appends, vec![Bytes::from("A")]);
    }

    #[tokio::test]
    async fn test_second_rejection_fails() {
        let mut buffer = FakeBuffer::open();
        buffer
            .append_script
            .push_back(Err(AppendError::Transient("quota".into())));
        buffer
            .append_script
            .push_back(Err(AppendError::Transient("quota".into())));
        let journal = buffer.journal();

        let mut feeder = BufferFeeder::new(buffer);
        let err = feeder.append(&Bytes::from("A")).await.unwrap_err();

        assert!(matches!(err, Error::BufferAppendFailure(_)));
        assert_eq!(journal.lock().unwrap().append_calls, 2);
    }

    #[tokio::test]
    async fn test_fatal_rejection_not_retried() {
        let mut buffer = FakeBuffer::open();
        buffer
            .append_script
            .push_back(Err(AppendError::Fatal("decode error".into())));
        let journal = buffer.journal();

        let mut feeder = BufferFeeder::new(buffer);
        let err = feeder.append(&Bytes::from("A")).await.unwrap_err();

        assert!(matches!(err, Error::BufferAppendFailure(_)));
        assert_eq!(journal.lock().unwrap().append_calls, 1);
    }

    #[tokio::test]
    async fn test_closed_buffer_refuses_append() {
        let mut buffer = FakeBuffer::open();
        buffer.close_after = Some(1);
        let journal = buffer.journal();

        let mut feeder = BufferFeeder::new(buffer);
        feeder.append(&Bytes::from("A")).await.unwrap();

        let err = feeder.append(&Bytes::from("B")).await.unwrap_err();
        assert!(matches!(err, Error::BufferClosed));
        assert_eq!(journal.lock().unwrap().append_calls, 1);
    }

    #[tokio::test]
    async fn test_finalize_only_when_open() {
        let mut feeder = BufferFeeder::new(FakeBuffer::open());
        assert!(feeder.finalize().await.unwrap());
        assert_eq!(feeder.buffer().ready_state(), ReadyState::Ended);

        // Already ended: nothing to signal
        assert!(!feeder.finalize().await.unwrap());

        let journal = feeder.buffer().journal();
        assert_eq!(journal.lock().unwrap().end_of_stream_calls, 1);
    }

    #[tokio::test]
    async fn test_finalize_waits_for_pending_append() {
        let mut buffer = FakeBuffer::open();
        buffer.busy_after_append = 3;
        let journal = buffer.journal();

        let mut feeder = BufferFeeder::new(buffer);
        feeder.append(&Bytes::from("A")).await.unwrap();
        assert!(feeder.buffer().is_busy());

        feeder.finalize().await.unwrap();

        let journal = journal.lock().unwrap();
        assert_eq!(journal.idle_waits, 3);
        assert_eq!(journal.end_of_stream_calls, 1);
    }
}
