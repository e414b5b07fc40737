//! Event stream plumbing: one producer task, one consumer.
//!
//! Every provider call is modeled as a producer task pushing [`Event`]s
//! through a bounded channel and a consumer draining them with
//! [`EventStream::recv`]. The small buffer gives back-pressure without
//! stalling network reads. Dropping or closing the stream aborts the
//! producer, which in turn drops any in-flight HTTP request.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{Event, Phase, Usage};
use crate::{Error, Result};

/// Channel capacity between producer and consumer.
pub const EVENT_BUFFER: usize = 32;

/// Producer half of an event stream.
///
/// All send methods return `false` once the consumer is gone, so producer
/// loops can bail out instead of doing useless work.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Result<Event>>,
}

impl EventSender {
    /// Send any event
    pub async fn send(&self, event: Event) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    /// Send a terminal error
    pub async fn fail(&self, err: Error) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }

    /// Send a text delta (no-op for empty text)
    pub async fn text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.is_empty() {
            return true;
        }
        self.send(Event::TextDelta { text }).await
    }

    /// Send a reasoning delta
    pub async fn reasoning(
        &self,
        text: impl Into<String>,
        item_id: Option<String>,
        encrypted_content: Option<String>,
    ) -> bool {
        self.send(Event::ReasoningDelta {
            text: text.into(),
            item_id,
            encrypted_content,
        })
        .await
    }

    /// Send a completed tool call
    pub async fn tool_call(&self, call: crate::types::ToolCall) -> bool {
        self.send(Event::ToolCall(call)).await
    }

    /// Send token accounting
    pub async fn usage(&self, usage: Usage) -> bool {
        self.send(Event::Usage(usage)).await
    }

    /// Send a phase change
    pub async fn phase(&self, phase: Phase) -> bool {
        self.send(Event::Phase(phase)).await
    }

    /// Send the terminal success marker
    pub async fn done(&self) -> bool {
        self.send(Event::Done).await
    }

    /// True if the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half: a stream of events ending in exactly one `Done` or error.
///
/// [`EventStream::recv`] returns `None` after the terminal item; `close` is
/// idempotent and cancels the producer task along with anything it owns
/// (HTTP request, SSE parse, pending tool execution).
pub struct EventStream {
    rx: mpsc::Receiver<Result<Event>>,
    task: Option<JoinHandle<()>>,
    finished: bool,
}

impl EventStream {
    /// Create a bare channel pair. The caller owns the producer side.
    pub fn channel() -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (
            EventSender { tx },
            EventStream {
                rx,
                task: None,
                finished: false,
            },
        )
    }

    /// Spawn a producer task and return the consumer half.
    ///
    /// The producer owns the sender and is responsible for finishing with
    /// [`EventSender::done`] or [`EventSender::fail`].
    pub fn spawn<F, Fut>(producer: F) -> EventStream
    where
        F: FnOnce(EventSender) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (tx, mut stream) = Self::channel();
        stream.task = Some(tokio::spawn(producer(tx)));
        stream
    }

    /// Receive the next event.
    ///
    /// Returns `None` at end-of-stream. The item immediately before
    /// end-of-stream is always `Ok(Event::Done)` or `Err(_)`.
    pub async fn recv(&mut self) -> Option<Result<Event>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(item) => {
                if matches!(item, Ok(Event::Done) | Err(_)) {
                    self.finished = true;
                }
                Some(item)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Close the stream, cancelling the producer. Idempotent.
    pub fn close(&mut self) {
        self.finished = true;
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Drain the stream to completion, collecting every event.
    ///
    /// Stops at the first error and returns it. Mostly useful in tests and
    /// non-interactive callers.
    pub async fn collect(&mut self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(item) = self.recv().await {
            events.push(item?);
        }
        Ok(events)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl futures::Stream for EventStream {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(item)) => {
                if matches!(item, Ok(Event::Done) | Err(_)) {
                    self.finished = true;
                }
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let mut stream = EventStream::spawn(|tx| async move {
            tx.text("one").await;
            tx.text("two").await;
            tx.done().await;
        });

        let events = stream.collect().await.unwrap();
        assert_eq!(events.len(), 3);
        match (&events[0], &events[1]) {
            (Event::TextDelta { text: a }, Event::TextDelta { text: b }) => {
                assert_eq!(a, "one");
                assert_eq!(b, "two");
            }
            _ => panic!("expected text deltas"),
        }
        assert!(matches!(events[2], Event::Done));
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_done() {
        let mut stream = EventStream::spawn(|tx| async move {
            tx.done().await;
            // Anything sent after done must not be observed.
            tx.text("late").await;
        });

        assert!(matches!(stream.recv().await, Some(Ok(Event::Done))));
        assert!(stream.recv().await.is_none());
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let mut stream = EventStream::spawn(|tx| async move {
            tx.text("partial").await;
            tx.fail(Error::stream("boom")).await;
        });

        assert!(matches!(stream.recv().await, Some(Ok(Event::TextDelta { .. }))));
        assert!(matches!(stream.recv().await, Some(Err(Error::Stream(_)))));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut stream = EventStream::spawn(|tx| async move {
            loop {
                if !tx.text("tick").await {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        });

        let _ = stream.recv().await;
        stream.close();
        stream.close();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sender_reports_closed_consumer() {
        let (tx, stream) = EventStream::channel();
        drop(stream);
        assert!(!tx.text("nobody home").await);
        assert!(tx.is_closed());
    }
}
