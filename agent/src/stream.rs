//! Asynchronous event queue with terminal-result extraction.
//!
//! An [`EventStream`] decouples a streaming producer from its consumer: the
//! producer side ([`EventSink`]) pushes without blocking, the consumer side
//! iterates lazily, and a typed *final value* is available without draining
//! every event. When an event classified as terminal by [`TerminalEvent`]
//! passes through the sink, the stream ends and the result future resolves
//! with the extracted output; later pushes are ignored.
//!
//! The two parameterizations this workspace uses:
//!
//! - `AssistantMessageEvent` → `AssistantMessage` (one model response)
//! - `AgentEvent` → `Vec<Message>` (one agent run)
//!
//! One producer handle (cloneable), one consumer. The buffer is unbounded;
//! the upstream model bounds the producer rate, and consumers that cannot
//! keep up are expected to cancel rather than exert backpressure.

use std::sync::{Arc, Mutex};

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use strand_core::llm::{AssistantMessage, AssistantMessageEvent};
use tokio::sync::{mpsc, oneshot};

/// Classifies terminal events and extracts their final value.
pub trait TerminalEvent: Sized {
    /// The final value carried by terminal events.
    type Output;

    /// Returns the extracted output when this event is terminal.
    fn terminal(&self) -> Option<Self::Output>;
}

impl TerminalEvent for AssistantMessageEvent {
    type Output = AssistantMessage;

    fn terminal(&self) -> Option<AssistantMessage> {
        self.final_message().cloned()
    }
}

struct SinkState<E: TerminalEvent> {
    tx: Option<mpsc::UnboundedSender<E>>,
    result_tx: Option<oneshot::Sender<E::Output>>,
}

/// Producer handle of an [`EventStream`]. Cloneable; all clones feed the
/// same stream.
pub struct EventSink<E: TerminalEvent> {
    state: Arc<Mutex<SinkState<E>>>,
}

impl<E: TerminalEvent> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<E: TerminalEvent> std::fmt::Debug for EventSink<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("ended", &self.is_ended())
            .finish()
    }
}

impl<E: TerminalEvent> EventSink<E> {
    /// Pushes an event. Non-blocking; a no-op once the stream has ended.
    ///
    /// A terminal event is delivered to the consumer, resolves the result
    /// future, and ends the stream.
    pub fn push(&self, event: E) {
        let result = event.terminal();
        let mut state = self.state.lock().expect("event sink poisoned");
        let Some(tx) = state.tx.as_ref() else {
            return;
        };
        let _ = tx.send(event);
        if let Some(output) = result {
            state.tx = None;
            if let Some(result_tx) = state.result_tx.take() {
                let _ = result_tx.send(output);
            }
        }
    }

    /// Forces the stream to end. When `result` is present it resolves the
    /// result future; waiting consumers observe end-of-stream either way.
    pub fn end(&self, result: Option<E::Output>) {
        let mut state = self.state.lock().expect("event sink poisoned");
        state.tx = None;
        if let (Some(output), Some(result_tx)) = (result, state.result_tx.take()) {
            let _ = result_tx.send(output);
        }
    }

    /// Returns `true` once the stream has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state.lock().expect("event sink poisoned").tx.is_none()
    }
}

/// Consumer side: a lazy event sequence plus a typed final value.
pub struct EventStream<E: TerminalEvent> {
    rx: mpsc::UnboundedReceiver<E>,
    result_rx: oneshot::Receiver<E::Output>,
}

impl<E: TerminalEvent> std::fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish()
    }
}

impl<E: TerminalEvent> EventStream<E> {
    /// Creates a connected sink/stream pair.
    #[must_use]
    pub fn channel() -> (EventSink<E>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let sink = EventSink {
            state: Arc::new(Mutex::new(SinkState {
                tx: Some(tx),
                result_tx: Some(result_tx),
            })),
        };
        (sink, Self { rx, result_rx })
    }

    /// Receives the next event; `None` once the stream has ended and the
    /// buffer is drained.
    pub async fn next(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Resolves with the final value, discarding any unconsumed events.
    ///
    /// Returns `None` when the stream ended without a result (producer
    /// dropped, or `end(None)`).
    pub async fn result(self) -> Option<E::Output> {
        drop(self.rx);
        self.result_rx.await.ok()
    }

    /// Drains all remaining events into a vector, then returns it together
    /// with the final value if one was produced.
    pub async fn collect(mut self) -> (Vec<E>, Option<E::Output>) {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        drop(self.rx);
        (events, self.result_rx.await.ok())
    }
}

impl<E: TerminalEvent> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::llm::{ContentBlock, ModelRef, StopReason};

    fn done(text: &str) -> AssistantMessageEvent {
        let mut message =
            AssistantMessage::partial(ModelRef::new("test", "test-api", "test-model"), 0);
        message.content.push(ContentBlock::text(text));
        AssistantMessageEvent::Done {
            reason: StopReason::Stop,
            message,
        }
    }

    fn start() -> AssistantMessageEvent {
        AssistantMessageEvent::Start {
            partial: AssistantMessage::partial(ModelRef::new("test", "test-api", "test-model"), 0),
        }
    }

    #[tokio::test]
    async fn terminal_event_resolves_result() {
        let (sink, stream) = EventStream::<AssistantMessageEvent>::channel();
        sink.push(start());
        sink.push(done("hello"));
        assert!(sink.is_ended());

        let (events, result) = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(result.unwrap().text(), "hello");
    }

    #[tokio::test]
    async fn pushes_after_end_are_ignored() {
        let (sink, stream) = EventStream::<AssistantMessageEvent>::channel();
        sink.push(done("first"));
        sink.push(start());
        sink.push(done("second"));

        let (events, result) = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(result.unwrap().text(), "first");
    }

    #[tokio::test]
    async fn result_without_draining() {
        let (sink, stream) = EventStream::<AssistantMessageEvent>::channel();
        sink.push(start());
        sink.push(start());
        sink.push(done("value"));

        // Consumer skips straight to the final value.
        let result = stream.result().await;
        assert_eq!(result.unwrap().text(), "value");
    }

    #[tokio::test]
    async fn forced_end_releases_consumer() {
        let (sink, mut stream) = EventStream::<AssistantMessageEvent>::channel();
        sink.push(start());
        sink.end(None);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn forced_end_with_result() {
        let (sink, stream) = EventStream::<AssistantMessageEvent>::channel();
        let mut message =
            AssistantMessage::partial(ModelRef::new("test", "test-api", "test-model"), 0);
        message.content.push(ContentBlock::text("forced"));
        sink.end(Some(message));
        assert_eq!(stream.result().await.unwrap().text(), "forced");
    }

    #[tokio::test]
    async fn producer_drop_without_result() {
        let (sink, stream) = EventStream::<AssistantMessageEvent>::channel();
        drop(sink);
        assert!(stream.result().await.is_none());
    }

    #[tokio::test]
    async fn clones_feed_one_stream() {
        let (sink, stream) = EventStream::<AssistantMessageEvent>::channel();
        let clone = sink.clone();
        clone.push(start());
        sink.push(done("shared"));

        let (events, result) = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(result.unwrap().text(), "shared");
    }
}
