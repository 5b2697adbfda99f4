//! Per-request streaming relay.
//!
//! A [`RelaySession`] is opened for one approved message. It spawns a pump
//! task that drains the provider into two queues:
//!
//! - a bounded chunk queue of text fragments
//! - a single-slot error queue
//!
//! The session's event loop races those queues against the downstream
//! client going away and forwards everything as [`RelayEvent`]s. Exactly
//! one `done` or `error` event ends a session that was not cancelled.

use crate::error::{PreflightError, UpstreamError};
use crate::ledger::{Message, MessageId, MessageLedger};
use crate::upstream::{CompletionProvider, UpstreamEvent};
use futures::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Capacity of the chunk queue between the pump and the event loop.
pub const CHUNK_QUEUE_CAPACITY: usize = 100;

const CONNECTED_PAYLOAD: &str = "Connected to completion stream";
const DONE_PAYLOAD: &str = "Stream completed";

/// A named event sent to the downstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Connection(String),
    Data(String),
    Done(String),
    Error(String),
}

impl RelayEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Connection(_) => "connection",
            RelayEvent::Data(_) => "data",
            RelayEvent::Done(_) => "done",
            RelayEvent::Error(_) => "error",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            RelayEvent::Connection(p)
            | RelayEvent::Data(p)
            | RelayEvent::Done(p)
            | RelayEvent::Error(p) => p,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::Done(_) | RelayEvent::Error(_))
    }

    fn connected() -> Self {
        RelayEvent::Connection(CONNECTED_PAYLOAD.to_string())
    }

    fn done() -> Self {
        RelayEvent::Done(DONE_PAYLOAD.to_string())
    }

    fn error(error: &UpstreamError) -> Self {
        RelayEvent::Error(format!("Error: {error}"))
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished and `done` was delivered.
    Completed,
    /// Upstream failed and `error` was delivered.
    Failed,
    /// The client went away or the session was cancelled.
    Cancelled,
}

/// Opens relay sessions for stored messages.
pub struct StreamRelay {
    ledger: Arc<MessageLedger>,
    provider: Arc<dyn CompletionProvider>,
}

impl StreamRelay {
    pub fn new(ledger: Arc<MessageLedger>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { ledger, provider }
    }

    /// Check that `message_id` exists, belongs to `user_id` and is not flagged.
    pub fn preflight(&self, user_id: &str, message_id: &str) -> Result<Message, PreflightError> {
        let message = self
            .ledger
            .get_by_id(message_id)
            .ok_or_else(|| PreflightError::NotFound(message_id.to_string()))?;
        if message.user_id != user_id {
            return Err(PreflightError::NotOwner);
        }
        if message.flagged {
            return Err(PreflightError::Flagged);
        }
        Ok(message)
    }

    /// Run pre-flight checks and start streaming the message.
    ///
    /// The provider is only contacted when every check passes. Must be
    /// called from within a Tokio runtime.
    pub fn open(&self, user_id: &str, message_id: &str) -> Result<RelaySession, PreflightError> {
        let message = match self.preflight(user_id, message_id) {
            Ok(message) => message,
            Err(e) => {
                tracing::info!(user_id, message_id, error = %e, "stream refused");
                return Err(e);
            }
        };
        Ok(RelaySession::start(message, Arc::clone(&self.provider)))
    }
}

/// A running relay for one message.
///
/// Dropping the session without running it stops the pump task.
pub struct RelaySession {
    id: Uuid,
    message_id: MessageId,
    chunks: mpsc::Receiver<String>,
    errors: mpsc::Receiver<UpstreamError>,
    pump: Option<JoinHandle<()>>,
    span: tracing::Span,
}

/// The downstream stopped accepting events.
struct Disconnected;

impl RelaySession {
    fn start(message: Message, provider: Arc<dyn CompletionProvider>) -> Self {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("relay", session = %id, message_id = %message.id);
        let (chunk_tx, chunks) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        let (error_tx, errors) = mpsc::channel(1);

        let pump = tokio::spawn(
            pump_upstream(provider, message.content, chunk_tx, error_tx).instrument(span.clone()),
        );
        span.in_scope(|| tracing::info!("relay session opened"));

        Self {
            id,
            message_id: message.id,
            chunks,
            errors,
            pump: Some(pump),
            span,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Relay until the upstream finishes or the downstream receiver is dropped.
    pub async fn run(self, downstream: mpsc::Sender<RelayEvent>) -> RelayOutcome {
        self.run_until(downstream, std::future::pending()).await
    }

    /// Relay until the upstream finishes, the downstream receiver is dropped,
    /// or `cancel` resolves.
    ///
    /// Cancellation is checked before every other source, and a pending
    /// upstream error is delivered ahead of any chunks still queued.
    pub async fn run_until<F>(self, downstream: mpsc::Sender<RelayEvent>, cancel: F) -> RelayOutcome
    where
        F: Future<Output = ()> + Send,
    {
        let span = self.span.clone();
        self.event_loop(downstream, cancel).instrument(span).await
    }

    async fn event_loop<F>(mut self, downstream: mpsc::Sender<RelayEvent>, cancel: F) -> RelayOutcome
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(cancel);

        if forward(&downstream, &mut cancel, RelayEvent::connected())
            .await
            .is_err()
        {
            return self.finish(RelayOutcome::Cancelled).await;
        }

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.as_mut() => break RelayOutcome::Cancelled,
                _ = downstream.closed() => break RelayOutcome::Cancelled,
                Some(error) = self.errors.recv() => {
                    break report(&downstream, &mut cancel, &error).await;
                }
                chunk = self.chunks.recv() => match chunk {
                    Some(text) => {
                        if forward(&downstream, &mut cancel, RelayEvent::Data(text)).await.is_err() {
                            break RelayOutcome::Cancelled;
                        }
                    }
                    None => {
                        // The pump pushes its error before closing the chunk queue.
                        if let Ok(error) = self.errors.try_recv() {
                            break report(&downstream, &mut cancel, &error).await;
                        }
                        break match forward(&downstream, &mut cancel, RelayEvent::done()).await {
                            Ok(()) => RelayOutcome::Completed,
                            Err(Disconnected) => RelayOutcome::Cancelled,
                        };
                    }
                },
            }
        };

        self.finish(outcome).await
    }

    async fn finish(mut self, outcome: RelayOutcome) -> RelayOutcome {
        if let Some(pump) = self.pump.take() {
            if outcome == RelayOutcome::Cancelled {
                pump.abort();
            } else if let Err(e) = pump.await {
                tracing::error!(error = %e, "upstream pump task failed");
            }
        }
        tracing::info!(?outcome, "relay session finished");
        outcome
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

/// Send one event, giving up if `cancel` fires first.
async fn forward<F>(
    downstream: &mpsc::Sender<RelayEvent>,
    cancel: &mut Pin<&mut F>,
    event: RelayEvent,
) -> Result<(), Disconnected>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = cancel.as_mut() => Err(Disconnected),
        sent = downstream.send(event) => sent.map_err(|_| Disconnected),
    }
}

async fn report<F>(
    downstream: &mpsc::Sender<RelayEvent>,
    cancel: &mut Pin<&mut F>,
    error: &UpstreamError,
) -> RelayOutcome
where
    F: Future<Output = ()>,
{
    tracing::warn!(%error, "upstream failed");
    match forward(downstream, cancel, RelayEvent::error(error)).await {
        Ok(()) => RelayOutcome::Failed,
        Err(Disconnected) => RelayOutcome::Cancelled,
    }
}

/// Drain the provider into the session queues.
///
/// Returning drops `chunks`, which is how the event loop learns the
/// upstream is finished. Errors are pushed before that happens.
async fn pump_upstream(
    provider: Arc<dyn CompletionProvider>,
    content: String,
    chunks: mpsc::Sender<String>,
    errors: mpsc::Sender<UpstreamError>,
) {
    let opened = tokio::select! {
        biased;
        _ = chunks.closed() => return,
        opened = provider.open(&content) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(error) => {
            let _ = errors.try_send(error);
            return;
        }
    };
    tracing::debug!(provider = provider.name(), "upstream stream opened");

    let mut forwarded = 0usize;
    loop {
        let item = tokio::select! {
            biased;
            _ = chunks.closed() => {
                tracing::debug!(forwarded, "relay closed, abandoning upstream");
                return;
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(UpstreamEvent::Delta(text))) => {
                if text.is_empty() {
                    continue;
                }
                if chunks.send(text).await.is_err() {
                    return;
                }
                forwarded += 1;
            }
            Some(Ok(UpstreamEvent::Done)) | None => {
                tracing::debug!(forwarded, "upstream finished");
                return;
            }
            Some(Err(error)) => {
                let _ = errors.try_send(error);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptStep, ScriptedProvider};

    fn relay_with(provider: ScriptedProvider) -> (StreamRelay, Arc<MessageLedger>, Arc<ScriptedProvider>) {
        let ledger = Arc::new(MessageLedger::new());
        let provider = Arc::new(provider);
        let relay = StreamRelay::new(Arc::clone(&ledger), provider.clone());
        (relay, ledger, provider)
    }

    fn store(ledger: &MessageLedger, user: &str, flagged: bool) -> MessageId {
        let message = Message::new(user, "question", flagged);
        let id = message.id.clone();
        ledger.append(message);
        id
    }

    async fn collect(mut rx: mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_event_names() {
        assert_eq!(RelayEvent::connected().name(), "connection");
        assert_eq!(RelayEvent::Data("x".into()).name(), "data");
        assert_eq!(RelayEvent::done().payload(), "Stream completed");
        assert_eq!(
            RelayEvent::error(&UpstreamError::Transport("reset".into())).payload(),
            "Error: error reading stream: reset"
        );
        assert!(RelayEvent::done().is_terminal());
        assert!(!RelayEvent::connected().is_terminal());
    }

    #[tokio::test]
    async fn test_preflight_refusals_do_not_call_provider() {
        let (relay, ledger, provider) = relay_with(ScriptedProvider::chunks(&["hi"]));
        let flagged = store(&ledger, "u1", true);
        let approved = store(&ledger, "u1", false);

        assert!(matches!(
            relay.open("u1", "msg_missing"),
            Err(PreflightError::NotFound(_))
        ));
        assert!(matches!(
            relay.open("u2", approved.as_str()),
            Err(PreflightError::NotOwner)
        ));
        assert!(matches!(
            relay.open("u1", flagged.as_str()),
            Err(PreflightError::Flagged)
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_relays_chunks_in_order() {
        let (relay, ledger, _) = relay_with(ScriptedProvider::chunks(&["a", "", "b"]));
        let id = store(&ledger, "u1", false);

        let (tx, rx) = mpsc::channel(16);
        let outcome = relay.open("u1", id.as_str()).unwrap().run(tx).await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            collect(rx).await,
            vec![
                RelayEvent::connected(),
                RelayEvent::Data("a".into()),
                RelayEvent::Data("b".into()),
                RelayEvent::done(),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_after_chunks() {
        let provider = ScriptedProvider::new(vec![
            ScriptStep::Delta("a".into()),
            ScriptStep::Fail(UpstreamError::Transport("reset".into())),
        ]);
        let (relay, ledger, _) = relay_with(provider);
        let id = store(&ledger, "u1", false);

        let (tx, rx) = mpsc::channel(16);
        let outcome = relay.open("u1", id.as_str()).unwrap().run(tx).await;

        assert_eq!(outcome, RelayOutcome::Failed);
        let events = collect(rx).await;
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].name(), "error");
        assert_eq!(events.last(), terminal.last().copied());
    }

    #[tokio::test]
    async fn test_pending_error_wins_over_queued_chunks() {
        let mut steps: Vec<ScriptStep> = (0..5)
            .map(|i| ScriptStep::Delta(format!("c{i}")))
            .collect();
        steps.push(ScriptStep::Fail(UpstreamError::Transport("reset".into())));
        let (relay, ledger, provider) = relay_with(ScriptedProvider::new(steps));
        let id = store(&ledger, "u1", false);

        // A full downstream holds the event loop at its first send.
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(RelayEvent::Data("held".into())).await.unwrap();
        let handle = tokio::spawn(relay.open("u1", id.as_str()).unwrap().run(tx));

        // The pump has queued every chunk and the error once its stream is dropped.
        provider.wait_released(1).await;
        assert_eq!(rx.recv().await, Some(RelayEvent::Data("held".into())));

        assert_eq!(
            collect(rx).await,
            vec![
                RelayEvent::connected(),
                RelayEvent::error(&UpstreamError::Transport("reset".into())),
            ]
        );
        assert_eq!(handle.await.unwrap(), RelayOutcome::Failed);
    }

    #[tokio::test]
    async fn test_dropped_session_stops_pump() {
        let (relay, ledger, provider) =
            relay_with(ScriptedProvider::new(vec![ScriptStep::Hang]));
        let id = store(&ledger, "u1", false);

        let session = relay.open("u1", id.as_str()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while provider.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        drop(session);

        provider.wait_released(1).await;
    }
}
