//! Testing utilities.
//!
//! This module provides a scripted [`CompletionProvider`] for deterministic
//! tests without API calls.

use crate::error::UpstreamError;
use crate::upstream::{ChunkStream, CompletionProvider, UpstreamEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One step of a scripted upstream response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield a text fragment.
    Delta(String),
    /// Yield the clean end marker.
    Done,
    /// Yield a transport-level failure.
    Fail(UpstreamError),
    /// Never yield again.
    Hang,
}

/// A provider that replays the same script for every request.
pub struct ScriptedProvider {
    steps: Vec<ScriptStep>,
    open_error: Option<UpstreamError>,
    step_delay: Option<Duration>,
    calls: AtomicUsize,
    contents: parking_lot::Mutex<Vec<String>>,
    released: Arc<AtomicUsize>,
}

/// Counts streams as they are dropped.
struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedProvider {
    /// Create a provider that plays `steps` in order, then ends.
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            open_error: None,
            step_delay: None,
            calls: AtomicUsize::new(0),
            contents: parking_lot::Mutex::new(Vec::new()),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Yield each fragment, then [`UpstreamEvent::Done`].
    pub fn chunks(fragments: &[&str]) -> Self {
        let mut steps: Vec<ScriptStep> = fragments
            .iter()
            .map(|f| ScriptStep::Delta(f.to_string()))
            .collect();
        steps.push(ScriptStep::Done);
        Self::new(steps)
    }

    /// Fail every request before any output, as a rejected HTTP call would.
    pub fn failing(error: UpstreamError) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.open_error = Some(error);
        provider
    }

    /// Sleep before each step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Number of times `open` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content of every request, in call order.
    pub fn contents(&self) -> Vec<String> {
        self.contents.lock().clone()
    }

    /// Number of streams that have been dropped.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` streams have been dropped.
    ///
    /// # Panics
    ///
    /// Panics if that does not happen within two seconds.
    pub async fn wait_released(&self, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while self.released() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "expected {count} released streams, saw {}",
            self.released()
        );
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn open(&self, content: &str) -> Result<ChunkStream, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contents.lock().push(content.to_string());
        if let Some(error) = &self.open_error {
            return Err(error.clone());
        }

        let steps: VecDeque<ScriptStep> = self.steps.iter().cloned().collect();
        let guard = ReleaseGuard(Arc::clone(&self.released));
        let delay = self.step_delay;

        let stream = futures::stream::unfold((steps, guard), move |(mut steps, guard)| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let item = match steps.pop_front()? {
                ScriptStep::Delta(text) => Ok(UpstreamEvent::Delta(text)),
                ScriptStep::Done => Ok(UpstreamEvent::Done),
                ScriptStep::Fail(error) => Err(error),
                ScriptStep::Hang => {
                    std::future::pending::<()>().await;
                    return None;
                }
            };
            Some((item, (steps, guard)))
        });
        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
