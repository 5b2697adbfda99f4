//! The assembled service state shared by every request.

use crate::config::BffConfig;
use crate::error::{PreflightError, Result, UpstreamError, ValidationError};
use crate::keywords::KeywordRegistry;
use crate::ledger::MessageLedger;
use crate::moderation::{ModerationGate, Submission, Verdict};
use crate::relay::{RelaySession, StreamRelay};
use crate::upstream::{CompletionProvider, OpenAiProvider};
use std::sync::Arc;

/// Keyword registry, message ledger, moderation gate and stream relay,
/// wired to share one ledger and one registry.
pub struct Backend {
    keywords: Arc<KeywordRegistry>,
    ledger: Arc<MessageLedger>,
    gate: ModerationGate,
    relay: StreamRelay,
    provider: Arc<dyn CompletionProvider>,
}

impl Backend {
    /// Assemble a backend around `provider` with an English keyword registry.
    pub fn new(provider: Arc<dyn CompletionProvider>, char_limit: usize) -> Result<Self> {
        Self::with_registry(provider, Arc::new(KeywordRegistry::english()), char_limit)
    }

    /// Assemble a backend with a caller-supplied keyword registry.
    pub fn with_registry(
        provider: Arc<dyn CompletionProvider>,
        keywords: Arc<KeywordRegistry>,
        char_limit: usize,
    ) -> Result<Self> {
        let ledger = Arc::new(MessageLedger::new());
        let gate = ModerationGate::new(Arc::clone(&keywords), Arc::clone(&ledger), char_limit)?;
        let relay = StreamRelay::new(Arc::clone(&ledger), Arc::clone(&provider));
        Ok(Self {
            keywords,
            ledger,
            gate,
            relay,
            provider,
        })
    }

    /// Assemble a backend that streams from the Chat Completions API.
    pub fn from_config(config: &BffConfig) -> Result<Self> {
        let provider = OpenAiProvider::new(config.openai_client())
            .with_instruction(config.instruction.clone());
        Self::new(Arc::new(provider), config.char_limit)
    }

    pub fn keywords(&self) -> &KeywordRegistry {
        &self.keywords
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    pub fn gate(&self) -> &ModerationGate {
        &self.gate
    }

    pub fn relay(&self) -> &StreamRelay {
        &self.relay
    }

    pub fn submit(&self, submission: Submission) -> std::result::Result<Verdict, ValidationError> {
        self.gate.submit(submission)
    }

    pub fn open_stream(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> std::result::Result<RelaySession, PreflightError> {
        self.relay.open(user_id, message_id)
    }

    /// Ask the provider to confirm it is usable.
    pub async fn verify_upstream(&self) -> std::result::Result<(), UpstreamError> {
        self.provider.verify().await
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("keywords", &self.keywords)
            .field("ledger", &self.ledger)
            .field("gate", &self.gate)
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use crate::Error;

    #[test]
    fn test_components_share_state() {
        let backend = Backend::new(Arc::new(ScriptedProvider::chunks(&[])), 100).unwrap();
        backend.keywords().add(["cats"]);

        let verdict = backend.submit(Submission::new("u1", "my cat")).unwrap();

        assert!(verdict.is_flagged());
        assert_eq!(backend.ledger().len(), 1);
        assert!(matches!(
            backend.open_stream("u1", verdict.message_id().as_str()),
            Err(PreflightError::Flagged)
        ));
    }

    #[test]
    fn test_zero_char_limit_is_config_error() {
        let err = Backend::new(Arc::new(ScriptedProvider::chunks(&[])), 0).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::ZeroCharLimit)));
    }

    #[tokio::test]
    async fn test_verify_upstream_default() {
        let backend = Backend::new(Arc::new(ScriptedProvider::chunks(&[])), 10).unwrap();
        assert!(backend.verify_upstream().await.is_ok());
    }

    #[test]
    fn test_from_config() {
        let config = BffConfig::new("sk-test").with_char_limit(42);
        let backend = Backend::from_config(&config).unwrap();
        assert_eq!(backend.gate().char_limit(), 42);
    }
}
