//! Submission pipeline: validate, scan, record.
//!
//! Every submission that passes validation is stored exactly once, whether
//! it is approved or flagged. Rejected submissions leave no trace.

use crate::error::ValidationError;
use crate::keywords::KeywordRegistry;
use crate::ledger::{Message, MessageId, MessageLedger};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Character limit applied when none is configured.
pub const DEFAULT_CHAR_LIMIT: usize = 500;

/// A message as submitted by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub user_id: String,
    pub content: String,
}

impl Submission {
    pub fn new(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Stored and eligible for streaming.
    Approved { message_id: MessageId },
    /// Stored, but contains registered keywords and can never be streamed.
    Flagged {
        message_id: MessageId,
        matched_terms: Vec<String>,
    },
}

impl Verdict {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Verdict::Approved { message_id } | Verdict::Flagged { message_id, .. } => message_id,
        }
    }

    pub fn is_flagged(&self) -> bool {
        matches!(self, Verdict::Flagged { .. })
    }
}

/// A submission that passed validation.
#[derive(Debug)]
struct Validated(Submission);

/// A validated submission together with the keywords found in it.
#[derive(Debug)]
struct Scanned {
    submission: Submission,
    matches: Vec<String>,
}

impl Validated {
    fn check(submission: Submission, limit: usize) -> Result<Self, ValidationError> {
        if submission.content.is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let len = submission.content.chars().count();
        if len > limit {
            return Err(ValidationError::ContentTooLong { len, limit });
        }
        if submission.user_id.is_empty() {
            return Err(ValidationError::EmptyUserId);
        }
        Ok(Self(submission))
    }

    fn scan(self, registry: &KeywordRegistry) -> Scanned {
        let matches = registry.scan(&self.0.content);
        Scanned {
            submission: self.0,
            matches,
        }
    }
}

impl Scanned {
    fn record(self, ledger: &MessageLedger) -> Verdict {
        let flagged = !self.matches.is_empty();
        let message = Message::new(self.submission.user_id, self.submission.content, flagged);
        let message_id = message.id.clone();
        ledger.append(message);

        if flagged {
            Verdict::Flagged {
                message_id,
                matched_terms: self.matches,
            }
        } else {
            Verdict::Approved { message_id }
        }
    }
}

/// Validates, scans and records submissions.
pub struct ModerationGate {
    registry: Arc<KeywordRegistry>,
    ledger: Arc<MessageLedger>,
    char_limit: AtomicUsize,
}

impl ModerationGate {
    /// Create a gate writing into `ledger`. A zero limit is rejected.
    pub fn new(
        registry: Arc<KeywordRegistry>,
        ledger: Arc<MessageLedger>,
        char_limit: usize,
    ) -> Result<Self, ValidationError> {
        if char_limit == 0 {
            return Err(ValidationError::ZeroCharLimit);
        }
        Ok(Self {
            registry,
            ledger,
            char_limit: AtomicUsize::new(char_limit),
        })
    }

    /// Current maximum content length, in characters.
    pub fn char_limit(&self) -> usize {
        self.char_limit.load(Ordering::Relaxed)
    }

    /// Change the character limit for subsequent submissions.
    ///
    /// Messages already stored are not re-checked.
    pub fn set_char_limit(&self, limit: usize) -> Result<(), ValidationError> {
        if limit == 0 {
            return Err(ValidationError::ZeroCharLimit);
        }
        let previous = self.char_limit.swap(limit, Ordering::Relaxed);
        tracing::info!(previous, limit, "character limit changed");
        Ok(())
    }

    /// Run a submission through the pipeline.
    ///
    /// Checks run in a fixed order: empty content, length, then user id.
    /// The first failure is returned and nothing is stored.
    pub fn submit(&self, submission: Submission) -> Result<Verdict, ValidationError> {
        let validated = match Validated::check(submission, self.char_limit()) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "submission rejected");
                return Err(e);
            }
        };

        let verdict = validated.scan(&self.registry).record(&self.ledger);
        match &verdict {
            Verdict::Approved { message_id } => {
                tracing::info!(%message_id, "message approved");
            }
            Verdict::Flagged {
                message_id,
                matched_terms,
            } => {
                tracing::info!(%message_id, ?matched_terms, "message flagged");
            }
        }
        Ok(verdict)
    }
}

impl std::fmt::Debug for ModerationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationGate")
            .field("char_limit", &self.char_limit())
            .finish_non_exhaustive()
    }
}
