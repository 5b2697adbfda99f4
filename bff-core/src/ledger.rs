//! Append-only store of submitted messages.
//!
//! The ledger owns every message once appended. Reads hand out clones so no
//! caller ever holds the lock beyond the call.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// High-water mark for generated ids, in nanoseconds since the epoch.
static LAST_ID_NANOS: AtomicI64 = AtomicI64::new(0);

/// Identifier of a stored message, formatted as `msg_<unix nanos>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh id.
    ///
    /// Ids come from the wall clock but never repeat: if the clock has not
    /// moved past the last issued value, the next nanosecond is used instead.
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut last = LAST_ID_NANOS.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match LAST_ID_NANOS.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(format!("msg_{next}")),
                Err(actual) => last = actual,
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A submitted message. `flagged` is decided once at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub user_id: String,
    pub content: String,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with a freshly generated id.
    pub fn new(user_id: impl Into<String>, content: impl Into<String>, flagged: bool) -> Self {
        Self {
            id: MessageId::generate(),
            user_id: user_id.into(),
            content: content.into(),
            flagged,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct LedgerInner {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
}

/// Thread-safe, append-only message store.
#[derive(Default)]
pub struct MessageLedger {
    inner: Mutex<LedgerInner>,
}

impl MessageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a message.
    pub fn append(&self, message: Message) {
        let mut inner = self.inner.lock();
        let position = inner.messages.len();
        if inner.index.insert(message.id.clone(), position).is_some() {
            tracing::warn!(id = %message.id, "message id reused; lookups now resolve to the newer entry");
        }
        inner.messages.push(message);
    }

    /// Look up a message by id.
    pub fn get_by_id(&self, id: &str) -> Option<Message> {
        let inner = self.inner.lock();
        inner
            .index
            .get(id)
            .and_then(|&position| inner.messages.get(position))
            .cloned()
    }

    /// Snapshot of every message in submission order.
    pub fn get_all(&self) -> Vec<Message> {
        self.inner.lock().messages.clone()
    }

    /// Snapshot of one user's messages in submission order.
    pub fn get_by_user(&self, user_id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }
}

impl fmt::Debug for MessageLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLedger")
            .field("len", &self.len())
            .finish()
    }
}
