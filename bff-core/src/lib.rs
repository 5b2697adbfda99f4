//! Content-moderation relay for a chat front end.
//!
//! This crate provides:
//! - A keyword registry that matches any inflection of a registered word
//! - An append-only message ledger
//! - A moderation gate that validates, scans and records submissions
//! - A streaming relay that forwards completions for approved messages
//!
//! # Quick Start
//!
//! ```ignore
//! use bff_core::{Backend, BffConfig, Submission, Verdict};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Backend::from_config(&BffConfig::from_env()?)?;
//!     backend.keywords().add(["swimming"]);
//!
//!     let verdict = backend.submit(Submission::new("u1", "Tell me about rust"))?;
//!     if let Verdict::Approved { message_id } = verdict {
//!         let (tx, mut rx) = mpsc::channel(16);
//!         let session = backend.open_stream("u1", message_id.as_str())?;
//!         tokio::spawn(session.run(tx));
//!         while let Some(event) = rx.recv().await {
//!             println!("{}: {}", event.name(), event.payload());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod keywords;
pub mod ledger;
pub mod lemma;
pub mod moderation;
pub mod relay;
pub mod testing;
pub mod upstream;

// Primary public API
pub use backend::Backend;
pub use config::BffConfig;
pub use error::{ConfigError, Error, PreflightError, Result, UpstreamError, ValidationError};
pub use keywords::KeywordRegistry;
pub use ledger::{Message, MessageId, MessageLedger};
pub use lemma::{EnglishLemmatizer, IdentityLemmatizer, Lemmatizer};
pub use moderation::{ModerationGate, Submission, Verdict, DEFAULT_CHAR_LIMIT};
pub use relay::{RelayEvent, RelayOutcome, RelaySession, StreamRelay};
pub use testing::{ScriptStep, ScriptedProvider};
pub use upstream::{ChunkStream, CompletionProvider, OpenAiProvider, UpstreamEvent};
