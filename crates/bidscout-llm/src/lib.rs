//! Provider client for grounded search and structured RFP extraction.
//!
//! Two typed operations against a `generateContent`-style endpoint: a web
//! search with grounding enabled that yields candidate listing URLs, and a
//! JSON-schema extraction that turns page text into [`ExtractedDetails`].
//! Neither operation retries internally; retry policy belongs to the
//! scheduler.

pub mod client;
pub mod queries;
pub mod wire;

pub use client::{LlmClient, LlmError, SearchHit, SearchOutcome, Source};
pub use queries::default_query_templates;
