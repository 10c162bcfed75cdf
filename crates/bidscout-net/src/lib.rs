//! Network side of the pipeline: URL validation and content classification,
//! page fetching with text extraction, and PDF download into object storage.

pub mod fetch;
pub mod pdf;
mod util;
pub mod validate;

pub use fetch::{html_to_text, FetchError, FetchedPage, PageFetcher};
pub use pdf::{object_key, sanitize_filename, PdfDownloader, PdfOutcome};
pub use validate::{classify_content, portal_for_url, Validation, ValidationStatus, Validator};
