//! PDF download into object storage under stable, per-RFP keys.

use std::sync::Arc;
use std::time::Duration;

use reqwest::redirect::Policy;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use bidscout_storage::ObjectStore;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 10;
const MAX_PDF_BYTES: u64 = 100 * 1024 * 1024;
const USER_AGENT: &str = "Mozilla/5.0 (compatible; RFPBot/1.0)";
const MAX_FILENAME_LEN: usize = 200;

#[derive(Debug, Error)]
enum DownloadError {
    #[error("HTTP {0} downloading PDF")]
    Status(u16),
    #[error("PDF too large: {0} bytes")]
    TooLarge(u64),
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store failed: {0}")]
    Store(#[from] bidscout_storage::ObjectStoreError),
}

/// Result of one download-and-store attempt. Failures are carried in
/// `error` rather than propagated; one bad PDF never sinks the batch.
#[derive(Debug, Clone)]
pub struct PdfOutcome {
    pub source_url: String,
    pub key: String,
    pub size: u64,
    pub error: Option<String>,
}

pub struct PdfDownloader {
    http: reqwest::Client,
    store: Arc<dyn ObjectStore>,
}

impl PdfDownloader {
    pub fn new(store: Arc<dyn ObjectStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;
        Ok(PdfDownloader { http, store })
    }

    /// Download one PDF and store it. If the key already exists the download
    /// is skipped entirely.
    pub async fn download_and_store(&self, pdf_url: &str, rfp_id: i64) -> PdfOutcome {
        let key = object_key(pdf_url, rfp_id);
        let mut outcome = PdfOutcome {
            source_url: pdf_url.to_string(),
            key: key.clone(),
            size: 0,
            error: None,
        };

        match self.store.exists(&key).await {
            Ok(true) => {
                debug!(key, "pdf already stored, skipping download");
                return outcome;
            }
            Ok(false) => {}
            Err(err) => {
                outcome.error = Some(err.to_string());
                return outcome;
            }
        }

        match self.download(pdf_url).await {
            Ok(bytes) => {
                outcome.size = bytes.len() as u64;
                if let Err(err) = self.store.upload(&key, &bytes, "application/pdf").await {
                    outcome.error = Some(err.to_string());
                }
            }
            Err(err) => outcome.error = Some(err.to_string()),
        }

        outcome
    }

    /// Download a batch for one RFP, collecting per-URL outcomes.
    pub async fn download_all(&self, pdf_urls: &[String], rfp_id: i64) -> Vec<PdfOutcome> {
        let mut outcomes = Vec::with_capacity(pdf_urls.len());
        for url in pdf_urls {
            let outcome = self.download_and_store(url, rfp_id).await;
            if let Some(error) = &outcome.error {
                warn!(url, error, "pdf download failed");
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn download(&self, pdf_url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .http
            .get(pdf_url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/pdf,*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        // Servers routinely misconfigure Content-Type for PDFs, so the MIME
        // header is never grounds for rejection on its own.
        if let Some(declared) = response.content_length() {
            if declared > MAX_PDF_BYTES {
                return Err(DownloadError::TooLarge(declared));
            }
        }

        let mut response = response;
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if (buf.len() + chunk.len()) as u64 > MAX_PDF_BYTES {
                return Err(DownloadError::TooLarge((buf.len() + chunk.len()) as u64));
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

/// Stable object key for a PDF: `pdfs/{rfp_id}/{sanitized_filename}`, or a
/// hash-derived name when the URL path has no usable filename.
pub fn object_key(pdf_url: &str, rfp_id: i64) -> String {
    let filename = Url::parse(pdf_url)
        .ok()
        .and_then(|url| {
            url.path_segments().and_then(|mut segments| {
                segments.next_back().map(|s| {
                    percent_encoding::percent_decode_str(s)
                        .decode_utf8_lossy()
                        .into_owned()
                })
            })
        })
        .filter(|name| !name.is_empty() && name != "." && name != "/");

    match filename {
        Some(name) => {
            let mut name = sanitize_filename(&name);
            if !name.to_lowercase().ends_with(".pdf") {
                name.push_str(".pdf");
            }
            format!("pdfs/{rfp_id}/{name}")
        }
        None => format!("pdfs/{rfp_id}/{}.pdf", url_hash_prefix(pdf_url)),
    }
}

fn url_hash_prefix(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

/// Replace filesystem-hostile characters and cap the length, preserving the
/// extension.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized: String = filename
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' => '_',
            other => other,
        })
        .collect();

    if sanitized.len() > MAX_FILENAME_LEN {
        let ext = sanitized
            .rfind('.')
            .map(|idx| sanitized[idx..].to_string())
            .unwrap_or_default();
        let keep = MAX_FILENAME_LEN.saturating_sub(ext.len());
        let mut end = keep;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
        sanitized.push_str(&ext);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidscout_storage::FsObjectStore;
    use tempfile::tempdir;

    #[test]
    fn key_from_simple_filename() {
        assert_eq!(
            object_key("https://example.com/docs/rfp-2024.pdf", 123),
            "pdfs/123/rfp-2024.pdf"
        );
    }

    #[test]
    fn key_sanitizes_spaces() {
        assert_eq!(
            object_key("https://example.com/docs/RFP%20Document%202024.pdf", 456),
            "pdfs/456/RFP_Document_2024.pdf"
        );
    }

    #[test]
    fn key_appends_pdf_extension() {
        assert_eq!(
            object_key("https://example.com/download/document", 789),
            "pdfs/789/document.pdf"
        );
    }

    #[test]
    fn key_ignores_query_parameters() {
        assert_eq!(
            object_key("https://example.com/download.php?file=proposal.pdf&id=123", 100),
            "pdfs/100/download.php.pdf"
        );
    }

    #[test]
    fn key_falls_back_to_url_hash() {
        let key = object_key("https://example.com/", 7);
        assert!(key.starts_with("pdfs/7/"));
        assert!(key.ends_with(".pdf"));
        // 8 bytes of sha256, hex encoded.
        assert_eq!(key.len(), "pdfs/7/".len() + 16 + 4);
        // Deterministic for the same URL.
        assert_eq!(key, object_key("https://example.com/", 7));
    }

    #[test]
    fn sanitize_cases() {
        assert_eq!(sanitize_filename("document.pdf"), "document.pdf");
        assert_eq!(sanitize_filename("my document.pdf"), "my_document.pdf");
        assert_eq!(sanitize_filename("file:name?.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("path/to/file.pdf"), "path_to_file.pdf");
    }

    #[test]
    fn sanitize_truncates_preserving_extension() {
        let long = format!("{}.pdf", "a".repeat(300));
        let out = sanitize_filename(&long);
        assert!(out.len() <= MAX_FILENAME_LEN);
        assert!(out.ends_with(".pdf"));
    }

    #[tokio::test]
    async fn existing_key_skips_download() {
        let dir = tempdir().expect("tempdir");
        let store = Arc::new(FsObjectStore::new(dir.path(), "rfp-documents"));
        store
            .upload("pdfs/5/doc.pdf", b"already here", "application/pdf")
            .await
            .expect("seed");

        let downloader = PdfDownloader::new(store.clone()).unwrap();
        // The URL host does not resolve; success proves no download happened.
        let outcome = downloader
            .download_and_store("https://invalid.invalid/doc.pdf", 5)
            .await;
        assert!(outcome.error.is_none(), "{:?}", outcome.error);
        assert_eq!(outcome.key, "pdfs/5/doc.pdf");
    }
}
