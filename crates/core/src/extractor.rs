use crate::error::IngestError;
use crate::parse_service::{ParseResponse, ParseServiceClient};
use crate::text::normalize_text;
use async_trait::async_trait;
use lopdf::Document;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Produces raw per-page text for a PDF, pages in order, numbered from 1.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    fn extract_blocking(path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if normalize_text(&text).is_empty() {
                debug!(page = page_no, path = %path.display(), "skipping empty page");
                continue;
            }
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

#[async_trait]
impl DocumentExtractor for LopdfExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    async fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        if !path.exists() {
            return Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )));
        }

        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::extract_blocking(&owned))
            .await
            .map_err(|error| IngestError::Task(error.to_string()))?
    }
}

/// Sends the file path to the parse service. Every failure is reported as
/// [`IngestError::RemoteParse`] so a [`FallbackExtractor`] can recover from it.
pub struct RemoteParseExtractor {
    client: ParseServiceClient,
}

impl RemoteParseExtractor {
    pub fn new(client: ParseServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentExtractor for RemoteParseExtractor {
    fn name(&self) -> &'static str {
        "parse-service"
    }

    async fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let response = self
            .client
            .parse_pdf(&path.to_string_lossy())
            .await
            .map_err(|error| IngestError::RemoteParse(error.to_string()))?;

        response_to_pages(&response, path)
    }
}

fn response_to_pages(response: &ParseResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    let pages = response
        .chunks
        .iter()
        .filter(|page| !normalize_text(&page.text).is_empty())
        .map(|page| PageText {
            number: page.page.max(1),
            text: page.text.clone(),
        })
        .collect::<Vec<_>>();

    if pages.is_empty() {
        return Err(IngestError::RemoteParse(format!(
            "parse service returned no readable pages for {}",
            path.display()
        )));
    }

    Ok(pages)
}

/// Tries `primary` and, when it fails with a remote-parse error, delegates to
/// `fallback`. Callers see the same page list either way.
pub struct FallbackExtractor<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackExtractor<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> DocumentExtractor for FallbackExtractor<P, F>
where
    P: DocumentExtractor,
    F: DocumentExtractor,
{
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    async fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        match self.primary.extract_pages(path).await {
            Err(IngestError::RemoteParse(reason)) => {
                warn!(
                    path = %path.display(),
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    %reason,
                    "remote parsing failed, falling back to local extraction"
                );
                self.fallback.extract_pages(path).await
            }
            other => other,
        }
    }
}

/// Which extraction backend to use for PDFs.
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    Local,
    Remote(ParseServiceClient),
}

pub fn build_extractor(strategy: ExtractionStrategy) -> Arc<dyn DocumentExtractor> {
    match strategy {
        ExtractionStrategy::Local => Arc::new(LopdfExtractor),
        ExtractionStrategy::Remote(client) => Arc::new(FallbackExtractor::new(
            RemoteParseExtractor::new(client),
            LopdfExtractor,
        )),
    }
}

pub async fn read_text_file(path: &Path) -> Result<String, IngestError> {
    Ok(tokio::fs::read_to_string(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_service::ParsedPage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingRemote;

    #[async_trait]
    impl DocumentExtractor for FailingRemote {
        fn name(&self) -> &'static str {
            "failing-remote"
        }

        async fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Err(IngestError::RemoteParse("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingLocal {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentExtractor for CountingLocal {
        fn name(&self) -> &'static str {
            "counting-local"
        }

        async fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![PageText {
                number: 1,
                text: "Local text.".to_string(),
            }])
        }
    }

    #[test]
    fn parse_response_keeps_only_nonempty_pages() {
        let response = ParseResponse {
            file: "x.pdf".to_string(),
            chunks: vec![
                ParsedPage {
                    page: 2,
                    text: "  ".to_string(),
                },
                ParsedPage {
                    page: 3,
                    text: "Page 3".to_string(),
                },
            ],
        };

        let pages = response_to_pages(&response, Path::new("x.pdf")).expect("pages should parse");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3");
    }

    #[test]
    fn empty_parse_response_is_a_remote_failure() {
        let response = ParseResponse {
            file: "x.pdf".to_string(),
            chunks: Vec::new(),
        };
        assert!(matches!(
            response_to_pages(&response, Path::new("x.pdf")),
            Err(IngestError::RemoteParse(_))
        ));
    }

    #[tokio::test]
    async fn remote_failure_falls_back_silently() {
        let extractor = FallbackExtractor::new(FailingRemote, CountingLocal::default());
        let pages = extractor.extract_pages(Path::new("doc.pdf")).await.unwrap();
        assert_eq!(pages[0].text, "Local text.");
        assert_eq!(extractor.fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_local_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken").unwrap();

        let client =
            ParseServiceClient::new("http://127.0.0.1:9", std::time::Duration::from_millis(200))
                .unwrap();
        let extractor = build_extractor(ExtractionStrategy::Remote(client));
        let result = extractor.extract_pages(&path).await;

        // the local parser ran and reported its own error, not the remote one
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let result = LopdfExtractor
            .extract_pages(Path::new("/definitely/not/here.pdf"))
            .await;
        assert!(matches!(result, Err(IngestError::Io(_))));
    }
}
