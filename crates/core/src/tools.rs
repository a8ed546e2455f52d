//! Tools the agent can call. Every tool takes exactly one string.
//!
//! Model output is loose about quoting and sometimes passes JSON objects or
//! arrays where a query belongs. [`ToolInput::parse`] is the single boundary
//! where that is cleaned up or rejected, so tool bodies only ever see a
//! non-empty plain string.

use crate::embeddings::Embedder;
use crate::error::ToolError;
use crate::extractor::DocumentExtractor;
use crate::parse_service::{ParseServiceClient, DEFAULT_SUMMARY_SENTENCES};
use crate::pdf_tools::{format_matches, search_pages, summarize_pages};
use crate::traits::VectorStore;
use crate::websearch::{format_web_results, WebSearch, DEFAULT_MAX_RESULTS};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_RETRIEVAL_K: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInput(String);

impl ToolInput {
    pub fn parse(raw: &str) -> Result<Self, ToolError> {
        let trimmed = raw.trim();

        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(_)) => {
                    return Err(ToolError::NonStringInput("a JSON object".to_string()))
                }
                Ok(Value::Array(_)) => {
                    return Err(ToolError::NonStringInput("a JSON array".to_string()))
                }
                _ => {}
            }
        }

        let unquoted = match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::String(inner)) => inner,
            _ => strip_quotes(trimmed).to_string(),
        };

        let value = unquoted.trim();
        if value.is_empty() {
            return Err(ToolError::EmptyInput);
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Removes one layer of matching single or double quotes.
pub fn strip_quotes(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn call(&self, input: &ToolInput) -> Result<String, ToolError>;
}

/// Python-style capitalize: first character upper, the rest lower.
fn capitalize(topic: &str) -> String {
    let mut chars = topic.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Top-k similarity retrieval over one topic's collection.
pub struct RetrieverTool {
    name: String,
    description: String,
    collection: String,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    k: usize,
}

impl RetrieverTool {
    pub fn new(topic: &str, store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            name: format!("{}Retriever", capitalize(topic)),
            description: format!(
                "Use this to get information related to {}.",
                topic.replace('-', " ")
            ),
            collection: topic.to_string(),
            store,
            embedder,
            k: DEFAULT_RETRIEVAL_K,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k.max(1);
        self
    }
}

#[async_trait]
impl Tool for RetrieverTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, input: &ToolInput) -> Result<String, ToolError> {
        let vector = self.embedder.embed(input.as_str()).await?;
        let hits = self
            .store
            .similarity_search(&self.collection, &vector, self.k)
            .await?;

        if hits.is_empty() {
            return Ok("No relevant documents found.".to_string());
        }
        Ok(hits
            .into_iter()
            .map(|hit| hit.content)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

pub struct WebSearchTool {
    search: Arc<dyn WebSearch>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(search: Arc<dyn WebSearch>) -> Self {
        Self {
            search,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "TavilySearch"
    }

    fn description(&self) -> &str {
        "Useful for searching current events and today's news."
    }

    async fn call(&self, input: &ToolInput) -> Result<String, ToolError> {
        let results = self.search.search(input.as_str(), self.max_results).await?;
        if results.is_empty() {
            return Ok("No web results found.".to_string());
        }
        Ok(format_web_results(&results))
    }
}

/// Where the PDF tools get their answers: the parse service when configured,
/// then the local extractor.
#[derive(Clone)]
pub struct PdfBackend {
    path: PathBuf,
    remote: Option<ParseServiceClient>,
    local: Arc<dyn DocumentExtractor>,
}

impl PdfBackend {
    pub fn new(
        path: impl Into<PathBuf>,
        remote: Option<ParseServiceClient>,
        local: Arc<dyn DocumentExtractor>,
    ) -> Self {
        Self {
            path: path.into(),
            remote,
            local,
        }
    }

    fn file_path(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    async fn summarize(&self, max_sentences: usize) -> Result<String, ToolError> {
        if let Some(client) = &self.remote {
            match client.summarize_pdf(&self.file_path(), max_sentences).await {
                Ok(response) => return Ok(response.summary),
                Err(error) => warn!(
                    path = %self.path.display(),
                    %error,
                    "remote summarize failed, using local pages"
                ),
            }
        }

        let pages = self
            .local
            .extract_pages(&self.path)
            .await
            .map_err(|error| ToolError::Execution(error.to_string()))?;
        Ok(summarize_pages(&pages, max_sentences))
    }

    async fn search(&self, query: &str) -> Result<String, ToolError> {
        if let Some(client) = &self.remote {
            match client.search_pdf(&self.file_path(), query).await {
                Ok(response) => return Ok(format_matches(&response.matches)),
                Err(error) => warn!(
                    path = %self.path.display(),
                    %error,
                    "remote search failed, using local pages"
                ),
            }
        }

        let pages = self
            .local
            .extract_pages(&self.path)
            .await
            .map_err(|error| ToolError::Execution(error.to_string()))?;
        Ok(format_matches(&search_pages(&pages, query)))
    }
}

/// Summary of one configured PDF. The input is accepted but not used.
pub struct PdfSummaryTool {
    backend: PdfBackend,
    description: String,
}

impl PdfSummaryTool {
    pub fn new(backend: PdfBackend) -> Self {
        let description = format!(
            "Summarize the document {}. Input can be any short text.",
            backend.path.display()
        );
        Self {
            backend,
            description,
        }
    }
}

#[async_trait]
impl Tool for PdfSummaryTool {
    fn name(&self) -> &str {
        "SummarizePdf"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, _input: &ToolInput) -> Result<String, ToolError> {
        self.backend.summarize(DEFAULT_SUMMARY_SENTENCES).await
    }
}

pub struct PdfSearchTool {
    backend: PdfBackend,
    description: String,
}

impl PdfSearchTool {
    pub fn new(backend: PdfBackend) -> Self {
        let description = format!(
            "Find the pages of {} that mention a word or phrase. Input is the phrase.",
            backend.path.display()
        );
        Self {
            backend,
            description,
        }
    }
}

#[async_trait]
impl Tool for PdfSearchTool {
    fn name(&self) -> &str {
        "SearchPdf"
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn call(&self, input: &ToolInput) -> Result<String, ToolError> {
        self.backend.search(input.as_str()).await
    }
}

/// Tools in registration order, names unique.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    names: HashSet<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if !self.names.insert(name.clone()) {
            return Err(ToolError::DuplicateTool(name));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    /// One retriever per topic, in the order given.
    pub fn with_retrievers<I, S>(
        mut self,
        topics: I,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.register(Arc::new(RetrieverTool::new(
                topic.as_ref(),
                Arc::clone(&store),
                Arc::clone(&embedder),
            )))?;
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `name: description`, one tool per line.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|tool| format!("{}: {}", tool.name(), tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub async fn invoke(&self, name: &str, raw_input: &str) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let input = ToolInput::parse(raw_input)?;
        tool.call(&input).await
    }
}
