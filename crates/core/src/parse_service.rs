//! Client for the remote PDF parsing service.
//!
//! The service exposes `POST /parse_pdf`, `/summarize_pdf`, `/search_pdf` and
//! `/tavily_search`, each taking and returning JSON.

use crate::error::ParseServiceError;
use crate::websearch::WebResult;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_PARSE_SERVICE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SUMMARY_SENTENCES: usize = 5;

#[derive(Debug, Clone, Serialize)]
struct FileRequest<'a> {
    file_path: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct SummarizeRequest<'a> {
    file_path: &'a str,
    max_sentences: usize,
}

#[derive(Debug, Clone, Serialize)]
struct SearchRequest<'a> {
    file_path: &'a str,
    query: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct WebSearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedPage {
    pub page: u32,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParseResponse {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub chunks: Vec<ParsedPage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummarizeResponse {
    #[serde(default)]
    pub file: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnippetMatch {
    pub page: u32,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub matches: Vec<SnippetMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSearchResponse {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub results: Vec<WebResult>,
}

#[derive(Debug, Clone)]
pub struct ParseServiceClient {
    base: Url,
    client: Client,
}

impl ParseServiceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ParseServiceError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn call<Req, Resp>(
        &self,
        endpoint: &str,
        payload: &Req,
    ) -> Result<Resp, ParseServiceError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.base.join(endpoint)?;
        debug!(%url, "calling parse service");

        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParseServiceError::BackendResponse {
                backend: "parse-service".to_string(),
                details: format!("{endpoint} returned {status}: {body}"),
            });
        }

        Ok(response.json().await?)
    }

    pub async fn parse_pdf(&self, file_path: &str) -> Result<ParseResponse, ParseServiceError> {
        self.call("parse_pdf", &FileRequest { file_path }).await
    }

    pub async fn summarize_pdf(
        &self,
        file_path: &str,
        max_sentences: usize,
    ) -> Result<SummarizeResponse, ParseServiceError> {
        self.call(
            "summarize_pdf",
            &SummarizeRequest {
                file_path,
                max_sentences,
            },
        )
        .await
    }

    pub async fn search_pdf(
        &self,
        file_path: &str,
        query: &str,
    ) -> Result<SearchResponse, ParseServiceError> {
        self.call("search_pdf", &SearchRequest { file_path, query }).await
    }

    pub async fn tavily_search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<WebSearchResponse, ParseServiceError> {
        self.call(
            "tavily_search",
            &WebSearchRequest {
                query,
                max_results,
            },
        )
        .await
    }
}

/// Tools reachable from the parse-service debug command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugTool {
    ParsePdf,
    SummarizePdf,
    SearchPdf,
}

impl FromStr for DebugTool {
    type Err = ParseServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "parse_pdf" => Ok(Self::ParsePdf),
            "summarize_pdf" => Ok(Self::SummarizePdf),
            "search_pdf" => Ok(Self::SearchPdf),
            other => Err(ParseServiceError::UnknownTool(other.to_string())),
        }
    }
}

impl fmt::Display for DebugTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ParsePdf => "parse_pdf",
            Self::SummarizePdf => "summarize_pdf",
            Self::SearchPdf => "search_pdf",
        };
        f.write_str(name)
    }
}

/// A validated `<tool> <file_path> [query]` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInvocation {
    pub tool: DebugTool,
    pub file_path: String,
    pub query: Option<String>,
}

impl DebugInvocation {
    /// Validates the arguments; nothing here touches the network.
    pub fn from_args(
        tool: &str,
        file_path: &str,
        query: Option<&str>,
    ) -> Result<Self, ParseServiceError> {
        let tool = tool.parse::<DebugTool>()?;
        let query = query
            .map(str::trim)
            .filter(|query| !query.is_empty())
            .map(str::to_string);

        if tool == DebugTool::SearchPdf && query.is_none() {
            return Err(ParseServiceError::MissingQuery);
        }

        Ok(Self {
            tool,
            file_path: file_path.to_string(),
            query,
        })
    }

    pub async fn run(
        &self,
        client: &ParseServiceClient,
    ) -> Result<serde_json::Value, ParseServiceError> {
        let value = match self.tool {
            DebugTool::ParsePdf => serde_json::to_value(client.parse_pdf(&self.file_path).await?),
            DebugTool::SummarizePdf => serde_json::to_value(
                client
                    .summarize_pdf(&self.file_path, DEFAULT_SUMMARY_SENTENCES)
                    .await?,
            ),
            DebugTool::SearchPdf => {
                let query = self.query.as_deref().ok_or(ParseServiceError::MissingQuery)?;
                serde_json::to_value(client.search_pdf(&self.file_path, query).await?)
            }
        };

        value.map_err(|error| ParseServiceError::BackendResponse {
            backend: "parse-service".to_string(),
            details: error.to_string(),
        })
    }
}
