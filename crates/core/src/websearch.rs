use crate::error::ToolError;
use crate::parse_service::ParseServiceClient;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
pub const DEFAULT_MAX_RESULTS: usize = 5;
const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WebResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, ToolError>;
}

pub struct TavilySearch {
    endpoint: String,
    api_key: String,
    client: Client,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(TAVILY_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, ToolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "max_results": max_results }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ToolError::Execution(format!(
                "tavily search returned {}",
                response.status()
            )));
        }

        let payload: TavilyResponse = response.json().await?;
        Ok(payload.results.into_iter().take(max_results).collect())
    }
}

#[async_trait]
impl WebSearch for ParseServiceClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebResult>, ToolError> {
        let response = self
            .tavily_search(query, max_results)
            .await
            .map_err(|error| ToolError::Execution(error.to_string()))?;
        Ok(response.results)
    }
}

/// One line per result: `title: content...` with content cut to 200 characters.
pub fn format_web_results(results: &[WebResult]) -> String {
    results
        .iter()
        .map(|result| {
            let snippet = result.content.chars().take(SNIPPET_CHARS).collect::<String>();
            format!("{}: {snippet}...", result.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
