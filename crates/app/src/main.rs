use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use doc_agent_core::agent::{AgentStep, Answer};
use doc_agent_core::embeddings::{DEFAULT_OLLAMA_EMBED_MODEL, NOMIC_EMBED_DIMENSIONS};
use doc_agent_core::ingest::discover_documents;
use doc_agent_core::model::{DEFAULT_CHAT_MODEL, DEFAULT_OLLAMA_URL};
use doc_agent_core::parse_service::{DEFAULT_PARSE_SERVICE_URL, DEFAULT_PARSE_TIMEOUT};
use doc_agent_core::tools::{PdfBackend, PdfSearchTool, PdfSummaryTool, WebSearchTool};
use doc_agent_core::{
    answer_query, build_extractor, AgentConfig, AgentLoop, AgentSession, BatchReport,
    CachingEmbedder, CharacterNgramEmbedder, Dataset, DebugInvocation, Embedder,
    ExtractionStrategy, InMemoryVectorStore, IngestionOptions, Ingestor, LanguageModel,
    OllamaEmbedder, OllamaModel, ParseServiceClient, QdrantStore, RetryPolicy, TavilySearch,
    ToolRegistry, VectorStore, WebSearch,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store backend
    #[arg(long, value_enum, env = "DOC_AGENT_STORE", default_value = "qdrant")]
    store: StoreBackend,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Embedding backend
    #[arg(long, value_enum, env = "DOC_AGENT_EMBEDDER", default_value = "ollama")]
    embedder: EmbedderBackend,

    /// Ollama base URL, used for embeddings and chat
    #[arg(long, env = "OLLAMA_URL", default_value = DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Ollama embedding model
    #[arg(long, env = "OLLAMA_EMBED_MODEL", default_value = DEFAULT_OLLAMA_EMBED_MODEL)]
    embed_model: String,

    /// Vector size produced by the embedding model
    #[arg(long, default_value_t = NOMIC_EMBED_DIMENSIONS)]
    embed_dimensions: usize,

    /// Ollama chat model
    #[arg(long, env = "OLLAMA_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// How PDFs are turned into page text
    #[arg(long, value_enum, env = "DOC_AGENT_EXTRACTION", default_value = "local")]
    extraction: Extraction,

    /// Remote PDF parsing service base URL
    #[arg(long, env = "PARSE_SERVICE_URL", default_value = DEFAULT_PARSE_SERVICE_URL)]
    parse_service_url: String,

    /// Where web searches go
    #[arg(long, value_enum, env = "DOC_AGENT_WEB_SEARCH", default_value = "tavily")]
    web_search: WebSearchBackend,

    /// Tavily API key
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    tavily_api_key: Option<String>,

    #[command(flatten)]
    chunking: ChunkingArgs,
}

#[derive(Args)]
struct ChunkingArgs {
    /// Token budget per prose chunk
    #[arg(long, default_value_t = 400)]
    max_tokens: usize,

    /// Tokens carried over between consecutive prose chunks
    #[arg(long, default_value_t = 60)]
    overlap_tokens: usize,

    /// Token budget per fact chunk
    #[arg(long, default_value_t = 80)]
    fact_max_tokens: usize,
}

#[derive(Args)]
struct DatasetArgs {
    /// Prose dataset as topic=path (repeatable)
    #[arg(long = "dataset", value_parser = parse_dataset)]
    datasets: Vec<(String, PathBuf)>,

    /// Fact list dataset as topic=path (repeatable)
    #[arg(long = "fact-dataset", value_parser = parse_dataset)]
    fact_datasets: Vec<(String, PathBuf)>,
}

impl DatasetArgs {
    fn to_datasets(&self) -> Vec<Dataset> {
        let prose = self
            .datasets
            .iter()
            .map(|(topic, path)| Dataset::new(path, topic));
        let facts = self
            .fact_datasets
            .iter()
            .map(|(topic, path)| Dataset::facts(path, topic));
        prose.chain(facts).collect()
    }
}

#[derive(Args)]
struct AgentArgs {
    #[command(flatten)]
    datasets: DatasetArgs,
    /// Already ingested topics to expose as retrievers (repeatable)
    #[arg(long = "topic")]
    topics: Vec<String>,
    /// PDF to expose through the summarize and search tools
    #[arg(long)]
    pdf_tools: Option<PathBuf>,
    /// Maximum model turns before the loop gives up
    #[arg(long, default_value_t = 8)]
    max_iterations: usize,
    /// Seconds a single tool call may take
    #[arg(long, default_value_t = 30)]
    tool_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and upsert datasets into per-topic collections.
    Ingest {
        #[command(flatten)]
        datasets: DatasetArgs,
        /// Folder scanned recursively for .pdf, .txt and .md files.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Drop each target topic's collection first, so every chunk is
        /// re-extracted and inserted again.
        #[arg(long)]
        reset: bool,
    },
    /// Answer a question with the tool-routing agent.
    Ask {
        /// Question to answer
        #[arg(long)]
        query: String,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Answer questions read from stdin, one per line, keeping the
    /// conversation between them. `exit` or end of input stops.
    Chat {
        #[command(flatten)]
        agent: AgentArgs,
        /// Previous exchanges rendered into each prompt
        #[arg(long, default_value_t = 10)]
        history: usize,
    },
    /// Call the PDF parsing service directly: <tool> <file_path> [query]
    Parse {
        /// parse_pdf, summarize_pdf or search_pdf
        tool: String,
        file_path: String,
        query: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreBackend {
    Qdrant,
    Memory,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderBackend {
    Ollama,
    Ngram,
}

#[derive(Clone, Copy, ValueEnum)]
enum Extraction {
    Local,
    Remote,
}

#[derive(Clone, Copy, ValueEnum)]
enum WebSearchBackend {
    Tavily,
    ParseService,
    Off,
}

fn parse_dataset(value: &str) -> Result<(String, PathBuf), String> {
    let (topic, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected topic=path, got {value}"))?;
    let topic = topic.trim();
    if topic.is_empty() || path.trim().is_empty() {
        return Err(format!("expected topic=path, got {value}"));
    }
    Ok((topic.to_string(), PathBuf::from(path.trim())))
}

impl Cli {
    fn parse_client(&self) -> anyhow::Result<ParseServiceClient> {
        Ok(ParseServiceClient::new(&self.parse_service_url, DEFAULT_PARSE_TIMEOUT)?)
    }

    fn vector_store(&self) -> Arc<dyn VectorStore> {
        match self.store {
            StoreBackend::Qdrant => Arc::new(QdrantStore::new(&self.qdrant_url)),
            StoreBackend::Memory => Arc::new(InMemoryVectorStore::new()),
        }
    }

    fn embedder(&self) -> Arc<dyn Embedder> {
        match self.embedder {
            EmbedderBackend::Ollama => Arc::new(CachingEmbedder::new(
                OllamaEmbedder::new(&self.ollama_url, &self.embed_model, self.embed_dimensions),
                RetryPolicy::default(),
            )),
            EmbedderBackend::Ngram => Arc::new(CharacterNgramEmbedder::default()),
        }
    }

    fn ingestor(&self) -> anyhow::Result<Ingestor> {
        let strategy = match self.extraction {
            Extraction::Local => ExtractionStrategy::Local,
            Extraction::Remote => ExtractionStrategy::Remote(self.parse_client()?),
        };
        let options = IngestionOptions {
            max_tokens: self.chunking.max_tokens,
            overlap_tokens: self.chunking.overlap_tokens,
            fact_max_tokens: self.chunking.fact_max_tokens,
            ..IngestionOptions::default()
        };
        Ok(Ingestor::new(
            build_extractor(strategy),
            self.vector_store(),
            self.embedder(),
            options,
        )?)
    }

    fn web_search(&self) -> anyhow::Result<Option<Arc<dyn WebSearch>>> {
        let search: Arc<dyn WebSearch> = match self.web_search {
            WebSearchBackend::Tavily => match &self.tavily_api_key {
                Some(key) => Arc::new(TavilySearch::new(key.clone())),
                None => {
                    warn!("TAVILY_API_KEY not set, web search disabled");
                    return Ok(None);
                }
            },
            WebSearchBackend::ParseService => Arc::new(self.parse_client()?),
            WebSearchBackend::Off => return Ok(None),
        };
        Ok(Some(search))
    }
}

fn log_batch(batch: &BatchReport) {
    for report in &batch.reports {
        println!(
            "{} <- {} chunks={} inserted={} skipped={} sha256={}",
            report.topic,
            report.source,
            report.chunk_count,
            report.inserted,
            report.skipped,
            report.checksum
        );
    }
    for skipped in &batch.skipped {
        warn!(
            path = %skipped.dataset.path.display(),
            reason = %skipped.reason,
            "skipped dataset"
        );
    }
}

/// Ingest the requested datasets, then wire retrievers, web search and PDF
/// tools into an agent backed by the Ollama chat model.
async fn build_agent(cli: &Cli, args: &AgentArgs) -> anyhow::Result<AgentLoop> {
    let ingestor = cli.ingestor()?;
    let mut known_topics = args.topics.clone();

    let to_ingest = args.datasets.to_datasets();
    if !to_ingest.is_empty() {
        let batch = ingestor.ingest_all(to_ingest).await?;
        log_batch(&batch);
        known_topics.extend(batch.topics());
    }
    known_topics.sort_unstable();
    known_topics.dedup();

    let mut registry =
        ToolRegistry::new().with_retrievers(&known_topics, ingestor.store(), ingestor.embedder())?;
    if let Some(search) = cli.web_search()? {
        registry.register(Arc::new(WebSearchTool::new(search)))?;
    }
    if let Some(path) = &args.pdf_tools {
        let remote = match cli.extraction {
            Extraction::Remote => Some(cli.parse_client()?),
            Extraction::Local => None,
        };
        let backend = PdfBackend::new(path, remote, ingestor.extractor());
        registry.register(Arc::new(PdfSummaryTool::new(backend.clone())))?;
        registry.register(Arc::new(PdfSearchTool::new(backend)))?;
    }
    info!(tools = ?registry.names(), "tools ready");

    let model: Arc<dyn LanguageModel> = Arc::new(
        OllamaModel::new(&cli.ollama_url, &cli.chat_model).with_stop(["\nObservation:"]),
    );
    Ok(AgentLoop::new(
        model,
        registry,
        AgentConfig {
            max_iterations: args.max_iterations,
            tool_timeout: Duration::from_secs(args.tool_timeout_secs),
        },
    ))
}

fn trace_answer(answer: &Answer) {
    for step in &answer.outcome.steps {
        match step {
            AgentStep::Thought(text) => debug!("Thought: {text}"),
            AgentStep::Action { tool, input } => debug!("Action: {tool} Input: {input}"),
            AgentStep::Observation(text) => debug!("Observation: {text}"),
            AgentStep::FinalAnswer(text) => debug!("Final Answer: {text}"),
        }
    }
    info!(route = ?answer.route, "answer ready");
}

/// One answer per input line, all in the same session so later questions
/// can refer back to earlier ones.
async fn run_chat<R, W>(
    agent: &AgentLoop,
    session: &mut AgentSession,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        if question.is_empty() {
            continue;
        }

        let answer = answer_query(agent, session, question).await;
        trace_answer(&answer);
        output.write_all(format!("{}\n", answer.text).as_bytes()).await?;
    }
    output.flush().await?;

    info!(exchanges = session.history().count(), "chat ended");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-agent boot"
    );

    match cli.command {
        Command::Parse {
            ref tool,
            ref file_path,
            ref query,
        } => {
            let invocation = DebugInvocation::from_args(tool, file_path, query.as_deref())?;
            let client = cli.parse_client()?;
            let value = invocation.run(&client).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Ingest {
            ref datasets,
            ref folder,
            reset,
        } => {
            let mut all = datasets.to_datasets();
            if let Some(folder) = folder {
                all.extend(discover_documents(folder));
            }

            let ingestor = cli.ingestor()?;
            if reset {
                let topics = all
                    .iter()
                    .map(|dataset| dataset.topic.as_str())
                    .collect::<Vec<_>>();
                ingestor.reset_topics(&topics).await?;
            }
            let batch = ingestor.ingest_all(all).await?;
            log_batch(&batch);
            println!(
                "{} new chunks across {} topics at {}",
                batch.inserted(),
                batch.topics().len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            ref query,
            ref agent,
        } => {
            let agent = build_agent(&cli, agent).await?;
            let mut session = AgentSession::new();
            let answer = answer_query(&agent, &mut session, query).await;
            trace_answer(&answer);
            println!("{}", answer.text);
        }
        Command::Chat { ref agent, history } => {
            let agent = build_agent(&cli, agent).await?;
            let mut session = AgentSession::with_history_limit(history);
            let stdin = BufReader::new(tokio::io::stdin());
            run_chat(&agent, &mut session, stdin, tokio::io::stdout()).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use doc_agent_core::ModelError;
    use std::sync::Mutex;

    /// Answers every prompt with a numbered final answer and keeps the prompts.
    #[derive(Default)]
    struct NumberingModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for NumberingModel {
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok(format!("Final Answer: reply {}", prompts.len()))
        }
    }

    #[tokio::test]
    async fn chat_carries_history_between_questions() {
        let model = Arc::new(NumberingModel::default());
        let agent = AgentLoop::new(model.clone(), ToolRegistry::new(), AgentConfig::default());
        let mut session = AgentSession::new();
        let mut output = Vec::new();

        run_chat(
            &agent,
            &mut session,
            &b"How long do cats sleep?\n\nAnd dogs?\nexit\nnever asked\n"[..],
            &mut output,
        )
        .await
        .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("Conversation so far"));
        assert!(prompts[1].contains("User: How long do cats sleep?\nAssistant: reply 1"));
        assert_eq!(session.history().count(), 2);
        assert_eq!(String::from_utf8(output).unwrap(), "> reply 1\n> > reply 2\n> ");
    }

    #[test]
    fn reset_flag_is_parsed_for_ingest() {
        let cli = Cli::try_parse_from([
            "doc-agent",
            "--store",
            "memory",
            "ingest",
            "--reset",
            "--dataset",
            "cats=cats.txt",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Ingest { reset: true, .. }));
    }
}
