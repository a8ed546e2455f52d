use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::Chunk;
use crate::text::{normalize_text, split_sentences, tokens_for_words, word_count};
use tracing::warn;
use uuid::Uuid;

/// Namespace for chunk identifiers. Changing it re-keys every stored chunk.
const CHUNK_NAMESPACE: Uuid = Uuid::NAMESPACE_DNS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if self.overlap_tokens >= self.max_tokens {
            warn!(
                max_tokens = self.max_tokens,
                overlap_tokens = self.overlap_tokens,
                "overlap is not smaller than the chunk budget; chunks will be highly redundant"
            );
        }
        Ok(())
    }
}

struct Sentence<'a> {
    text: &'a str,
    words: usize,
}

fn total_words(sentences: &[Sentence<'_>]) -> usize {
    sentences.iter().map(|sentence| sentence.words).sum()
}

fn join(sentences: &[Sentence<'_>]) -> String {
    sentences
        .iter()
        .map(|sentence| sentence.text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trailing sentences of `buffer` carried into the next chunk.
///
/// Scans backward until the carried sentences reach `overlap_tokens` (or the
/// whole buffer is taken), then drops leading carried sentences while carry
/// plus `pending_words` would break the budget. The budget wins over overlap.
fn overlap_start(
    buffer: &[Sentence<'_>],
    pending_words: usize,
    config: ChunkingConfig,
) -> usize {
    if config.overlap_tokens == 0 {
        return buffer.len();
    }

    let mut start = buffer.len();
    let mut words = 0;
    while start > 0 && (words == 0 || tokens_for_words(words) < config.overlap_tokens) {
        start -= 1;
        words += buffer[start].words;
    }

    while start < buffer.len() && tokens_for_words(words + pending_words) > config.max_tokens {
        words -= buffer[start].words;
        start += 1;
    }

    start
}

/// Greedy sentence accumulation with a sliding overlap window.
///
/// Returns chunk texts in input order. A single sentence larger than the
/// budget becomes its own chunk; no sentence is ever cut.
pub fn chunk_sentences<S: AsRef<str>>(sentences: &[S], config: ChunkingConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<Sentence<'_>> = Vec::new();
    let mut buffer_words = 0usize;

    for raw in sentences {
        let text = raw.as_ref().trim();
        if text.is_empty() {
            continue;
        }
        let sentence = Sentence {
            text,
            words: word_count(text),
        };

        if !buffer.is_empty()
            && tokens_for_words(buffer_words + sentence.words) > config.max_tokens
        {
            chunks.push(join(&buffer));
            let carry_from = overlap_start(&buffer, sentence.words, config);
            buffer.drain(..carry_from);
            buffer_words = total_words(&buffer);
        }

        buffer_words += sentence.words;
        buffer.push(sentence);
    }

    if !buffer.is_empty() {
        chunks.push(join(&buffer));
    }

    chunks
}

/// Stable identifier for a chunk: UUIDv5 over `source|p{page}|c{index}|content`.
///
/// Identical inputs give identical ids across runs and processes, which is what
/// makes re-ingestion idempotent.
pub fn chunk_id(source: &str, page: Option<u32>, index: u64, content: &str) -> String {
    let name = format!("{source}|p{}|c{index}|{content}", page.unwrap_or(0));
    Uuid::new_v5(&CHUNK_NAMESPACE, name.as_bytes()).to_string()
}

impl Chunk {
    pub fn id(&self) -> String {
        chunk_id(&self.source, self.page, self.index, &self.content)
    }
}

fn into_chunks(source: &str, page: Option<u32>, texts: Vec<String>) -> Vec<Chunk> {
    texts
        .into_iter()
        .zip(0u64..)
        .map(|(content, index)| Chunk {
            tokens: tokens_for_words(word_count(&content)),
            content,
            source: source.to_string(),
            page,
            index,
        })
        .collect()
}

/// Chunk already-normalized text with no page segmentation.
pub fn build_chunks(
    source: &str,
    page: Option<u32>,
    normalized: &str,
    config: ChunkingConfig,
) -> Vec<Chunk> {
    let sentences = split_sentences(normalized);
    into_chunks(source, page, chunk_sentences(&sentences, config))
}

/// Page-aware chunking; indices restart at 0 on every page and pages that
/// normalize to nothing are skipped.
pub fn build_page_chunks(source: &str, pages: &[PageText], config: ChunkingConfig) -> Vec<Chunk> {
    pages
        .iter()
        .flat_map(|page| {
            let normalized = normalize_text(&page.text);
            if normalized.is_empty() {
                return Vec::new();
            }
            build_chunks(source, Some(page.number), &normalized, config)
        })
        .collect()
}

fn is_list_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("- ") || trimmed.starts_with("-\t") || trimmed == "-"
}

/// Split a fact-oriented file into independent statements: blank lines and
/// leading-dash list items both start a new fact. Each fact is normalized.
pub fn split_facts(raw: &str) -> Vec<String> {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut facts = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        let fact = normalize_text(current);
        if !fact.is_empty() {
            facts.push(fact);
        }
        current.clear();
    };

    for line in unified.lines() {
        if line.trim().is_empty() {
            flush(&mut current);
            continue;
        }
        if is_list_marker(line) {
            flush(&mut current);
            current.push_str(line.trim_start().trim_start_matches('-'));
        } else {
            current.push_str(line);
        }
        current.push('\n');
    }
    flush(&mut current);

    facts
}

/// Fact-mode chunking: each fact is sentence-split and chunked on its own with
/// the (smaller) fact budget; indices run across the whole file.
pub fn build_fact_chunks(source: &str, raw: &str, config: ChunkingConfig) -> Vec<Chunk> {
    let texts = split_facts(raw)
        .iter()
        .flat_map(|fact| chunk_sentences(&split_sentences(fact), config))
        .collect();
    into_chunks(source, None, texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::estimate_tokens;

    fn words(count: usize, tag: &str) -> String {
        let mut sentence = vec![tag; count].join(" ");
        sentence.push('.');
        sentence
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let config = ChunkingConfig {
            max_tokens: 10,
            overlap_tokens: 2,
        };
        assert!(chunk_sentences::<String>(&[], config).is_empty());
        assert!(build_chunks("a.txt", None, "", config).is_empty());
    }

    #[test]
    fn sentences_fit_into_one_chunk() {
        let config = ChunkingConfig {
            max_tokens: 400,
            overlap_tokens: 60,
        };
        let sentences = ["One two three.", "Four five."];
        assert_eq!(chunk_sentences(&sentences, config), vec!["One two three. Four five."]);
    }

    #[test]
    fn budget_is_respected_and_oversized_sentence_stands_alone() {
        // 10 words = 13 tokens; 30 words = 39 tokens
        let sentences = vec![words(10, "a"), words(10, "b"), words(30, "c"), words(10, "d")];
        let config = ChunkingConfig {
            max_tokens: 30,
            overlap_tokens: 0,
        };
        let chunks = chunk_sentences(&sentences, config);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], format!("{} {}", sentences[0], sentences[1]));
        assert_eq!(chunks[1], sentences[2]);
        assert_eq!(chunks[2], sentences[3]);
        for chunk in &chunks {
            let oversized_single = sentences.iter().any(|sentence| sentence == chunk);
            assert!(estimate_tokens(chunk) <= 30 || oversized_single);
        }
        assert_eq!(estimate_tokens(&chunks[1]), estimate_tokens(&sentences[2]));
    }

    #[test]
    fn consecutive_chunks_share_an_overlap_suffix() {
        // each sentence: 5 words = 7 tokens
        let sentences = (0..8).map(|i| words(5, &format!("W{i}"))).collect::<Vec<_>>();
        let config = ChunkingConfig {
            max_tokens: 27,
            overlap_tokens: 8,
        };
        let chunks = chunk_sentences(&sentences, config);

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let previous = split_sentences(&pair[0]);
            let next = split_sentences(&pair[1]);
            let shared = previous
                .iter()
                .rev()
                .take_while(|sentence| next.contains(sentence))
                .count();
            assert_eq!(shared, 2, "two 7-token sentences reach an 8-token overlap");
            assert_eq!(&previous[previous.len() - shared..], &next[..shared]);
            assert!(estimate_tokens(&next[..shared].join(" ")) >= 8);
        }
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 27);
        }
    }

    #[test]
    fn overlap_larger_than_budget_still_terminates_within_budget() {
        let sentences = (0..6).map(|i| words(4, &format!("S{i}"))).collect::<Vec<_>>();
        let config = ChunkingConfig {
            max_tokens: 12,
            overlap_tokens: 50,
        };
        let chunks = chunk_sentences(&sentences, config);

        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 12);
        }
        assert!(chunks.last().is_some_and(|chunk| chunk.ends_with("S5 S5 S5 S5.")));
    }

    #[test]
    fn page_chunks_restart_index_and_skip_blank_pages() {
        let pages = vec![
            PageText {
                number: 1,
                text: "Alpha one. Beta two.".to_string(),
            },
            PageText {
                number: 2,
                text: "  \n ".to_string(),
            },
            PageText {
                number: 3,
                text: "Gamma three.".to_string(),
            },
        ];
        let config = ChunkingConfig {
            max_tokens: 400,
            overlap_tokens: 60,
        };
        let chunks = build_page_chunks("doc.pdf", &pages, config);

        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].page, chunks[0].index), (Some(1), 0));
        assert_eq!((chunks[1].page, chunks[1].index), (Some(3), 0));
        assert_eq!(chunks[1].tokens, estimate_tokens("Gamma three."));
    }

    #[test]
    fn chunk_id_is_deterministic_and_field_sensitive() {
        let base = chunk_id("a.pdf", Some(1), 0, "text");
        assert_eq!(base, chunk_id("a.pdf", Some(1), 0, "text"));
        assert_ne!(base, chunk_id("b.pdf", Some(1), 0, "text"));
        assert_ne!(base, chunk_id("a.pdf", Some(2), 0, "text"));
        assert_ne!(base, chunk_id("a.pdf", Some(1), 1, "text"));
        assert_ne!(base, chunk_id("a.pdf", Some(1), 0, "other"));
        assert_eq!(chunk_id("a.txt", None, 0, "x"), chunk_id("a.txt", Some(0), 0, "x"));
        assert!(Uuid::parse_str(&base).is_ok());
    }

    #[test]
    fn facts_split_on_blank_lines_and_dashes() {
        let raw = concat!(
            "Cats sleep a lot.\n\n",
            "- Cats purr.\n- Cats have\n  whiskers.\nStill whiskers.\n\n\n",
            "Last fact."
        );
        assert_eq!(
            split_facts(raw),
            vec![
                "Cats sleep a lot.",
                "Cats purr.",
                "Cats have whiskers. Still whiskers.",
                "Last fact.",
            ]
        );
    }

    #[test]
    fn fact_chunks_index_across_file() {
        let raw = "- One fact here.\n- Two fact here.\n";
        let config = ChunkingConfig {
            max_tokens: 80,
            overlap_tokens: 0,
        };
        let chunks = build_fact_chunks("facts.txt", raw, config);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
        assert!(chunks.iter().all(|chunk| chunk.page.is_none()));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let config = ChunkingConfig {
            max_tokens: 0,
            overlap_tokens: 0,
        };
        assert!(config.validate().is_err());
        let wasteful = ChunkingConfig {
            max_tokens: 5,
            overlap_tokens: 5,
        };
        assert!(wasteful.validate().is_ok());
    }
}
