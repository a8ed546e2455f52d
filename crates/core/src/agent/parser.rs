//! Parsing of model turns into the next agent step.
//!
//! The strict grammar is either
//!
//! ```text
//! Thought: <reasoning>
//! Action: <tool name>
//! Action Input: "<single string>"
//! ```
//!
//! or `Final Answer: <text>`. Output that breaks the grammar is recovered
//! rather than rejected, so [`parse_turn`] always yields something the loop
//! can act on.

use crate::tools::strip_quotes;
use regex::Regex;
use std::sync::OnceLock;

const FINAL_ANSWER: &str = "final answer";
const ACTION: &str = "action";
const ACTION_INPUT: &str = "action input";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedStep {
    Action {
        thought: Option<String>,
        tool: String,
        input: String,
    },
    FinalAnswer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The turn followed the grammar.
    Parsed(ParsedStep),
    /// The turn broke the grammar but a step could be salvaged from markers.
    Recovered(ParsedStep),
    /// Nothing structured was found; the trimmed text is the answer.
    Terminated(String),
}

impl ParseOutcome {
    pub fn step(&self) -> Option<&ParsedStep> {
        match self {
            Self::Parsed(step) | Self::Recovered(step) => Some(step),
            Self::Terminated(_) => None,
        }
    }
}

fn action_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)")
            .expect("action pattern is valid")
    })
}

fn thought_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)Thought\s*:\s*(.*?)\s*Action\s*\d*\s*:").expect("thought pattern is valid")
    })
}

/// Drops anything the model wrote after the input, such as an invented
/// observation.
fn clean_input(raw: &str) -> String {
    let first_block = raw.split("\nObservation").next().unwrap_or_default();
    strip_quotes(first_block.trim()).trim().to_string()
}

fn strict(text: &str) -> Option<ParsedStep> {
    let has_final = text.contains("Final Answer:");
    let action = action_pattern().captures(text);

    match (action, has_final) {
        (Some(captures), false) => {
            let tool = captures.get(1)?.as_str().trim();
            if tool.is_empty() || tool.contains('\n') {
                return None;
            }
            let thought = thought_pattern()
                .captures(text)
                .and_then(|found| found.get(1))
                .map(|found| found.as_str().trim().to_string())
                .filter(|thought| !thought.is_empty());
            Some(ParsedStep::Action {
                thought,
                tool: tool.to_string(),
                input: clean_input(captures.get(2)?.as_str()),
            })
        }
        (None, true) => {
            let (_, answer) = text.split_once("Final Answer:")?;
            Some(ParsedStep::FinalAnswer(answer.trim().to_string()))
        }
        _ => None,
    }
}

/// Text on the same line after the marker at `marker_at`, with a
/// leading colon and surrounding quotes removed. Falls through to the next
/// line when the marker ends its line.
fn line_after(text: &str, marker_at: usize, marker_len: usize) -> String {
    let rest = text[marker_at + marker_len..].trim_start_matches([' ', '\t', ':']);
    let rest = rest.trim_start_matches(['\n', '\r']);
    strip_quotes(rest.lines().next().unwrap_or_default().trim()).trim().to_string()
}

/// First "action" marker that is not the start of "action input".
fn bare_action_marker(lowered: &str) -> Option<usize> {
    lowered
        .match_indices(ACTION)
        .map(|(at, _)| at)
        .find(|at| !lowered[*at..].starts_with(ACTION_INPUT))
}

fn recover(text: &str) -> Option<ParsedStep> {
    // ASCII lowering keeps byte offsets aligned with `text`.
    let lowered = text.to_ascii_lowercase();

    if let Some(at) = lowered.find(FINAL_ANSWER) {
        let answer = text[at + FINAL_ANSWER.len()..].trim_start_matches([' ', '\t', ':']);
        return Some(ParsedStep::FinalAnswer(answer.trim().to_string()));
    }

    let input_at = lowered.find(ACTION_INPUT)?;
    let action_at = bare_action_marker(&lowered)?;
    let tool = line_after(text, action_at, ACTION.len());
    if tool.is_empty() {
        return None;
    }

    Some(ParsedStep::Action {
        thought: None,
        tool,
        input: line_after(text, input_at, ACTION_INPUT.len()),
    })
}

pub fn parse_turn(raw: &str) -> ParseOutcome {
    let text = raw.trim();
    if let Some(step) = strict(text) {
        return ParseOutcome::Parsed(step);
    }
    match recover(text) {
        Some(step) => ParseOutcome::Recovered(step),
        None => ParseOutcome::Terminated(text.to_string()),
    }
}
