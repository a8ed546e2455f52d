use super::{AgentLoop, AgentOutcome, AgentSession};
use tracing::{info, warn};

const ERROR_MARKERS: [&str; 2] = ["error", "could not parse llm output"];

/// Which path produced the text the user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerRoute {
    Agent,
    Fallback,
    TotalFailure,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub route: AnswerRoute,
    pub outcome: AgentOutcome,
}

/// Empty text, or text that opens with an error marker (case-insensitive).
pub fn is_loop_failure(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    lowered.is_empty() || ERROR_MARKERS.iter().any(|marker| lowered.starts_with(marker))
}

/// Runs the agent once, then falls back to a plain completion of the raw
/// query when the loop produced nothing usable.
pub async fn answer_query(agent: &AgentLoop, session: &mut AgentSession, query: &str) -> Answer {
    let outcome = agent.run(session, query).await;

    let (text, route) = if !is_loop_failure(&outcome.answer) {
        (outcome.answer.clone(), AnswerRoute::Agent)
    } else {
        warn!(answer = %outcome.answer, "agent loop failed, asking the model directly");
        match agent.model().complete(query).await {
            Ok(text) => (text.trim().to_string(), AnswerRoute::Fallback),
            Err(error) => (format!("Total failure: {error}"), AnswerRoute::TotalFailure),
        }
    };

    if route != AnswerRoute::TotalFailure {
        session.record_exchange(query, text.as_str());
    }
    info!(?route, iterations = outcome.iterations, "query answered");

    Answer {
        text,
        route,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedModel;
    use crate::agent::AgentConfig;
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    fn agent(model: Arc<ScriptedModel>) -> AgentLoop {
        AgentLoop::new(model, ToolRegistry::new(), AgentConfig::default())
    }

    #[test]
    fn error_markers_are_case_insensitive() {
        assert!(is_loop_failure(""));
        assert!(is_loop_failure("  ERROR: invalid input"));
        assert!(is_loop_failure("Could not parse LLM output: blah"));
        assert!(!is_loop_failure("The errors were minor."));
        assert!(!is_loop_failure("Cats sleep 16 hours."));
    }

    #[tokio::test]
    async fn good_agent_answer_is_returned_and_remembered() {
        let model = Arc::new(ScriptedModel::new(["Final Answer: 42"]));
        let mut session = AgentSession::new();

        let answer = answer_query(&agent(model.clone()), &mut session, "meaning?").await;

        assert_eq!(answer.route, AnswerRoute::Agent);
        assert_eq!(answer.text, "42");
        assert_eq!(model.calls(), 1);
        assert_eq!(session.render_history(), "User: meaning?\nAssistant: 42");
    }

    #[tokio::test]
    async fn error_answer_falls_back_to_direct_completion() {
        let model = Arc::new(ScriptedModel::new([
            "Final Answer: ERROR: invalid input or tool failure.",
            "Paris is the capital of France.",
        ]));
        let mut session = AgentSession::new();

        let answer = answer_query(&agent(model.clone()), &mut session, "Capital of France?").await;

        assert_eq!(answer.route, AnswerRoute::Fallback);
        assert_eq!(answer.text, "Paris is the capital of France.");
        assert_eq!(model.prompts.lock().unwrap()[1], "Capital of France?");
    }

    #[tokio::test]
    async fn empty_answer_falls_back_too() {
        let model = Arc::new(ScriptedModel::new(["Final Answer:   ", "fallback text"]));
        let mut session = AgentSession::new();

        let answer = answer_query(&agent(model), &mut session, "q").await;
        assert_eq!(answer.route, AnswerRoute::Fallback);
        assert_eq!(answer.text, "fallback text");
    }

    #[tokio::test]
    async fn both_paths_failing_is_a_total_failure() {
        let model = Arc::new(ScriptedModel::with_results([
            Err("loop down".to_string()),
            Err("fallback down".to_string()),
        ]));
        let mut session = AgentSession::new();

        let answer = answer_query(&agent(model), &mut session, "q").await;

        assert_eq!(answer.route, AnswerRoute::TotalFailure);
        assert!(answer.text.starts_with("Total failure: "));
        assert!(answer.text.contains("fallback down"));
        assert_eq!(session.history().count(), 0);
    }
}
