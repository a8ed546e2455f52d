//! Think/act/observe loop over the tool registry.
//!
//! One query drives one sequential trace. Each turn the model either names a
//! tool with a single string input or gives a final answer; tool output is fed
//! back as an observation. Failed `(tool, input)` pairs are remembered in the
//! caller's [`AgentSession`] and the loop finishes with a fixed diagnostic once
//! the failure ceiling is reached.

pub mod answer;
pub mod parser;
pub mod prompt;
pub mod session;

pub use answer::{answer_query, is_loop_failure, Answer, AnswerRoute};
pub use parser::{parse_turn, ParseOutcome, ParsedStep};
pub use session::{AgentSession, Exchange, FailedAction, FailureMemory, FAILURE_CEILING};

use crate::error::ToolError;
use crate::model::LanguageModel;
use crate::tools::ToolRegistry;
use prompt::{build_prompt, scratchpad_entry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 8;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

pub const FAILURE_CEILING_MESSAGE: &str =
    "Error: stopped after repeated tool failures. Please rephrase the question.";
pub const ITERATION_LIMIT_MESSAGE: &str =
    "Error: agent stopped after reaching its iteration limit.";

#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub tool_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStep {
    Thought(String),
    Action { tool: String, input: String },
    Observation(String),
    FinalAnswer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    Thinking,
    Acting {
        thought: Option<String>,
        tool: String,
        input: String,
    },
    Observing {
        thought: Option<String>,
        tool: String,
        input: String,
        observation: String,
    },
    Finished(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    /// False when the loop ended in `Failed`.
    pub finished: bool,
    pub iterations: usize,
    pub steps: Vec<AgentStep>,
}

pub struct AgentLoop {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            model,
            tools,
            config,
        }
    }

    pub fn model(&self) -> Arc<dyn LanguageModel> {
        Arc::clone(&self.model)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    async fn invoke_tool(&self, tool: &str, input: &str) -> Result<String, ToolError> {
        match tokio::time::timeout(self.config.tool_timeout, self.tools.invoke(tool, input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(self.config.tool_timeout)),
        }
    }

    async fn act(&self, session: &mut AgentSession, tool: &str, input: &str) -> String {
        if session.failures().contains(tool, input) {
            debug!(%tool, %input, "skipping action that already failed");
            return format!(
                "Error: {tool} already failed with input \"{input}\". \
                 Try a different tool or input, or give a Final Answer."
            );
        }

        match self.invoke_tool(tool, input).await {
            Ok(output) => output,
            Err(error) => {
                warn!(%tool, %input, %error, "tool call failed");
                session.failures_mut().record(tool, input);
                format!("Error: {error}")
            }
        }
    }

    /// Runs one query to completion. Never errors: model failures, the failure
    /// ceiling and the iteration limit all end the trace with a message.
    pub async fn run(&self, session: &mut AgentSession, query: &str) -> AgentOutcome {
        session.start_query();
        let history = session.render_history();

        let mut steps = Vec::new();
        let mut scratchpad = String::new();
        let mut iterations = 0;
        let mut state = AgentState::Thinking;

        loop {
            state = match state {
                AgentState::Thinking if iterations >= self.config.max_iterations => {
                    AgentState::Failed(ITERATION_LIMIT_MESSAGE.to_string())
                }
                AgentState::Thinking => {
                    iterations += 1;
                    let prompt = build_prompt(&self.tools, &history, query, &scratchpad);
                    match self.model.complete(&prompt).await {
                        Err(error) => {
                            AgentState::Failed(format!("Error: language model failed: {error}"))
                        }
                        Ok(output) => match parse_turn(&output) {
                            ParseOutcome::Parsed(step) => next_state(step),
                            ParseOutcome::Recovered(step) => {
                                debug!(iteration = iterations, "recovered malformed model output");
                                next_state(step)
                            }
                            ParseOutcome::Terminated(text) => {
                                debug!(
                                    iteration = iterations,
                                    "model output had no markers, using it as the answer"
                                );
                                AgentState::Finished(text)
                            }
                        },
                    }
                }
                AgentState::Acting {
                    thought,
                    tool,
                    input,
                } => {
                    if let Some(thought) = &thought {
                        steps.push(AgentStep::Thought(thought.clone()));
                    }
                    steps.push(AgentStep::Action {
                        tool: tool.clone(),
                        input: input.clone(),
                    });
                    let observation = self.act(session, &tool, &input).await;
                    AgentState::Observing {
                        thought,
                        tool,
                        input,
                        observation,
                    }
                }
                AgentState::Observing {
                    thought,
                    tool,
                    input,
                    observation,
                } => {
                    scratchpad.push_str(&scratchpad_entry(
                        thought.as_deref(),
                        &tool,
                        &input,
                        &observation,
                    ));
                    steps.push(AgentStep::Observation(observation));
                    if session.failures().is_exhausted() {
                        warn!(failures = session.failures().len(), "failure ceiling reached");
                        AgentState::Finished(FAILURE_CEILING_MESSAGE.to_string())
                    } else {
                        AgentState::Thinking
                    }
                }
                AgentState::Finished(answer) => {
                    steps.push(AgentStep::FinalAnswer(answer.clone()));
                    info!(iterations, steps = steps.len(), "agent finished");
                    return AgentOutcome {
                        answer,
                        finished: true,
                        iterations,
                        steps,
                    };
                }
                AgentState::Failed(message) => {
                    warn!(iterations, %message, "agent failed");
                    return AgentOutcome {
                        answer: message,
                        finished: false,
                        iterations,
                        steps,
                    };
                }
            };
        }
    }
}

fn next_state(step: ParsedStep) -> AgentState {
    match step {
        ParsedStep::FinalAnswer(answer) => AgentState::Finished(answer),
        ParsedStep::Action {
            thought,
            tool,
            input,
        } => AgentState::Acting {
            thought,
            tool,
            input,
        },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::ModelError;
    use crate::model::LanguageModel;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions in order, then errors.
    pub struct ScriptedModel {
        turns: Mutex<VecDeque<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new<I, S>(turns: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self::with_results(turns.into_iter().map(|turn| Ok(turn.into())))
        }

        pub fn with_results<I>(turns: I) -> Self
        where
            I: IntoIterator<Item = Result<String, String>>,
        {
            Self {
                turns: Mutex::new(turns.into_iter().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().map(|prompts| prompts.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.turns.lock().unwrap().pop_front() {
                Some(Ok(turn)) => Ok(turn),
                Some(Err(details)) => Err(ModelError::BackendResponse {
                    backend: "scripted".to_string(),
                    details,
                }),
                None => Err(ModelError::EmptyCompletion),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;
    use crate::tools::{Tool, ToolInput};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        fn description(&self) -> &str {
            "Repeats its input."
        }

        async fn call(&self, input: &ToolInput) -> Result<String, ToolError> {
            Ok(format!("echo: {input}"))
        }
    }

    #[derive(Default)]
    struct Broken {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "Broken"
        }

        fn description(&self) -> &str {
            "Always fails."
        }

        async fn call(&self, _input: &ToolInput) -> Result<String, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ToolError::Execution("backend down".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "Slow"
        }

        fn description(&self) -> &str {
            "Never answers in time."
        }

        async fn call(&self, _input: &ToolInput) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn registry(broken: Arc<Broken>) -> ToolRegistry {
        ToolRegistry::new()
            .with_tool(Arc::new(Echo))
            .and_then(|registry| registry.with_tool(broken))
            .and_then(|registry| registry.with_tool(Arc::new(Slow)))
            .unwrap()
    }

    fn agent(model: Arc<ScriptedModel>, broken: Arc<Broken>) -> AgentLoop {
        AgentLoop::new(
            model,
            registry(broken),
            AgentConfig {
                max_iterations: 8,
                tool_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn observation_is_fed_back_before_final_answer() {
        let model = Arc::new(ScriptedModel::new([
            "Thought: use echo\nAction: Echo\nAction Input: \"hello\"",
            "Final Answer: the tool said hello",
        ]));
        let agent = agent(model.clone(), Arc::default());
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "say hello").await;

        assert!(outcome.finished);
        assert_eq!(outcome.answer, "the tool said hello");
        assert_eq!(
            outcome.steps,
            vec![
                AgentStep::Thought("use echo".to_string()),
                AgentStep::Action {
                    tool: "Echo".to_string(),
                    input: "hello".to_string()
                },
                AgentStep::Observation("echo: hello".to_string()),
                AgentStep::FinalAnswer("the tool said hello".to_string()),
            ]
        );
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains("Observation: echo: hello\nThought:"));
    }

    #[tokio::test]
    async fn three_distinct_failures_force_the_diagnostic() {
        let model = Arc::new(ScriptedModel::new([
            "Action: Broken\nAction Input: \"a\"",
            "action: Missing\naction input: b",
            "Action: Echo\nAction Input: {\"query\": \"c\"}",
            "Final Answer: never reached",
        ]));
        let broken = Arc::new(Broken::default());
        let agent = agent(model.clone(), broken.clone());
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "q").await;

        assert!(outcome.finished);
        assert_eq!(outcome.answer, FAILURE_CEILING_MESSAGE);
        assert_eq!(session.failures().len(), FAILURE_CEILING);
        assert_eq!(model.calls(), 3);
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_failed_action_is_not_reinvoked() {
        let model = Arc::new(ScriptedModel::new([
            "Action: Broken\nAction Input: \"a\"",
            "Action: Broken\nAction Input: \"a\"",
            "Final Answer: gave up",
        ]));
        let broken = Arc::new(Broken::default());
        let agent = agent(model, broken.clone());
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "q").await;

        assert_eq!(outcome.answer, "gave up");
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.failures().len(), 1);
        assert!(matches!(
            &outcome.steps[3],
            AgentStep::Observation(text) if text.contains("already failed")
        ));
    }

    #[tokio::test]
    async fn slow_tool_becomes_a_timeout_observation() {
        let model = Arc::new(ScriptedModel::new([
            "Action: Slow\nAction Input: \"x\"",
            "Final Answer: done",
        ]));
        let agent = agent(model, Arc::default());
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "q").await;

        assert_eq!(outcome.answer, "done");
        assert!(matches!(
            &outcome.steps[1],
            AgentStep::Observation(text) if text.starts_with("Error: tool timed out")
        ));
        assert!(session.failures().contains("Slow", "x"));
    }

    #[tokio::test]
    async fn iteration_limit_fails_with_error_marker() {
        let turns = (0..10).map(|turn| format!("Action: Echo\nAction Input: \"{turn}\""));
        let model = Arc::new(ScriptedModel::new(turns));
        let agent = AgentLoop::new(
            model.clone(),
            registry(Arc::default()),
            AgentConfig {
                max_iterations: 2,
                tool_timeout: Duration::from_millis(50),
            },
        );
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "q").await;

        assert!(!outcome.finished);
        assert_eq!(outcome.answer, ITERATION_LIMIT_MESSAGE);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn model_error_fails_the_loop() {
        let model = Arc::new(ScriptedModel::with_results([Err("503".to_string())]));
        let agent = agent(model, Arc::default());
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "q").await;
        assert!(!outcome.finished);
        assert!(outcome.answer.starts_with("Error: language model failed"));
    }

    #[tokio::test]
    async fn unstructured_output_is_the_answer() {
        let model = Arc::new(ScriptedModel::new(["  Cats sleep a lot.  "]));
        let agent = agent(model, Arc::default());
        let mut session = AgentSession::new();

        let outcome = agent.run(&mut session, "q").await;
        assert_eq!(outcome.answer, "Cats sleep a lot.");
        assert_eq!(outcome.steps, vec![AgentStep::FinalAnswer("Cats sleep a lot.".to_string())]);
    }
}
