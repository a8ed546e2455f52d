use std::collections::VecDeque;

pub const FAILURE_CEILING: usize = 3;
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub tool: String,
    pub input: String,
}

/// Distinct `(tool, input)` pairs that failed during the current query, in
/// the order they failed. Never grows past its ceiling.
#[derive(Debug, Clone)]
pub struct FailureMemory {
    entries: Vec<FailedAction>,
    ceiling: usize,
}

impl Default for FailureMemory {
    fn default() -> Self {
        Self::with_ceiling(FAILURE_CEILING)
    }
}

impl FailureMemory {
    pub fn with_ceiling(ceiling: usize) -> Self {
        Self {
            entries: Vec::new(),
            ceiling: ceiling.max(1),
        }
    }

    pub fn contains(&self, tool: &str, input: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.tool == tool && entry.input == input)
    }

    /// Returns false when the pair is already known or the ceiling is reached.
    pub fn record(&mut self, tool: &str, input: &str) -> bool {
        if self.is_exhausted() || self.contains(tool, input) {
            return false;
        }
        self.entries.push(FailedAction {
            tool: tool.to_string(),
            input: input.to_string(),
        });
        true
    }

    pub fn is_exhausted(&self) -> bool {
        self.entries.len() >= self.ceiling
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn entries(&self) -> &[FailedAction] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// Caller-owned conversation state passed into every agent run.
#[derive(Debug, Clone)]
pub struct AgentSession {
    failures: FailureMemory,
    history: VecDeque<Exchange>,
    history_limit: usize,
}

impl Default for AgentSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSession {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            failures: FailureMemory::default(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// Failures never carry over from one question to the next.
    pub fn start_query(&mut self) {
        self.failures.clear();
    }

    pub fn failures(&self) -> &FailureMemory {
        &self.failures
    }

    pub fn failures_mut(&mut self) -> &mut FailureMemory {
        &mut self.failures
    }

    pub fn record_exchange(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(Exchange {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &Exchange> {
        self.history.iter()
    }

    pub fn render_history(&self) -> String {
        self.history
            .iter()
            .map(|exchange| format!("User: {}\nAssistant: {}", exchange.question, exchange.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_memory_keeps_distinct_pairs_up_to_the_ceiling() {
        let mut memory = FailureMemory::default();
        assert!(memory.record("A", "x"));
        assert!(!memory.record("A", "x"));
        assert!(memory.record("A", "y"));
        assert!(memory.record("B", "x"));
        assert!(memory.is_exhausted());
        assert!(!memory.record("C", "z"));
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn new_query_clears_failures_but_keeps_history() {
        let mut session = AgentSession::new();
        session.failures_mut().record("A", "x");
        session.record_exchange("Q1", "A1");
        session.start_query();
        assert!(session.failures().is_empty());
        assert_eq!(session.render_history(), "User: Q1\nAssistant: A1");
    }

    #[test]
    fn history_is_bounded() {
        let mut session = AgentSession::with_history_limit(2);
        for turn in 0..4 {
            session.record_exchange(format!("Q{turn}"), format!("A{turn}"));
        }
        let questions = session
            .history()
            .map(|exchange| exchange.question.as_str())
            .collect::<Vec<_>>();
        assert_eq!(questions, vec!["Q2", "Q3"]);
    }
}
