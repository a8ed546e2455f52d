use crate::tools::ToolRegistry;

const FORMAT_RULES: &str = "\
You are a disciplined assistant that answers by using tools. Follow this format exactly.

FORMAT:
Thought: <your reasoning about the problem>
Action: <one of the tool names, exactly as listed>
Action Input: \"<a single string passed to the tool>\"

After the tool runs you will see:
Observation: <the tool's output>

Then continue with another Thought/Action/Action Input, or finish with:
Final Answer: <your answer to the user>

RULES:
- Use the tools when the question needs information you do not have.
- Call a tool with one short string. Never pass several arguments, objects or lists.
- When a tool gives you the answer, use that answer.
- If no tool is needed, reply directly with a Final Answer.
- Do not write JSON, markdown or chat-style preambles.
- If the action input would be empty, copy the user's question into it.
- If you cannot proceed, reply with: Final Answer: ERROR: invalid input or tool failure.
- Resolve words like 'it', 'that' or 'they' from the conversation so far before acting.";

/// Full prompt for one thinking turn: rules, tools, conversation so far, the
/// question and the steps already taken for it.
pub fn build_prompt(tools: &ToolRegistry, history: &str, query: &str, scratchpad: &str) -> String {
    let mut prompt = String::with_capacity(FORMAT_RULES.len() + scratchpad.len() + 512);
    prompt.push_str(FORMAT_RULES);

    prompt.push_str("\n\nTOOLS:\n");
    if tools.is_empty() {
        prompt.push_str("(no tools available)");
    } else {
        prompt.push_str(&tools.describe());
    }
    prompt.push_str(&format!("\nTool names: {}", tools.names().join(", ")));

    if !history.trim().is_empty() {
        prompt.push_str("\n\nConversation so far:\n");
        prompt.push_str(history.trim());
    }

    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(query.trim());
    prompt.push('\n');
    prompt.push_str(scratchpad);
    prompt.push_str("Thought:");
    prompt
}

/// One completed action in the format the model is asked to write.
pub fn scratchpad_entry(
    thought: Option<&str>,
    tool: &str,
    input: &str,
    observation: &str,
) -> String {
    format!(
        "Thought: {}\nAction: {tool}\nAction Input: \"{input}\"\nObservation: {observation}\n",
        thought.unwrap_or("I should use a tool.")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_ends_with_an_open_thought() {
        let prompt = build_prompt(&ToolRegistry::new(), "", "How long do cats sleep?", "");
        assert!(prompt.contains("(no tools available)"));
        assert!(prompt.contains("Question: How long do cats sleep?\n"));
        assert!(!prompt.contains("Conversation so far"));
        assert!(prompt.ends_with("Thought:"));
    }

    #[test]
    fn history_and_scratchpad_are_included() {
        let entry = scratchpad_entry(None, "CatsRetriever", "sleep", "Cats sleep 16 hours.");
        let prompt = build_prompt(
            &ToolRegistry::new(),
            "User: hi\nAssistant: hello",
            "And dogs?",
            &entry,
        );
        assert!(prompt.contains("Conversation so far:\nUser: hi\nAssistant: hello"));
        assert!(prompt.contains(concat!(
            "Action: CatsRetriever\n",
            "Action Input: \"sleep\"\n",
            "Observation: Cats sleep 16 hours.\n",
            "Thought:"
        )));
    }
}
